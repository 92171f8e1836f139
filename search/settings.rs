// ========================================================================================
//                                  Search settings
// ========================================================================================

use crate::batch::{BatchPlan, SequentialPlan};
use crate::kernel::{BackendKind, Isa};
use crate::provider::{ProviderError, SeedFile, SeedProvider};
use crate::seed::MAX_SEED_LENGTH;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("thread count must be at least 1")]
    NoThreads,
    #[error("seed length {0} is outside 1..={MAX_SEED_LENGTH}")]
    SeedLength(usize),
    #[error("fast digit count {fast_digits} is outside 1..={seed_length}")]
    FastDigits {
        fast_digits: usize,
        seed_length: usize,
    },
    #[error("start batch {start} is beyond the last batch ({max_batch})")]
    StartBatch { start: u64, max_batch: u64 },
    #[error("config must set either seed_length or seeds_file, not both or neither")]
    AmbiguousWorkload,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Which lane backend the workers run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Vectorized when the machine has a vector ISA, portable otherwise.
    #[default]
    Auto,
    Simd,
    Portable,
}

impl BackendPreference {
    pub fn resolve(self, isa: Isa) -> BackendKind {
        match self {
            BackendPreference::Auto if isa.is_vectorized() => BackendKind::Simd,
            BackendPreference::Auto => BackendKind::Portable,
            BackendPreference::Simd => BackendKind::Simd,
            BackendPreference::Portable => BackendKind::Portable,
        }
    }
}

/// What the search enumerates.
#[derive(Clone)]
pub enum Workload {
    /// Every seed of `seed_length` characters. `fast_digits` positions are enumerated
    /// within one batch.
    Sequential {
        seed_length: usize,
        fast_digits: usize,
    },
    /// The seeds of an external list, in order.
    Provider(Arc<dyn SeedProvider>),
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workload::Sequential {
                seed_length,
                fast_digits,
            } => f
                .debug_struct("Sequential")
                .field("seed_length", seed_length)
                .field("fast_digits", fast_digits)
                .finish(),
            Workload::Provider(provider) => f
                .debug_struct("Provider")
                .field("seed_count", &provider.seed_count())
                .finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchSettings {
    pub thread_count: usize,
    /// The first batch to run; batches before it count as done. Used to resume.
    pub start_batch: u64,
    pub backend: BackendPreference,
    pub progress_interval_ms: u64,
    pub workload: Workload,
}

impl SearchSettings {
    fn with_workload(workload: Workload) -> Self {
        Self {
            thread_count: num_cpus::get(),
            start_batch: 0,
            backend: BackendPreference::Auto,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            workload,
        }
    }

    pub fn sequential(seed_length: usize, fast_digits: usize) -> Self {
        Self::with_workload(Workload::Sequential {
            seed_length,
            fast_digits,
        })
    }

    pub fn provider(provider: Arc<dyn SeedProvider>) -> Self {
        Self::with_workload(Workload::Provider(provider))
    }

    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_start_batch(mut self, start_batch: u64) -> Self {
        self.start_batch = start_batch;
        self
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_progress_interval(mut self, progress_interval_ms: u64) -> Self {
        self.progress_interval_ms = progress_interval_ms;
        self
    }

    /// Checks the settings and derives the batch plan they describe.
    pub fn validate(&self) -> Result<BatchPlan, SettingsError> {
        if self.thread_count == 0 {
            return Err(SettingsError::NoThreads);
        }
        let plan = match &self.workload {
            Workload::Sequential {
                seed_length,
                fast_digits,
            } => {
                let (seed_length, fast_digits) = (*seed_length, *fast_digits);
                if !(1..=MAX_SEED_LENGTH).contains(&seed_length) {
                    return Err(SettingsError::SeedLength(seed_length));
                }
                if !(1..=seed_length).contains(&fast_digits) {
                    return Err(SettingsError::FastDigits {
                        fast_digits,
                        seed_length,
                    });
                }
                BatchPlan::Sequential(SequentialPlan::new(seed_length, fast_digits))
            }
            Workload::Provider(provider) => BatchPlan::Provider(Arc::clone(provider)),
        };
        let max_batch = plan.max_batch();
        if self.start_batch > max_batch {
            return Err(SettingsError::StartBatch {
                start: self.start_batch,
                max_batch,
            });
        }
        Ok(plan)
    }
}

// ========================================================================================
//                                  TOML configuration
// ========================================================================================

/// The `[search]` table of a config file. Every field is optional; the CLI fills the
/// gaps from its flags and defaults.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SearchSection {
    pub threads: Option<usize>,
    pub start_batch: Option<u64>,
    pub backend: Option<BackendPreference>,
    pub progress_interval_ms: Option<u64>,
    pub seed_length: Option<usize>,
    pub fast_digits: Option<usize>,
    pub seeds_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default)]
    pub search: SearchSection,
}

/// Fast digit count used when a sequential config does not name one.
pub const DEFAULT_FAST_DIGITS: usize = 3;

impl SearchConfig {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Builds settings from the config. A seed file is opened here.
    pub fn into_settings(self) -> Result<SearchSettings, SettingsError> {
        let section = self.search;
        let mut settings = match (section.seed_length, section.seeds_file) {
            (Some(seed_length), None) => SearchSettings::sequential(
                seed_length,
                section
                    .fast_digits
                    .unwrap_or(DEFAULT_FAST_DIGITS.min(seed_length)),
            ),
            (None, Some(path)) => SearchSettings::provider(Arc::new(SeedFile::open(&path)?)),
            _ => return Err(SettingsError::AmbiguousWorkload),
        };
        if let Some(threads) = section.threads {
            settings.thread_count = threads;
        }
        if let Some(start_batch) = section.start_batch {
            settings.start_batch = start_batch;
        }
        if let Some(backend) = section.backend {
            settings.backend = backend;
        }
        if let Some(interval) = section.progress_interval_ms {
            settings.progress_interval_ms = interval;
        }
        Ok(settings)
    }
}
