// ========================================================================================
//                                   Seed providers
// ========================================================================================

// A provider is a bounded, randomly indexable list of seeds to test, as an alternative
// to enumerating the whole seed space. Worker threads claim batches of consecutive
// indices, so `seed_at` must be cheap and callable from any thread.

use crate::seed::{Seed, SeedError};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read seed list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {source}")]
    InvalidSeed {
        line: u64,
        #[source]
        source: SeedError,
    },
}

pub trait SeedProvider: Send + Sync {
    fn seed_count(&self) -> u64;

    /// The seed at `index`, which must be below `seed_count()`.
    fn seed_at(&self, index: u64) -> Result<Seed, SeedError>;
}

// ========================================================================================
//                                   In-memory list
// ========================================================================================

#[derive(Debug, Clone, Default)]
pub struct SeedList {
    seeds: Vec<Seed>,
}

impl SeedList {
    pub fn new(seeds: Vec<Seed>) -> Self {
        Self { seeds }
    }

    /// Parses every entry up front, in parallel. The first invalid entry (by position)
    /// is reported with its 1-based line number.
    pub fn from_strs<S: AsRef<str> + Sync>(entries: &[S]) -> Result<Self, ProviderError> {
        let parsed: Vec<Result<Seed, SeedError>> = entries
            .par_iter()
            .map(|entry| Seed::new(entry.as_ref().trim()))
            .collect();
        let mut seeds = Vec::with_capacity(parsed.len());
        for (index, result) in parsed.into_iter().enumerate() {
            seeds.push(result.map_err(|source| ProviderError::InvalidSeed {
                line: index as u64 + 1,
                source,
            })?);
        }
        Ok(Self { seeds })
    }

    pub fn seeds(&self) -> &[Seed] {
        &self.seeds
    }
}

impl SeedProvider for SeedList {
    fn seed_count(&self) -> u64 {
        self.seeds.len() as u64
    }

    fn seed_at(&self, index: u64) -> Result<Seed, SeedError> {
        Ok(self.seeds[index as usize])
    }
}

// ========================================================================================
//                                Memory-mapped seed file
// ========================================================================================

/// A newline-delimited seed file. Only line offsets are indexed when the file is opened;
/// each line is validated when a worker reads it, so one bad line fails one batch rather
/// than the whole search.
pub struct SeedFile {
    mmap: Option<Mmap>,
    /// Byte ranges of the non-empty lines, with line terminators stripped.
    lines: Vec<(usize, usize)>,
}

impl SeedFile {
    pub fn open(path: &Path) -> Result<Self, ProviderError> {
        let io_error = |source| ProviderError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        let length = file.metadata().map_err(io_error)?.len();
        if length == 0 {
            // Mapping a zero-length file fails on some platforms.
            return Ok(Self {
                mmap: None,
                lines: Vec::new(),
            });
        }
        // SAFETY: the file is opened read-only and the map is never handed out mutably.
        let mmap = unsafe { Mmap::map(&file).map_err(io_error)? };
        #[cfg(unix)]
        mmap.advise(memmap2::Advice::Sequential).map_err(io_error)?;

        let lines = index_lines(&mmap);
        log::debug!("Indexed {} seeds in {}", lines.len(), path.display());
        Ok(Self {
            mmap: Some(mmap),
            lines,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or_default()
    }
}

fn index_lines(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut lines = Vec::new();
    let mut start = 0;
    let ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for end in ends {
        let mut stop = end;
        if stop > start && bytes[stop - 1] == b'\r' {
            stop -= 1;
        }
        if stop > start {
            lines.push((start, stop));
        }
        start = end + 1;
    }
    lines
}

impl SeedProvider for SeedFile {
    fn seed_count(&self) -> u64 {
        self.lines.len() as u64
    }

    fn seed_at(&self, index: u64) -> Result<Seed, SeedError> {
        let (start, end) = self.lines[index as usize];
        Seed::from_bytes(self.bytes()[start..end].trim_ascii())
    }
}
