#![feature(portable_simd)] // Do not remove this
#![deny(unused_variables)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod batch;
pub mod cache;
pub mod context;
pub mod filter;
pub mod hash;
pub mod kernel;
pub mod prng;
pub mod progress;
pub mod provider;
pub mod scheduler;
pub mod seed;
pub mod settings;
pub mod stream;

pub use batch::{BatchError, BatchPlan, SequentialPlan};
pub use context::{SearchContext, SingleSearchContext, WideSearchContext};
pub use filter::{FilterCreationContext, FilterError, SeedFilter, SeedFilterDesc};
pub use kernel::{LANE_COUNT, LaneBackend, LaneF64, LaneMask, PortableLanes, SimdLanes, lanes};
pub use progress::{NoopObserver, ProgressReport, SearchObserver};
pub use provider::{ProviderError, SeedFile, SeedList, SeedProvider};
pub use scheduler::{SearchError, SearchScheduler, SearchStatus};
pub use seed::{Seed, SeedError};
pub use settings::{BackendPreference, SearchConfig, SearchSettings, SettingsError, Workload};
