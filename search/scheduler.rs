// ========================================================================================
//
//                 The scheduler: a fixed pool of workers over batch indices
//
// ========================================================================================
//
// Workers claim batch indices from one atomic counter and run them independently. The
// only shared mutable state is that counter, the completed-batch and searched-seed
// counters, the last progress timestamp and the status flag, all atomics. Each worker owns its own scratch
// memory for its whole life.
//
// Pausing is a two-phase rendezvous. A paused worker waits on the pause barrier, which
// the controlling thread also joins, so when `pause` returns every worker is idle and
// every claimed batch has finished. Workers then wait on the unpause barrier until
// `start` or `dispose` joins it. Workers are created paused.

use crate::batch::{BatchPlan, WorkerScratch};
use crate::cache::CacheLayout;
use crate::filter::{FilterCreationContext, FilterError, SeedFilter, SeedFilterDesc};
use crate::kernel::{BackendKind, LaneBackend, PortableLanes, SimdLanes, detect_isa};
use crate::progress::{ProgressReport, SearchObserver};
use crate::settings::{SearchSettings, SettingsError};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid search settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("filter setup failed: {0}")]
    Filter(#[from] FilterError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SearchStatus {
    Paused = 0,
    Running = 1,
    Completed = 2,
    Disposed = 3,
}

impl SearchStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SearchStatus::Paused,
            1 => SearchStatus::Running,
            2 => SearchStatus::Completed,
            _ => SearchStatus::Disposed,
        }
    }
}

/// State shared by the scheduler handle and every worker.
struct Shared<F> {
    status: AtomicU8,
    next_batch: AtomicU64,
    completed: AtomicU64,
    seeds_searched: AtomicU64,
    last_report_ms: AtomicU64,
    pause_barrier: Barrier,
    unpause_barrier: Barrier,

    plan: BatchPlan,
    layout: CacheLayout,
    filter: F,
    observer: Arc<dyn SearchObserver>,
    start_batch: u64,
    max_batch: u64,
    seeds_per_batch: u64,
    progress_interval_ms: u64,
    started: Instant,
}

impl<F> Shared<F> {
    #[inline]
    fn status(&self) -> SearchStatus {
        SearchStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(&self, from: SearchStatus, to: SearchStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn total_batches(&self) -> u64 {
        self.max_batch - self.start_batch
    }

    /// Emits a progress report if the interval has passed since the last one, or if
    /// `completed` is the final batch.
    fn report_progress(&self, completed: u64) {
        let now_ms = self.started.elapsed().as_millis() as u64;
        let is_final = completed == self.total_batches();
        if !is_final {
            let last = self.last_report_ms.load(Ordering::Relaxed);
            if now_ms.saturating_sub(last) < self.progress_interval_ms {
                return;
            }
            // Only one worker reports per interval.
            if self
                .last_report_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
        }
        let report = ProgressReport::new(
            completed,
            self.total_batches(),
            self.seeds_searched.load(Ordering::Acquire),
            self.started.elapsed(),
        );
        self.observer.on_progress(&report);
    }
}

pub struct SearchScheduler<F: SeedFilter> {
    shared: Arc<Shared<F>>,
    threads: Vec<JoinHandle<()>>,
    backend: BackendKind,
}

impl<F: SeedFilter> SearchScheduler<F> {
    /// Validates `settings`, creates the filter, and spawns the workers, paused.
    pub fn new<D>(
        settings: &SearchSettings,
        filter: &D,
        observer: Arc<dyn SearchObserver>,
    ) -> Result<Self, SearchError>
    where
        D: SeedFilterDesc<Filter = F>,
    {
        let plan = settings.validate()?;
        let mut creation = FilterCreationContext::new();
        let filter = filter.create(&mut creation)?;
        let layout = creation.into_layout().map_err(FilterError::from)?;

        let isa = detect_isa();
        let backend = settings.backend.resolve(isa);
        let thread_count = settings.thread_count;
        log::info!(
            "Starting search: {} threads, {} backend (ISA {:?}), {} cached key lengths",
            thread_count,
            backend.name(),
            isa,
            layout.slot_count()
        );

        let max_batch = plan.max_batch();
        let seeds_per_batch = plan.seeds_per_batch();
        log::debug!(
            "Batches {}..{} of {} seeds each",
            settings.start_batch,
            max_batch,
            seeds_per_batch
        );

        let shared = Arc::new(Shared {
            status: AtomicU8::new(SearchStatus::Paused as u8),
            next_batch: AtomicU64::new(settings.start_batch),
            completed: AtomicU64::new(0),
            seeds_searched: AtomicU64::new(0),
            last_report_ms: AtomicU64::new(0),
            pause_barrier: Barrier::new(thread_count + 1),
            unpause_barrier: Barrier::new(thread_count + 1),
            plan,
            layout,
            filter,
            observer,
            start_batch: settings.start_batch,
            max_batch,
            seeds_per_batch,
            progress_interval_ms: settings.progress_interval_ms,
            started: Instant::now(),
        });

        let mut threads = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let worker_shared = Arc::clone(&shared);
            let builder = thread::Builder::new().name(format!("seedsift-worker-{index}"));
            let spawned = match backend {
                BackendKind::Simd => builder.spawn(move || worker_loop::<F, SimdLanes>(&worker_shared)),
                BackendKind::Portable => {
                    builder.spawn(move || worker_loop::<F, PortableLanes>(&worker_shared))
                }
            };
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(error) => {
                    // The workers already spawned can never complete the barrier; they are
                    // left parked and reclaimed at process exit.
                    shared.status.store(SearchStatus::Disposed as u8, Ordering::Release);
                    log::warn!("Spawned {index} of {thread_count} workers before failing");
                    return Err(SearchError::Spawn(error));
                }
            }
        }

        // Rendezvous with the workers so that all of them are parked when `new` returns.
        shared.pause_barrier.wait();
        Ok(Self {
            shared,
            threads,
            backend,
        })
    }

    /// Starts or resumes the workers. Does nothing unless the search is paused.
    pub fn start(&self) {
        if self.shared.transition(SearchStatus::Paused, SearchStatus::Running) {
            log::debug!(
                "Resuming at batch {}",
                self.shared.next_batch.load(Ordering::Acquire)
            );
            self.shared.unpause_barrier.wait();
        }
    }

    /// Stops the workers once their current batches finish, and returns when all of them
    /// are idle. Does nothing unless the search is running.
    pub fn pause(&self) {
        if self.shared.transition(SearchStatus::Running, SearchStatus::Paused) {
            self.shared.pause_barrier.wait();
            log::info!("Paused before batch {}", self.next_batch_index());
        }
    }

    /// Stops the workers and joins them. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.status() == SearchStatus::Running {
            self.pause();
        }
        let previous = SearchStatus::from_u8(
            self.shared
                .status
                .swap(SearchStatus::Disposed as u8, Ordering::AcqRel),
        );
        match previous {
            SearchStatus::Disposed => return,
            // Parked workers wake up, see the new status and exit.
            SearchStatus::Paused => {
                self.shared.unpause_barrier.wait();
            }
            SearchStatus::Running | SearchStatus::Completed => {}
        }
        self.join_workers();
        log::debug!("Search disposed after {} batches", self.completed_batch_count());
    }

    /// Blocks until every batch has run. Returns immediately when the search is paused,
    /// since it would never finish.
    pub fn wait_for_completion(&mut self) -> SearchStatus {
        match self.status() {
            SearchStatus::Running | SearchStatus::Completed => {
                self.join_workers();
                log::info!(
                    "Search complete: {} batches in {:.2}s",
                    self.completed_batch_count(),
                    self.shared.started.elapsed().as_secs_f64()
                );
            }
            SearchStatus::Paused | SearchStatus::Disposed => {}
        }
        self.status()
    }

    fn join_workers(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("A search worker panicked");
            }
        }
    }

    // --- Queries ---

    pub fn status(&self) -> SearchStatus {
        self.shared.status()
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The first batch no worker has claimed yet.
    pub fn next_batch_index(&self) -> u64 {
        self.shared
            .next_batch
            .load(Ordering::Acquire)
            .min(self.shared.max_batch)
    }

    /// Batches finished in this run, not counting those skipped by the start index.
    pub fn completed_batch_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    pub fn total_batch_count(&self) -> u64 {
        self.shared.total_batches()
    }

    pub fn max_batch(&self) -> u64 {
        self.shared.max_batch
    }

    pub fn seeds_per_batch(&self) -> u64 {
        self.shared.seeds_per_batch
    }
}

impl<F: SeedFilter> Drop for SearchScheduler<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ========================================================================================
//                                    Worker loop
// ========================================================================================

fn worker_loop<F: SeedFilter, B: LaneBackend>(shared: &Shared<F>) {
    let mut scratch = WorkerScratch::new(&shared.layout);
    let observer = shared.observer.as_ref();
    let mut on_match = |seed: &crate::seed::Seed| observer.on_match(seed);

    loop {
        match shared.status() {
            SearchStatus::Paused => {
                shared.pause_barrier.wait();
                shared.unpause_barrier.wait();
                continue;
            }
            SearchStatus::Completed | SearchStatus::Disposed => break,
            SearchStatus::Running => {}
        }

        let index = shared.next_batch.fetch_add(1, Ordering::AcqRel);
        if index >= shared.max_batch {
            shared.next_batch.fetch_min(shared.max_batch, Ordering::AcqRel);
            // Fails harmlessly if a pause got in first; the next claim retries.
            shared.transition(SearchStatus::Running, SearchStatus::Completed);
            continue;
        }

        match scratch.run_batch::<F, B, _>(
            &shared.plan,
            &shared.layout,
            &shared.filter,
            index,
            &mut on_match,
        ) {
            Ok(()) => {
                let seeds = shared.plan.batch_seed_count(index);
                shared.seeds_searched.fetch_add(seeds, Ordering::AcqRel);
            }
            Err(error) => {
                log::warn!("Batch {index} failed: {error}");
                shared.observer.on_batch_failed(index, &error);
            }
        }

        let completed = shared.completed.fetch_add(1, Ordering::AcqRel) + 1;
        shared.report_progress(completed);
    }
    log::debug!("Worker {:?} exiting", thread::current().name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WideSearchContext;
    use crate::kernel::LaneMask;
    use crate::seed::Seed;
    use std::sync::Mutex;

    struct Everything;
    struct PassAll;

    impl SeedFilter for PassAll {
        fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
            ctx.valid_lanes()
        }
    }

    impl SeedFilterDesc for Everything {
        type Filter = PassAll;
        fn create(&self, _: &mut FilterCreationContext) -> Result<PassAll, FilterError> {
            Ok(PassAll)
        }
    }

    #[derive(Default)]
    struct Collect {
        seeds: Mutex<Vec<Seed>>,
        final_reports: Mutex<Vec<ProgressReport>>,
    }

    impl SearchObserver for Collect {
        fn on_match(&self, seed: &Seed) {
            self.seeds.lock().unwrap().push(*seed);
        }
        fn on_progress(&self, report: &ProgressReport) {
            if report.completed_batches == report.total_batches {
                self.final_reports.lock().unwrap().push(*report);
            }
        }
    }

    #[test]
    fn a_new_scheduler_is_paused_until_started() {
        let settings = SearchSettings::sequential(2, 1).with_threads(2);
        let observer = Arc::new(Collect::default());
        let mut scheduler = SearchScheduler::new(&settings, &Everything, observer.clone()).unwrap();
        assert_eq!(scheduler.status(), SearchStatus::Paused);
        assert_eq!(scheduler.next_batch_index(), 0);
        assert_eq!(scheduler.wait_for_completion(), SearchStatus::Paused);

        scheduler.start();
        assert_eq!(scheduler.wait_for_completion(), SearchStatus::Completed);
        assert_eq!(observer.seeds.lock().unwrap().len(), 35 * 35);
        assert_eq!(observer.final_reports.lock().unwrap().len(), 1);
        scheduler.dispose();
        assert_eq!(scheduler.status(), SearchStatus::Disposed);
    }

    #[test]
    fn start_batch_skips_earlier_batches() {
        let settings = SearchSettings::sequential(2, 1)
            .with_threads(3)
            .with_start_batch(30);
        let observer = Arc::new(Collect::default());
        let mut scheduler = SearchScheduler::new(&settings, &Everything, observer.clone()).unwrap();
        assert_eq!(scheduler.total_batch_count(), 5);
        scheduler.start();
        scheduler.wait_for_completion();
        assert_eq!(scheduler.completed_batch_count(), 5);
        assert_eq!(observer.seeds.lock().unwrap().len(), 5 * 35);
    }

    #[test]
    fn final_report_counts_the_seeds_of_a_short_last_batch() {
        let entries: Vec<String> = (0..10).map(|i| format!("SEED{i}")).collect();
        let list = crate::provider::SeedList::from_strs(&entries).unwrap();
        let settings = SearchSettings::provider(Arc::new(list)).with_threads(2);
        let observer = Arc::new(Collect::default());
        let mut scheduler = SearchScheduler::new(&settings, &Everything, observer.clone()).unwrap();
        scheduler.start();
        assert_eq!(scheduler.wait_for_completion(), SearchStatus::Completed);

        let reports = observer.final_reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].completed_batches, 2);
        assert_eq!(reports[0].seeds_searched, 10);
        assert_eq!(observer.seeds.lock().unwrap().len(), 10);
    }

    #[test]
    fn disposing_a_paused_scheduler_joins_its_workers() {
        let settings = SearchSettings::sequential(3, 1).with_threads(4);
        let mut scheduler =
            SearchScheduler::new(&settings, &Everything, Arc::new(crate::progress::NoopObserver))
                .unwrap();
        scheduler.dispose();
        assert_eq!(scheduler.status(), SearchStatus::Disposed);
        assert_eq!(scheduler.completed_batch_count(), 0);
        // A second dispose, and the one in drop, are no-ops.
        scheduler.dispose();
    }
}
