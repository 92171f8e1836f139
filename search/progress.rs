use crate::batch::BatchError;
use crate::seed::Seed;
use std::fmt;
use std::time::Duration;

/// A snapshot of how far a search has come.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressReport {
    /// Batches finished in this run, including failed ones.
    pub completed_batches: u64,
    /// Batches this run has to finish, i.e. excluding those skipped by a start index.
    pub total_batches: u64,
    /// Seeds in the batches that finished without failing.
    pub seeds_searched: u64,
    pub elapsed: Duration,
    pub seeds_per_ms: f64,
    /// Estimated time until the last batch completes, once a rate is known.
    pub remaining: Option<Duration>,
}

impl ProgressReport {
    pub fn new(
        completed_batches: u64,
        total_batches: u64,
        seeds_searched: u64,
        elapsed: Duration,
    ) -> Self {
        let millis = elapsed.as_secs_f64() * 1000.0;
        let seeds_per_ms = if millis > 0.0 {
            seeds_searched as f64 / millis
        } else {
            0.0
        };
        let remaining = (completed_batches > 0).then(|| {
            let left = total_batches.saturating_sub(completed_batches) as f64;
            Duration::from_secs_f64(elapsed.as_secs_f64() * left / completed_batches as f64)
        });
        Self {
            completed_batches,
            total_batches,
            seeds_searched,
            elapsed,
            seeds_per_ms,
            remaining,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total_batches == 0 {
            1.0
        } else {
            self.completed_batches as f64 / self.total_batches as f64
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} batches ({:.2}%), {:.0} seeds/ms, elapsed {:.1}s",
            self.completed_batches,
            self.total_batches,
            self.fraction() * 100.0,
            self.seeds_per_ms,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(remaining) = self.remaining {
            write!(f, ", ~{:.0}s left", remaining.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Receives the results of a running search. Called from worker threads, concurrently.
pub trait SearchObserver: Send + Sync {
    fn on_match(&self, seed: &Seed) {
        let _ = seed;
    }
    fn on_progress(&self, report: &ProgressReport) {
        let _ = report;
    }
    fn on_batch_failed(&self, batch_index: u64, error: &BatchError) {
        let _ = (batch_index, error);
    }
}

#[derive(Default)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_derive_rate_and_eta() {
        let report = ProgressReport::new(10, 40, 10_000, Duration::from_secs(2));
        assert_eq!(report.seeds_searched, 10_000);
        assert_eq!(report.seeds_per_ms, 5.0);
        assert_eq!(report.remaining, Some(Duration::from_secs(6)));
        assert_eq!(report.fraction(), 0.25);
        assert!(report.to_string().starts_with("10/40 batches (25.00%)"));
    }

    #[test]
    fn first_report_has_no_eta() {
        let report = ProgressReport::new(0, 40, 0, Duration::ZERO);
        assert_eq!(report.remaining, None);
        assert_eq!(report.seeds_per_ms, 0.0);
    }
}
