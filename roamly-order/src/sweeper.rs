use crate::reclaim::HoldReleaser;
use roamly_core::{BookingError, BookingResult, BookingStore};
use roamly_shared::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub released: usize,
    /// Holds that left HOLD between the scan and the release.
    pub skipped: usize,
    pub failed: usize,
    pub units_restored: usize,
}

/// Hook for metrics; the binary plugs Prometheus counters in here.
pub trait SweepObserver: Send + Sync {
    fn cycle_completed(&self, report: &SweepReport);

    fn cycle_failed(&self, _error: &BookingError) {}
}

/// Periodically converts overdue holds into EXPIRED_HOLD.
pub struct HoldExpirationSweeper {
    releaser: Arc<dyn HoldReleaser>,
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
    observer: Option<Arc<dyn SweepObserver>>,
}

impl HoldExpirationSweeper {
    pub fn new(
        releaser: Arc<dyn HoldReleaser>,
        store: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            releaser,
            store,
            clock,
            interval,
            batch_size: 500,
            observer: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SweepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// One cycle: every hold expired as of the clock's now, each released
    /// independently. Only the scan itself can fail the cycle.
    pub async fn sweep_once(&self) -> BookingResult<SweepReport> {
        let now = self.clock.now();
        let expired = self.store.list_expired_holds(now, self.batch_size).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            debug!("No expired holds");
            return Ok(report);
        }
        info!(count = expired.len(), as_of = %now, "Releasing expired holds");

        for booking in expired {
            match self.releaser.release_hold(booking.id, now).await {
                Ok(restored) => {
                    report.released += 1;
                    report.units_restored += restored;
                }
                Err(BookingError::StateConflict { actual, .. }) => {
                    debug!(booking_id = %booking.id, status = %actual, "Hold moved on before release");
                    report.skipped += 1;
                }
                Err(err) => {
                    error!(booking_id = %booking.id, error = %err, "Failed to release expired hold");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            released = report.released,
            skipped = report.skipped,
            failed = report.failed,
            "Hold sweep finished"
        );
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender is
    /// dropped. A failed cycle is logged and the next tick tries again.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Hold expiration sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => {
                            if let Some(observer) = &self.observer {
                                observer.cycle_completed(&report);
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "Hold sweep cycle failed, retrying next tick");
                            if let Some(observer) = &self.observer {
                                observer.cycle_failed(&err);
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Hold expiration sweeper stopped");
    }
}
