use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use roamly_core::BookingError;
use roamly_order::{SweepObserver, SweepReport};

/// Prometheus counters fed by the hold expiration sweeper.
pub struct SweeperMetrics {
    registry: Registry,
    cycles: IntCounter,
    cycle_failures: IntCounter,
    holds_released: IntCounter,
    release_failures: IntCounter,
    last_scanned: IntGauge,
}

impl SweeperMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles = IntCounter::new("roamly_sweeper_cycles_total", "Completed sweeper cycles")?;
        let cycle_failures = IntCounter::new(
            "roamly_sweeper_cycle_failures_total",
            "Sweeper cycles that failed before releasing anything",
        )?;
        let holds_released =
            IntCounter::new("roamly_holds_released_total", "Expired holds released")?;
        let release_failures = IntCounter::new(
            "roamly_hold_release_failures_total",
            "Expired holds that could not be released",
        )?;
        let last_scanned = IntGauge::new(
            "roamly_sweeper_last_scanned",
            "Expired holds found by the most recent cycle",
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(cycle_failures.clone()))?;
        registry.register(Box::new(holds_released.clone()))?;
        registry.register(Box::new(release_failures.clone()))?;
        registry.register(Box::new(last_scanned.clone()))?;

        Ok(Self {
            registry,
            cycles,
            cycle_failures,
            holds_released,
            release_failures,
            last_scanned,
        })
    }

    /// Text exposition format for `/metrics`.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl SweepObserver for SweeperMetrics {
    fn cycle_completed(&self, report: &SweepReport) {
        self.cycles.inc();
        self.holds_released.inc_by(report.released as u64);
        self.release_failures.inc_by(report.failed as u64);
        self.last_scanned.set(report.scanned as i64);
    }

    fn cycle_failed(&self, _error: &BookingError) {
        self.cycle_failures.inc();
    }
}
