use std::time::Instant;

/// Averages clock drift samples over fixed windows of `max_span` samples.
///
/// When the averaged drift exceeds `max_drift` in either direction, the excess
/// of one whole `max_drift` step is reported as overdrift, to be folded into
/// the time base by the owner.
#[derive(Debug, Clone)]
pub struct DriftTracer {
    max_span: u32,
    max_drift: i64,
    drift: i64,
    overdrift: i64,
    drift_sum: i64,
    span: u32,
}

impl DriftTracer {
    pub fn new(max_span: u32, max_drift: i64) -> Self {
        Self {
            max_span: max_span.max(1),
            max_drift,
            drift: 0,
            overdrift: 0,
            drift_sum: 0,
            span: 0,
        }
    }

    /// Adds a sample, returns true when a window completed and the drift was recalculated.
    pub fn update(&mut self, sample_us: i64) -> bool {
        self.drift_sum += sample_us;
        self.span += 1;
        self.overdrift = 0;

        if self.span < self.max_span {
            return false;
        }

        self.drift = self.drift_sum / self.span as i64;
        self.drift_sum = 0;
        self.span = 0;

        if self.drift.abs() > self.max_drift {
            self.overdrift = if self.drift < 0 {
                -self.max_drift
            } else {
                self.max_drift
            };
            self.drift -= self.overdrift;
        }

        true
    }

    /// Overrides the drift with a value computed elsewhere (group synchronisation).
    pub fn force_drift(&mut self, drift_us: i64) {
        self.drift = drift_us;
    }

    pub fn drift(&self) -> i64 {
        self.drift
    }

    pub fn overdrift(&self) -> i64 {
        self.overdrift
    }
}

/// A single drift measurement, as handed to a `DriftSink`.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftSample {
    pub timestamp: u32,
    pub arrival: Instant,
    pub rtt_us: i64,
    pub sample_us: i64,
    pub drift_us: i64,
    pub overdrift_us: i64,
    pub time_base_corrected: bool,
}

/// Receives every drift sample taken by a `TsbpdTime`, used for drift tracing.
pub trait DriftSink: Send + Sync {
    fn record(&self, sample: &DriftSample);
}
