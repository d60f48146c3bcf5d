use super::{DriftSample, DriftSink, DriftTracer};
use log::*;
use srt_shared::MAX_TIMESTAMP;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Timestamps within this period before MAX_TIMESTAMP start the wrap check,
/// timestamps in [period, 2 * period] after it complete the wrap.
pub const TSBPD_WRAP_PERIOD: u32 = 30_000_000; // us

/// Microseconds added to the time base once the 32-bit timestamp wraps
const TIMESTAMP_CARRYOVER: i64 = MAX_TIMESTAMP as i64 + 1;

#[derive(Debug)]
struct TsbpdState {
    enabled: bool,

    /// Local time corresponding to a packet timestamp of 0
    time_base: Instant,

    /// Set while packets from both sides of the timestamp wraparound may arrive
    wrap_check: bool,

    delay: Duration,

    /// First RTT sample, zero reference for estimating network delay changes
    first_rtt: Option<i64>,

    tracer: DriftTracer,
}

/// Maps 32-bit packet timestamps onto local delivery times, compensating
/// for clock drift between the peers and for timestamp wraparound.
///
/// The state is guarded by its own lock: drift samples arrive from the ACK
/// processing path while the data path updates the wraparound base.
pub struct TsbpdTime {
    state: Mutex<TsbpdState>,
    sink: Option<Arc<dyn DriftSink>>,
}

/// Moves `base` by a signed number of microseconds, saturating at the
/// bounds of the platform clock.
pub fn offset_instant(base: Instant, us: i64) -> Instant {
    if us >= 0 {
        base.checked_add(Duration::from_micros(us as u64))
            .unwrap_or(base)
    } else {
        base.checked_sub(Duration::from_micros(us.unsigned_abs()))
            .unwrap_or(base)
    }
}

/// Signed number of microseconds from `earlier` to `later`.
pub fn signed_micros(later: Instant, earlier: Instant) -> i64 {
    if later >= earlier {
        (later - earlier).as_micros() as i64
    } else {
        -((earlier - later).as_micros() as i64)
    }
}

impl TsbpdTime {
    pub fn new(drift_max_samples: u32, drift_max_value_us: i64) -> Self {
        Self {
            state: Mutex::new(TsbpdState {
                enabled: false,
                time_base: Instant::now(),
                wrap_check: false,
                delay: Duration::from_millis(0),
                first_rtt: None,
                tracer: DriftTracer::new(drift_max_samples, drift_max_value_us),
            }),
            sink: None,
        }
    }

    pub fn with_drift_sink(mut self, sink: Arc<dyn DriftSink>) -> Self {
        self.sink = Some(sink);

        self
    }

    fn state(&self) -> MutexGuard<'_, TsbpdState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enables timestamp based delivery.
    ///
    /// `time_base` is the local time of a zero timestamp, usually "now" minus
    /// the timestamp of the handshake packet.
    pub fn set_mode(&self, time_base: Instant, wrap_check: bool, delay: Duration) {
        let mut state = self.state();

        state.enabled = true;
        state.time_base = time_base;
        state.wrap_check = wrap_check;
        state.delay = delay;

        debug!(
            "tsbpd enabled, delay {}ms, wrap check {}",
            delay.as_millis(),
            wrap_check
        );
    }

    /// Copies the timing state of a sibling connection.
    pub fn apply_external_time(
        &self,
        time_base: Instant,
        wrap_check: bool,
        delay: Duration,
        drift_us: i64,
    ) {
        let mut state = self.state();

        state.enabled = true;
        state.time_base = time_base;
        state.wrap_check = wrap_check;
        state.delay = delay;
        state.tracer.force_drift(drift_us);
    }

    pub fn apply_external_drift(&self, time_base: Instant, wrap_check: bool, drift_us: i64) {
        let mut state = self.state();

        state.time_base = time_base;
        state.wrap_check = wrap_check;
        state.tracer.force_drift(drift_us);
    }

    /// Snapshot of (time base, wrap check, drift) for a sibling's `apply_external_*`.
    pub fn internal_time_base(&self) -> (Instant, bool, i64) {
        let state = self.state();

        (state.time_base, state.wrap_check, state.tracer.drift())
    }

    /// Adds a drift sample taken when an ACKACK packet arrived.
    ///
    /// `rtt_us` is the RTT sample measured with that ACKACK, negative when
    /// there is none. Returns true when the time base was corrected.
    pub fn add_drift_sample(&self, timestamp: u32, arrival: Instant, rtt_us: i64) -> bool {
        let mut state = self.state();

        if !state.enabled {
            return false;
        }

        if rtt_us >= 0 && state.first_rtt.is_none() {
            state.first_rtt = Some(rtt_us);
        }

        // A change of the one way delay is approximated by half of the RTT change
        let rtt_delta = match state.first_rtt {
            Some(first_rtt) if rtt_us >= 0 => (rtt_us - first_rtt) / 2,
            _ => 0,
        };

        let origin = offset_instant(
            Self::base_time_locked(&state, timestamp),
            timestamp as i64,
        );
        let sample_us = signed_micros(arrival, origin) - rtt_delta;

        let mut corrected = false;

        if state.tracer.update(sample_us) && state.tracer.overdrift() != 0 {
            let overdrift = state.tracer.overdrift();
            let old_base = state.time_base;
            state.time_base = offset_instant(old_base, overdrift);
            corrected = true;

            debug!(
                "tsbpd time base corrected by {}us, drift {}us",
                overdrift,
                state.tracer.drift()
            );
        }

        if let Some(sink) = &self.sink {
            sink.record(&DriftSample {
                timestamp,
                arrival,
                rtt_us,
                sample_us,
                drift_us: state.tracer.drift(),
                overdrift_us: state.tracer.overdrift(),
                time_base_corrected: corrected,
            });
        }

        corrected
    }

    /// Tracks the packet timestamps of the data path across the 32-bit wraparound.
    ///
    /// Returns true when the time base was moved past the wrap.
    pub fn update_wraparound_base(&self, timestamp: u32) -> bool {
        let mut state = self.state();

        if state.wrap_check {
            if timestamp >= TSBPD_WRAP_PERIOD && timestamp <= TSBPD_WRAP_PERIOD * 2 {
                state.wrap_check = false;
                state.time_base = offset_instant(state.time_base, TIMESTAMP_CARRYOVER);
                debug!("tsbpd wrap period ends with timestamp {}", timestamp);

                return true;
            }

            return false;
        }

        if timestamp > MAX_TIMESTAMP - TSBPD_WRAP_PERIOD {
            state.wrap_check = true;
            debug!("tsbpd wrap period begins with timestamp {}", timestamp);
        }

        false
    }

    fn base_time_locked(state: &TsbpdState, timestamp: u32) -> Instant {
        // Control packets may not update the base, the whole [0, 2 * period] range is post-wrap
        if state.wrap_check && timestamp <= TSBPD_WRAP_PERIOD * 2 {
            offset_instant(state.time_base, TIMESTAMP_CARRYOVER)
        } else {
            state.time_base
        }
    }

    pub fn base_time(&self, timestamp: u32) -> Instant {
        Self::base_time_locked(&self.state(), timestamp)
    }

    /// Local time at which the sender produced a packet with the given timestamp.
    pub fn origin_time(&self, timestamp: u32) -> Instant {
        offset_instant(self.base_time(timestamp), timestamp as i64)
    }

    pub fn delivery_time(&self, timestamp: u32) -> Instant {
        let state = self.state();
        let origin = offset_instant(
            Self::base_time_locked(&state, timestamp),
            timestamp as i64,
        );

        offset_instant(origin + state.delay, state.tracer.drift())
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn wrap_check(&self) -> bool {
        self.state().wrap_check
    }

    pub fn delay(&self) -> Duration {
        self.state().delay
    }

    pub fn drift(&self) -> i64 {
        self.state().tracer.drift()
    }

    pub fn overdrift(&self) -> i64 {
        self.state().tracer.overdrift()
    }
}

impl std::fmt::Debug for TsbpdTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsbpdTime")
            .field("state", &*self.state())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
