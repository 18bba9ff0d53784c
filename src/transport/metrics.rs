use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide transport counters.
pub(crate) struct Metrics;

static SENT_FRAMES: AtomicU64 = AtomicU64::new(0);
static RECEIVED_FRAMES: AtomicU64 = AtomicU64::new(0);
static UNSOLICITED_FRAMES: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNT: AtomicU64 = AtomicU64::new(0);
static OPENED_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static COMPLETED_EXCHANGES: AtomicU64 = AtomicU64::new(0);
static EXCHANGE_LATENCY_TOTAL_NS: AtomicU64 = AtomicU64::new(0);
static EXCHANGE_LATENCY_MAX_NS: AtomicU64 = AtomicU64::new(0);

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

/// Direction of frame flow for counting.
#[derive(Clone, Copy)]
pub(crate) enum FrameDirection {
    Sent,
    Received,
    Unsolicited,
}

impl Metrics {
    #[inline]
    pub(crate) fn record_frame(direction: FrameDirection) {
        let counter = match direction {
            FrameDirection::Sent => &SENT_FRAMES,
            FrameDirection::Received => &RECEIVED_FRAMES,
            FrameDirection::Unsolicited => &UNSOLICITED_FRAMES,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error() {
        ERROR_COUNT.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_open() {
        OPENED_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_close() {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_exchange(duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        COMPLETED_EXCHANGES.fetch_add(1, Ordering::Relaxed);
        EXCHANGE_LATENCY_TOTAL_NS.fetch_add(nanos, Ordering::Relaxed);
        update_max(&EXCHANGE_LATENCY_MAX_NS, nanos);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            sent_frames: SENT_FRAMES.load(Ordering::Relaxed),
            received_frames: RECEIVED_FRAMES.load(Ordering::Relaxed),
            unsolicited_frames: UNSOLICITED_FRAMES.load(Ordering::Relaxed),
            total_errors: ERROR_COUNT.load(Ordering::Relaxed),
            opened_connections: OPENED_CONNECTIONS.load(Ordering::Relaxed),
            active_connections: ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
            completed_exchanges: COMPLETED_EXCHANGES.load(Ordering::Relaxed),
            exchange_latency_total_ns: EXCHANGE_LATENCY_TOTAL_NS.load(Ordering::Relaxed),
            exchange_latency_max_ns: EXCHANGE_LATENCY_MAX_NS.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Read the process-wide transport counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    Metrics::totals()
}

/// Point-in-time copy of the transport counters.
#[allow(missing_docs)]
#[derive(Default, Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub sent_frames: u64,
    pub received_frames: u64,
    /// Frames that arrived with no exchange waiting for them.
    pub unsolicited_frames: u64,
    pub total_errors: u64,
    pub opened_connections: u64,
    pub active_connections: u64,
    pub completed_exchanges: u64,
    pub exchange_latency_total_ns: u64,
    pub exchange_latency_max_ns: u64,
}

impl MetricsSnapshot {
    /// Average request-to-reply latency in microseconds.
    #[must_use]
    pub fn avg_exchange_latency_us(&self) -> Option<u64> {
        if self.completed_exchanges == 0 {
            return None;
        }
        let per_exchange = u128::from(self.exchange_latency_total_ns)
            / (u128::from(self.completed_exchanges) * NANOSECONDS_PER_MICROSECOND);
        Some(u64::try_from(per_exchange).unwrap_or(u64::MAX))
    }
}
