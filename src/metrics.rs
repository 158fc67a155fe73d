//! Gateway metrics
//!
//! Cheap atomic counters recorded on the hot paths, snapshot-able into a
//! serializable struct for logging or export. Counters only; the active
//! session gauge comes from the session manager itself.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide gateway counters.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_rejected: AtomicU64,
    sessions_expired: AtomicU64,
    backends_initialized: AtomicU64,
    backend_init_failures: AtomicU64,
    backend_reinits: AtomicU64,
    backend_reinit_failures: AtomicU64,
    calls_routed: AtomicU64,
    call_failures: AtomicU64,
    /// Cumulative backend init latency, for a cheap mean without histograms.
    backend_init_millis: AtomicU64,
    call_millis: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_expired(&self) {
        self.sessions_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_init(&self, success: bool, elapsed_ms: u64) {
        if success {
            self.backends_initialized.fetch_add(1, Ordering::Relaxed);
            self.backend_init_millis
                .fetch_add(elapsed_ms, Ordering::Relaxed);
        } else {
            self.backend_init_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_backend_reinit(&self, success: bool) {
        if success {
            self.backend_reinits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.backend_reinit_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_call(&self, success: bool, elapsed_ms: u64) {
        if success {
            self.calls_routed.fetch_add(1, Ordering::Relaxed);
            self.call_millis.fetch_add(elapsed_ms, Ordering::Relaxed);
        } else {
            self.call_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            backends_initialized: self.backends_initialized.load(Ordering::Relaxed),
            backend_init_failures: self.backend_init_failures.load(Ordering::Relaxed),
            backend_reinits: self.backend_reinits.load(Ordering::Relaxed),
            backend_reinit_failures: self.backend_reinit_failures.load(Ordering::Relaxed),
            calls_routed: self.calls_routed.load(Ordering::Relaxed),
            call_failures: self.call_failures.load(Ordering::Relaxed),
            backend_init_millis: self.backend_init_millis.load(Ordering::Relaxed),
            call_millis: self.call_millis.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_rejected: u64,
    pub sessions_expired: u64,
    pub backends_initialized: u64,
    pub backend_init_failures: u64,
    pub backend_reinits: u64,
    pub backend_reinit_failures: u64,
    pub calls_routed: u64,
    pub call_failures: u64,
    pub backend_init_millis: u64,
    pub call_millis: u64,
}

impl MetricsSnapshot {
    /// Mean backend initialization latency in milliseconds.
    pub fn avg_backend_init_ms(&self) -> f64 {
        if self.backends_initialized == 0 {
            0.0
        } else {
            self.backend_init_millis as f64 / self.backends_initialized as f64
        }
    }

    /// Mean successful call latency in milliseconds.
    pub fn avg_call_ms(&self) -> f64 {
        if self.calls_routed == 0 {
            0.0
        } else {
            self.call_millis as f64 / self.calls_routed as f64
        }
    }

    /// Fraction of calls that succeeded, 0.0 to 1.0.
    pub fn call_success_rate(&self) -> f64 {
        let total = self.calls_routed + self.call_failures;
        if total == 0 {
            1.0
        } else {
            self.calls_routed as f64 / total as f64
        }
    }
}
