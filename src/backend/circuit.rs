//! Per-backend circuit breaker
//!
//! Guards the credential-recovery path: once a backend rejects several
//! recreation attempts in a row, further attempts are refused until a
//! cooldown elapses, so a revoked credential cannot produce a hot retry loop.

use crate::error::{BackendError, BackendResult};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Attempts flow normally.
    Closed,
    /// Attempts are refused until the cooldown elapses.
    Open,
    /// Cooldown elapsed; the next attempt is a probe.
    HalfOpen,
}

/// Consecutive-failure breaker for one backend.
///
/// Trips open after `threshold` consecutive failures. After `cooldown` the
/// next attempt is allowed through as a probe; its outcome either closes the
/// circuit or re-opens it for another full cooldown. Recreation attempts are
/// serialized per backend by the caller, so at most one probe is in flight.
pub struct CircuitBreaker {
    backend: String,
    threshold: u32,
    cooldown: Duration,
    created: Instant,
    failures: AtomicU32,
    /// Milliseconds since `created` at which the open period ends; 0 = closed.
    open_until_ms: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            backend: backend.into(),
            threshold: threshold.max(1),
            cooldown,
            created: Instant::now(),
            failures: AtomicU32::new(0),
            open_until_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    pub fn state(&self) -> CircuitState {
        let deadline = self.open_until_ms.load(Ordering::Acquire);
        if deadline == 0 {
            CircuitState::Closed
        } else if self.now_ms() >= deadline {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Gate an attempt. `Err(CircuitOpen)` while the cooldown is running;
    /// `Ok` when closed or when a half-open probe may proceed.
    pub fn check(&self) -> BackendResult<()> {
        let deadline = self.open_until_ms.load(Ordering::Acquire);
        if deadline == 0 {
            return Ok(());
        }
        let now = self.now_ms();
        if now >= deadline {
            return Ok(());
        }
        Err(BackendError::CircuitOpen {
            backend: self.backend.clone(),
            cooldown_secs: (deadline - now).div_ceil(1000),
        })
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.open_until_ms.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold {
            self.open_until_ms
                .store(self.now_ms() + self.cooldown.as_millis() as u64, Ordering::Release);
            tracing::warn!(
                backend = %self.backend,
                consecutive_failures = failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
        }
    }
}
