//! Deadline and cancellation control for long computations
//!
//! Bottleneck detection, packet analysis, and valuation can run over large
//! working sets. Callers hand them an [`OpGuard`]; the computation calls
//! [`OpGuard::checkpoint`] between items and aborts with no mutation and no
//! partial ledger entry when the deadline passes or the flag is raised.

use crate::error::{EngineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-operation budget carrying an optional deadline and cancel flag.
#[derive(Debug, Clone)]
pub struct OpGuard {
    op: &'static str,
    deadline: Option<Instant>,
    cancel: Option<CancelFlag>,
}

impl OpGuard {
    /// A guard that never trips.
    pub fn unbounded(op: &'static str) -> Self {
        Self {
            op,
            deadline: None,
            cancel: None,
        }
    }

    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Fail fast if the operation should stop.
    pub fn checkpoint(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.is_cancelled() {
                return Err(EngineError::Cancelled(self.op));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::DeadlineExceeded(self.op));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_guard_never_trips() {
        let guard = OpGuard::unbounded("test");
        for _ in 0..100 {
            assert!(guard.checkpoint().is_ok());
        }
    }

    #[test]
    fn test_cancel_flag_trips_guard() {
        let flag = CancelFlag::new();
        let guard = OpGuard::unbounded("analysis").with_cancel(flag.clone());
        assert!(guard.checkpoint().is_ok());
        flag.cancel();
        let err = guard.checkpoint().unwrap_err();
        assert_eq!(err.code(), "cancelled");
    }

    #[test]
    fn test_expired_deadline_trips_guard() {
        let guard = OpGuard::unbounded("valuation").with_deadline(Duration::from_nanos(1));
        std::thread::sleep(Duration::from_millis(2));
        let err = guard.checkpoint().unwrap_err();
        assert_eq!(err.code(), "deadline_exceeded");
    }
}
