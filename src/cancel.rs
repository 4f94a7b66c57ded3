//! Cooperative cancellation
//!
//! A first interrupt asks workers to stop taking new jobs; jobs already
//! running finish. A second interrupt exits immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Shared cancellation flag, cheap to clone into workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    signals: AtomicU8,
}

/// What the interrupt handler should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Stop dispatching, let running jobs finish
    StopDispatch,
    /// Exit now
    ImmediateExit,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Record one interrupt.
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.inner.signals.fetch_add(1, Ordering::SeqCst);
        self.cancel();
        if count == 0 {
            SignalAction::StopDispatch
        } else {
            SignalAction::ImmediateExit
        }
    }

    /// Route SIGINT/SIGTERM to this token. Call once per process.
    pub fn install_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || match token.handle_signal() {
            SignalAction::StopDispatch => {
                tracing::warn!("interrupt received, finishing running jobs");
            }
            SignalAction::ImmediateExit => {
                tracing::warn!("second interrupt received, exiting");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
        })
    }
}
