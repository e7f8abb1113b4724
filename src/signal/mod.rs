//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first signal the root [`CancelToken`] is cancelled: every remote
//! command in flight observes it at its next suspension point, the affected
//! targets fail with `Cancelled`, and nothing further is committed. Staged
//! files stay on disk.
//!
//! On a second signal the process exits immediately with code 80.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use gorelease_agent::CancelToken;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel in-flight work
    InitiateCancellation,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Signal count bound to the run's root cancel token
#[derive(Debug)]
pub struct SignalState {
    cancel: CancelToken,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            signal_count: AtomicU8::new(0),
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record one signal and cancel on the first
    pub fn handle_signal(&self) -> SignalAction {
        let count = self
            .signal_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_add(1)))
            .unwrap_or(u8::MAX);

        match count {
            0 => {
                self.cancel.cancel();
                SignalAction::InitiateCancellation
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Installs the process-wide handler
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            state: Arc::new(SignalState::new(cancel)),
        }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the SIGINT/SIGTERM handler; call once at startup
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                tracing::warn!("interrupt received, cancelling in-flight builds (again to exit now)");
            }
            SignalAction::ImmediateExit => {
                tracing::error!("second interrupt, exiting");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}
