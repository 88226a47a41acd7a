//! The session phase cell.
//!
//! Phases only ever move forward. The idle→planning edge is the start race:
//! it is a compare-and-swap so that exactly one of any number of concurrent
//! starters wins. A failed validation rewinds planning→idle so a corrected
//! spec can retry; that is the only backward edge.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use elisa_types::{OrchestratorError, SessionPhase};

/// Atomic cell holding the session phase.
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    /// New cell in the idle phase.
    pub fn new() -> Self {
        Self(AtomicU8::new(SessionPhase::Idle as u8))
    }

    /// Current phase.
    pub fn load(&self) -> SessionPhase {
        SessionPhase::from_u8(self.0.load(Ordering::SeqCst)).unwrap_or(SessionPhase::Done)
    }

    /// Claim the idle→planning edge. Exactly one concurrent caller wins;
    /// the rest observe `AlreadyStarted`.
    pub fn try_begin_planning(&self) -> Result<(), OrchestratorError> {
        self.0
            .compare_exchange(
                SessionPhase::Idle as u8,
                SessionPhase::Planning as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|_| OrchestratorError::AlreadyStarted)
    }

    /// Rewind planning→idle after a validation failure so a valid retry
    /// can proceed. No-op from any other phase.
    pub fn reset_to_idle(&self) {
        let _ = self.0.compare_exchange(
            SessionPhase::Planning as u8,
            SessionPhase::Idle as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Advance to a later phase. Backward moves are ignored so that a late
    /// worker cannot resurrect a session that already reached done.
    pub fn advance(&self, to: SessionPhase) {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if current >= to as u8 {
                return;
            }
            match self.0.compare_exchange(current, to as u8, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    debug!(phase = to.as_str(), "phase advanced");
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether the session is terminal.
    pub fn is_done(&self) -> bool {
        self.load() == SessionPhase::Done
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}
