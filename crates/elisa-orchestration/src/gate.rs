//! The single interaction slot: human gates and mid-task questions.
//!
//! A session holds at most one pending interaction. Opening a second gate
//! or question while one is pending is refused rather than queued; the
//! orchestrator is responsible for never firing two at once, and the
//! transport gets a clean error if it races.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Response delivered to a pending human gate.
#[derive(Debug, Clone, PartialEq)]
pub struct GateResponse {
    /// Whether the approver let the session proceed.
    pub approved: bool,
    /// Feedback; required for rejections that should spawn a revision.
    pub feedback: Option<String>,
}

/// Errors from slot operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SlotError {
    /// A gate or question is already pending.
    #[error("an interaction is already pending for this session")]
    Occupied,
    /// No gate is pending.
    #[error("no gate is awaiting a response")]
    NoPendingGate,
    /// No question is pending for the given task.
    #[error("no question is awaiting an answer for task '{0}'")]
    NoPendingQuestion(String),
}

enum Pending {
    Gate { tx: oneshot::Sender<GateResponse> },
    Question { task_id: String, tx: oneshot::Sender<Value> },
}

/// Shared handle to a session's interaction slot.
#[derive(Clone)]
pub struct InteractionSlot {
    inner: Arc<Mutex<Option<Pending>>>,
}

impl InteractionSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(None)) }
    }

    /// Whether an interaction is pending.
    pub fn is_pending(&self) -> bool {
        self.inner.lock().expect("slot lock poisoned").is_some()
    }

    /// Open a human gate. Fails when any interaction is already pending.
    pub fn open_gate(&self) -> Result<oneshot::Receiver<GateResponse>, SlotError> {
        let mut slot = self.inner.lock().expect("slot lock poisoned");
        if slot.is_some() {
            return Err(SlotError::Occupied);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(Pending::Gate { tx });
        debug!("human gate opened");
        Ok(rx)
    }

    /// Deliver a gate response from the transport.
    pub fn respond_gate(&self, response: GateResponse) -> Result<(), SlotError> {
        let mut slot = self.inner.lock().expect("slot lock poisoned");
        match slot.take() {
            Some(Pending::Gate { tx }) => {
                // A dropped receiver means the waiter was cancelled; that is
                // not the responder's problem.
                let _ = tx.send(response);
                Ok(())
            }
            other => {
                *slot = other;
                Err(SlotError::NoPendingGate)
            }
        }
    }

    /// Open a mid-task question. Fails when any interaction is pending.
    pub fn open_question(&self, task_id: String) -> Result<oneshot::Receiver<Value>, SlotError> {
        let mut slot = self.inner.lock().expect("slot lock poisoned");
        if slot.is_some() {
            return Err(SlotError::Occupied);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(Pending::Question { task_id, tx });
        debug!("mid-task question opened");
        Ok(rx)
    }

    /// Deliver question answers from the transport.
    pub fn respond_question(&self, task_id: &str, answers: Value) -> Result<(), SlotError> {
        let mut slot = self.inner.lock().expect("slot lock poisoned");
        match slot.take() {
            Some(Pending::Question { task_id: pending_id, tx }) if pending_id == task_id => {
                let _ = tx.send(answers);
                Ok(())
            }
            other => {
                *slot = other;
                Err(SlotError::NoPendingQuestion(task_id.to_string()))
            }
        }
    }

    /// Clear a question that timed out or was cancelled, if still pending.
    pub fn abandon_question(&self, task_id: &str) {
        let mut slot = self.inner.lock().expect("slot lock poisoned");
        if let Some(Pending::Question { task_id: pending_id, .. }) = slot.as_ref() {
            if pending_id == task_id {
                *slot = None;
            }
        }
    }

    /// Resolve any pending interaction with a synthetic cancellation by
    /// dropping its reply channel.
    pub fn cancel_pending(&self) {
        let mut slot = self.inner.lock().expect("slot lock poisoned");
        if slot.take().is_some() {
            debug!("pending interaction cancelled");
        }
    }
}

impl Default for InteractionSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_round_trip() {
        let slot = InteractionSlot::new();
        let rx = slot.open_gate().unwrap();
        assert!(slot.is_pending());

        slot.respond_gate(GateResponse { approved: false, feedback: Some("bigger".into()) })
            .unwrap();
        let response = rx.await.unwrap();
        assert!(!response.approved);
        assert_eq!(response.feedback.as_deref(), Some("bigger"));
        assert!(!slot.is_pending());
    }

    #[test]
    fn second_interaction_is_refused() {
        let slot = InteractionSlot::new();
        let _rx = slot.open_gate().unwrap();
        assert_eq!(slot.open_gate().unwrap_err(), SlotError::Occupied);
        assert_eq!(slot.open_question("t1".into()).unwrap_err(), SlotError::Occupied);
    }

    #[test]
    fn responding_with_nothing_pending_fails() {
        let slot = InteractionSlot::new();
        let err = slot.respond_gate(GateResponse { approved: true, feedback: None }).unwrap_err();
        assert_eq!(err, SlotError::NoPendingGate);
    }

    #[test]
    fn question_task_id_must_match() {
        let slot = InteractionSlot::new();
        let _rx = slot.open_question("t1".into()).unwrap();
        let err = slot.respond_question("t2", serde_json::json!({})).unwrap_err();
        assert_eq!(err, SlotError::NoPendingQuestion("t2".into()));
        // The original question is still pending.
        assert!(slot.is_pending());
        slot.respond_question("t1", serde_json::json!({"a": 1})).unwrap();
    }

    #[tokio::test]
    async fn cancel_drops_the_reply_channel() {
        let slot = InteractionSlot::new();
        let rx = slot.open_gate().unwrap();
        slot.cancel_pending();
        assert!(rx.await.is_err());
        assert!(!slot.is_pending());
    }
}
