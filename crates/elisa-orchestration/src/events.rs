//! The session event stream.
//!
//! One writer side (the orchestrator and its workers, all funneled through
//! cloned handles of the same bounded channel) and one reader side (the
//! transport's session consumer). Delivery is FIFO; a slow consumer blocks
//! the writer once the channel fills, which is the back-pressure contract.
//! Events carry no timestamps; the transport adds them.

use tokio::sync::mpsc;
use tracing::warn;

use elisa_types::BuildEvent;

/// Bounded capacity of a session's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Writer handle for a session's event stream.
#[derive(Clone)]
pub struct EventStream {
    tx: mpsc::Sender<BuildEvent>,
}

impl EventStream {
    /// Create a stream and its single consumer endpoint.
    pub fn channel() -> (Self, mpsc::Receiver<BuildEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Emit one event in order.
    ///
    /// Blocks when the consumer is behind. A dropped consumer is tolerated
    /// so a disappearing client cannot wedge an in-flight session.
    pub async fn emit(&self, event: BuildEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("event consumer dropped; event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (stream, mut rx) = EventStream::channel();
        stream.emit(BuildEvent::PlanningStarted).await;
        stream.emit(BuildEvent::TaskStarted { task_id: "t1".into(), agent_name: "amy".into() }).await;
        stream.emit(BuildEvent::TaskCompleted { task_id: "t1".into() }).await;

        assert_eq!(rx.recv().await.unwrap(), BuildEvent::PlanningStarted);
        assert!(matches!(rx.recv().await.unwrap(), BuildEvent::TaskStarted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), BuildEvent::TaskCompleted { .. }));
    }

    #[tokio::test]
    async fn dropped_consumer_does_not_panic() {
        let (stream, rx) = EventStream::channel();
        drop(rx);
        stream.emit(BuildEvent::SessionComplete).await;
    }
}
