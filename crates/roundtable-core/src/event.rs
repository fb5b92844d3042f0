use crate::types::WorkflowEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::Interrupted {
            session_id: "s1".into(),
            node: "human_feedback".into(),
        });
        match rx.recv().await.unwrap() {
            WorkflowEvent::Interrupted { node, .. } => assert_eq!(node, "human_feedback"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(WorkflowEvent::RunComplete {
            session_id: "s1".into(),
            steps: 3,
        });
    }
}
