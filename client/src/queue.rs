//! FIFO buffer between network arrival and the per-tick world update

use shared::ServerMessage;
use std::collections::VecDeque;

/// Parsed server events waiting for the next tick.
///
/// Unbounded and strictly ordered. Nothing is coalesced or reordered, since
/// an entity's create, update and remove must be applied in arrival order.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<ServerMessage>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ServerMessage) {
        self.events.push_back(event);
    }

    /// Removes and returns every queued event in arrival order.
    pub fn drain_all(&mut self) -> Vec<ServerMessage> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left(id: &str) -> ServerMessage {
        ServerMessage::PlayerLeft {
            player_id: id.to_string(),
        }
    }

    #[test]
    fn test_queue_starts_empty() {
        let mut queue = EventQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut queue = EventQueue::new();
        queue.push(left("a"));
        queue.push(ServerMessage::JoinSuccess);
        queue.push(left("b"));
        queue.push(left("a"));
        assert_eq!(queue.len(), 4);

        let drained = queue.drain_all();
        assert_eq!(
            drained,
            vec![left("a"), ServerMessage::JoinSuccess, left("b"), left("a")]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_after_drain() {
        let mut queue = EventQueue::new();
        queue.push(left("a"));
        queue.drain_all();
        queue.push(left("b"));
        assert_eq!(queue.drain_all(), vec![left("b")]);
    }
}
