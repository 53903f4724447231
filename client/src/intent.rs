//! Translates player intents into outbound protocol messages

use log::debug;
use shared::{ClientMessage, Position, MAX_CHAT_LEN};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Till,
    DropFood,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Move { x: f32, y: f32 },
    Act(Action),
    Chat(String),
    RefreshZone,
}

/// Stateful encoder. The only state is the move throttle.
///
/// A throttled move is not lost: the latest one is held and handed out by
/// [`IntentEncoder::flush`] once the interval has passed.
#[derive(Debug)]
pub struct IntentEncoder {
    move_interval: Duration,
    last_move_sent: Option<Instant>,
    pending_move: Option<Position>,
}

impl IntentEncoder {
    pub fn new(move_interval: Duration) -> Self {
        Self {
            move_interval,
            last_move_sent: None,
            pending_move: None,
        }
    }

    /// Returns the message to send, or `None` if the intent produces
    /// nothing right now. `own_position` is the local player's current
    /// position, if one exists.
    pub fn encode(
        &mut self,
        intent: Intent,
        own_position: Option<Position>,
        now: Instant,
    ) -> Option<ClientMessage> {
        match intent {
            Intent::Move { x, y } => {
                self.pending_move = Some(Position::new(x, y));
                self.flush(now)
            }
            Intent::Act(action) => {
                let Some(position) = own_position else {
                    debug!("Dropping {:?}: no local player", action);
                    return None;
                };
                Some(match action {
                    Action::Till => ClientMessage::ActionTill {
                        tile: position.tile(),
                    },
                    Action::DropFood => ClientMessage::ActionDropFood { pos: position },
                })
            }
            Intent::Chat(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(ClientMessage::PlayerChat {
                    text: text.chars().take(MAX_CHAT_LEN).collect(),
                })
            }
            Intent::RefreshZone => Some(ClientMessage::RequestZoneRefresh),
        }
    }

    /// Releases the held move if the throttle allows it.
    pub fn flush(&mut self, now: Instant) -> Option<ClientMessage> {
        let position = self.pending_move?;
        if let Some(last) = self.last_move_sent {
            if now.saturating_duration_since(last) < self.move_interval {
                return None;
            }
        }
        self.pending_move = None;
        self.last_move_sent = Some(now);
        Some(ClientMessage::PlayerMove {
            x: position.x,
            y: position.y,
        })
    }

    pub fn has_pending_move(&self) -> bool {
        self.pending_move.is_some()
    }

    pub fn reset(&mut self) {
        self.last_move_sent = None;
        self.pending_move = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::TileCoord;

    fn encoder() -> IntentEncoder {
        IntentEncoder::new(Duration::from_millis(100))
    }

    #[test]
    fn test_move_is_throttled() {
        let now = Instant::now();
        let mut encoder = encoder();
        let step = |x| Intent::Move { x, y: 0.0 };

        assert_eq!(
            encoder.encode(step(1.0), None, now),
            Some(ClientMessage::PlayerMove { x: 1.0, y: 0.0 })
        );
        assert_eq!(encoder.encode(step(2.0), None, now + Duration::from_millis(50)), None);
        assert_eq!(
            encoder.encode(step(3.0), None, now + Duration::from_millis(100)),
            Some(ClientMessage::PlayerMove { x: 3.0, y: 0.0 })
        );
    }

    #[test]
    fn test_throttled_move_is_flushed_later() {
        let now = Instant::now();
        let mut encoder = encoder();
        assert!(encoder.flush(now).is_none());

        encoder.encode(Intent::Move { x: 10.0, y: 0.0 }, None, now);
        let later = now + Duration::from_millis(50);
        assert_eq!(encoder.encode(Intent::Move { x: 20.0, y: 0.0 }, None, later), None);
        assert!(encoder.has_pending_move());

        assert_eq!(encoder.flush(now + Duration::from_millis(80)), None);
        assert_eq!(
            encoder.flush(now + Duration::from_millis(100)),
            Some(ClientMessage::PlayerMove { x: 20.0, y: 0.0 })
        );
        assert!(!encoder.has_pending_move());
        assert_eq!(encoder.flush(now + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_till_uses_tile_coordinates() {
        let mut encoder = encoder();
        let message = encoder.encode(
            Intent::Act(Action::Till),
            Some(Position::new(33.5, 15.9)),
            Instant::now(),
        );
        assert_eq!(
            message,
            Some(ClientMessage::ActionTill {
                tile: TileCoord { x: 2, y: 0 }
            })
        );
    }

    #[test]
    fn test_drop_food_uses_position() {
        let mut encoder = encoder();
        let pos = Position::new(40.0, 41.0);
        assert_eq!(
            encoder.encode(Intent::Act(Action::DropFood), Some(pos), Instant::now()),
            Some(ClientMessage::ActionDropFood { pos })
        );
    }

    #[test]
    fn test_actions_need_local_player() {
        let mut encoder = encoder();
        let now = Instant::now();
        assert_eq!(encoder.encode(Intent::Act(Action::Till), None, now), None);
        assert_eq!(encoder.encode(Intent::Act(Action::DropFood), None, now), None);
    }

    #[test]
    fn test_chat_is_trimmed_and_truncated() {
        let mut encoder = encoder();
        let now = Instant::now();
        assert_eq!(encoder.encode(Intent::Chat("   ".to_string()), None, now), None);
        assert_eq!(
            encoder.encode(Intent::Chat("  hi there ".to_string()), None, now),
            Some(ClientMessage::PlayerChat {
                text: "hi there".to_string()
            })
        );

        let long = "x".repeat(80);
        match encoder.encode(Intent::Chat(long), None, now) {
            Some(ClientMessage::PlayerChat { text }) => assert_eq!(text.len(), MAX_CHAT_LEN),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_refresh() {
        let mut encoder = encoder();
        assert_eq!(
            encoder.encode(Intent::RefreshZone, None, Instant::now()),
            Some(ClientMessage::RequestZoneRefresh)
        );
    }
}
