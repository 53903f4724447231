//! Client policy constants gathered in one place

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000/ws";

/// Easing curve applied to a motion transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    Linear,
    QuadOut,
    CubicOut,
}

impl Easing {
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::QuadOut => 1.0 - (1.0 - t).powi(2),
            Easing::CubicOut => 1.0 - (1.0 - t).powi(3),
        }
    }
}

/// How a remote entity glides toward a new server position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    /// Moves shorter than this are applied immediately.
    pub snap_distance: f32,
    /// Transition time per world unit travelled, before clamping.
    pub ms_per_unit: f32,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub easing: Easing,
}

impl MotionProfile {
    pub fn duration_for(&self, distance: f32) -> Duration {
        let secs = distance * self.ms_per_unit / 1000.0;
        if secs.is_nan() {
            return self.max_duration;
        }
        // Clamp before converting; huge or infinite values would not fit
        let secs = secs.clamp(
            self.min_duration.as_secs_f32(),
            self.max_duration.as_secs_f32(),
        );
        Duration::try_from_secs_f32(secs)
            .unwrap_or(self.max_duration)
            .clamp(self.min_duration, self.max_duration)
    }

    pub fn player() -> Self {
        Self {
            snap_distance: 0.5,
            ms_per_unit: 0.0,
            min_duration: Duration::from_millis(150),
            max_duration: Duration::from_millis(150),
            easing: Easing::QuadOut,
        }
    }

    pub fn fauna() -> Self {
        Self {
            snap_distance: 5.0,
            ms_per_unit: 20.0,
            min_duration: Duration::from_millis(1000),
            max_duration: Duration::from_millis(3000),
            easing: Easing::CubicOut,
        }
    }
}

/// World reconciliation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    /// Maximum live fauna; spawns beyond it are discarded.
    pub max_fauna: Option<usize>,
    pub chat_bubble_ttl: Duration,
    pub player_motion: MotionProfile,
    pub fauna_motion: MotionProfile,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_fauna: Some(1),
            chat_bubble_ttl: Duration::from_millis(4000),
            player_motion: MotionProfile::player(),
            fauna_motion: MotionProfile::fauna(),
        }
    }
}

/// Connection lifecycle settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// How long an error may go unanswered by a close before the channel
    /// is treated as abnormally closed.
    pub error_close_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(3),
            error_close_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    pub tick_rate: u32,
    pub move_send_interval: Duration,
    /// How often the headless status line is logged.
    pub status_interval: Duration,
    pub identity_file: Option<PathBuf>,
    pub connection: ConnectionConfig,
    pub world: WorldConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            tick_rate: 60,
            move_send_interval: Duration::from_millis(100),
            status_interval: Duration::from_secs(5),
            identity_file: None,
            connection: ConnectionConfig::default(),
            world: WorldConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }
}
