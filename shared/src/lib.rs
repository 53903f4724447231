use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Edge length of one map tile in world units.
pub const TILE_SIZE: f32 = 16.0;
/// Longest chat line the server accepts from a client.
pub const MAX_CHAT_LEN: usize = 50;
/// Close code sent by a peer that ends the session on purpose.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Error reason the server sends when the requested name is already playing.
pub const REASON_NAME_TAKEN: &str = "name_taken";

pub type TileCode = u32;

/// Messages sent from the client to the server.
///
/// Encoded as JSON text frames tagged by a `type` field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    PlayerJoinRequest { name: String },
    PlayerMove { x: f32, y: f32 },
    ActionTill { tile: TileCoord },
    ActionDropFood { pos: Position },
    PlayerChat { text: String },
    RequestZoneRefresh,
}

impl ClientMessage {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages pushed from the server to the client.
///
/// Tags the client does not know decode to [`ServerMessage::Unknown`] so that
/// newer servers never break older clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinSuccess,
    Error {
        reason: String,
    },
    WorldState {
        player_id: String,
        world: WorldPayload,
    },
    WorldReset {
        world: WorldPayload,
    },
    ZoneRefresh {
        #[serde(default)]
        player_id: Option<String>,
        world: WorldPayload,
    },
    PlayerJoined {
        player_id: String,
        data: PlayerData,
    },
    PlayerMoved {
        player_id: String,
        data: PlayerData,
    },
    PlayerChatted {
        player_id: String,
        text: String,
    },
    PlayerLeft {
        player_id: String,
    },
    FaunaSpawned {
        fauna_id: String,
        data: FaunaData,
    },
    FaunaMoved {
        fauna_id: String,
        data: FaunaData,
    },
    FaunaStageChanged {
        fauna_id: String,
        data: FaunaData,
    },
    FaunaDied {
        fauna_id: String,
        data: FaunaData,
    },
    FaunaRemoved {
        fauna_id: String,
    },
    FoodSpawned {
        food_id: String,
        data: FoodData,
    },
    FoodRemoved {
        food_id: String,
    },
    TileUpdated {
        tile: TileUpdate,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::JoinSuccess => "join_success",
            ServerMessage::Error { .. } => "error",
            ServerMessage::WorldState { .. } => "world_state",
            ServerMessage::WorldReset { .. } => "world_reset",
            ServerMessage::ZoneRefresh { .. } => "zone_refresh",
            ServerMessage::PlayerJoined { .. } => "player_joined",
            ServerMessage::PlayerMoved { .. } => "player_moved",
            ServerMessage::PlayerChatted { .. } => "player_chatted",
            ServerMessage::PlayerLeft { .. } => "player_left",
            ServerMessage::FaunaSpawned { .. } => "fauna_spawned",
            ServerMessage::FaunaMoved { .. } => "fauna_moved",
            ServerMessage::FaunaStageChanged { .. } => "fauna_stage_changed",
            ServerMessage::FaunaDied { .. } => "fauna_died",
            ServerMessage::FaunaRemoved { .. } => "fauna_removed",
            ServerMessage::FoodSpawned { .. } => "food_spawned",
            ServerMessage::FoodRemoved { .. } => "food_removed",
            ServerMessage::TileUpdated { .. } => "tile_updated",
            ServerMessage::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Position, alpha: f32) -> Position {
        Position {
            x: self.x + (other.x - self.x) * alpha,
            y: self.y + (other.y - self.y) * alpha,
        }
    }

    /// Map tile that contains this position.
    pub fn tile(&self) -> TileCoord {
        TileCoord {
            x: (self.x / TILE_SIZE).floor() as i32,
            y: (self.y / TILE_SIZE).floor() as i32,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TileUpdate {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub tile_type: TileCode,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerData {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub name: Option<String>,
}

impl PlayerData {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GrowthStage {
    Infant,
    Young,
    #[default]
    Adult,
    Elderly,
}

/// Server-side fauna record. Only the fields the client renders are kept;
/// simulation bookkeeping (age, goals, timers) is skipped on decode.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FaunaData {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub stage: GrowthStage,
    #[serde(default)]
    pub is_dead: bool,
}

impl FaunaData {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FoodData {
    pub x: f32,
    pub y: f32,
}

impl FoodData {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Complete description of a zone: tile map plus every live entity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct WorldPayload {
    /// Row-major tile codes, `map[y][x]`.
    #[serde(default)]
    pub map: Vec<Vec<TileCode>>,
    #[serde(default)]
    pub players: HashMap<String, PlayerData>,
    #[serde(default)]
    pub fauna: HashMap<String, FaunaData>,
    #[serde(default)]
    pub food: HashMap<String, FoodData>,
}
