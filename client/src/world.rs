//! Local mirror of the server-authoritative world
//!
//! The [`World`] folds ordered server events into per-kind entity tables and
//! a tile grid. It is only ever mutated from the tick loop: network arrival
//! goes through the connection manager's queue, and the presentation layer
//! reads through the accessors below.
//!
//! Every handler treats a missing entity as a no-op. Removals racing with
//! in-flight updates are normal, not faults.

use crate::config::{Easing, MotionProfile, WorldConfig};
use log::{debug, info};
use shared::{
    FaunaData, FoodData, GrowthStage, PlayerData, Position, ServerMessage, TileCode, TileUpdate,
    WorldPayload,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Fauna,
    Food,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityBody {
    Player {
        display_name: Option<String>,
    },
    Fauna {
        species: Option<String>,
        growth_stage: GrowthStage,
        is_deceased: bool,
    },
    Food,
}

impl EntityBody {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityBody::Player { .. } => EntityKind::Player,
            EntityBody::Fauna { .. } => EntityKind::Fauna,
            EntityBody::Food => EntityKind::Food,
        }
    }
}

impl From<&PlayerData> for EntityBody {
    fn from(data: &PlayerData) -> Self {
        EntityBody::Player {
            display_name: data.name.clone(),
        }
    }
}

impl From<&FaunaData> for EntityBody {
    fn from(data: &FaunaData) -> Self {
        EntityBody::Fauna {
            species: data.kind.clone(),
            growth_stage: data.stage,
            is_deceased: data.is_dead,
        }
    }
}

impl From<&FoodData> for EntityBody {
    fn from(_: &FoodData) -> Self {
        EntityBody::Food
    }
}

/// An eased transition between two positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
    pub from: Position,
    pub to: Position,
    pub started_at: Instant,
    pub duration: Duration,
    pub easing: Easing,
}

impl Motion {
    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    pub fn sample(&self, now: Instant) -> Position {
        let t = self.easing.apply(self.progress(now));
        self.from.lerp(&self.to, t)
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechBubble {
    pub text: String,
    pub expires_at: Instant,
}

/// How the presentation layer should draw a creature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaunaAppearance {
    pub scale: f32,
    pub rotation_degrees: f32,
    pub alpha: f32,
}

impl FaunaAppearance {
    pub fn for_state(stage: GrowthStage, is_deceased: bool) -> Self {
        let scale = match stage {
            GrowthStage::Infant => 0.25,
            GrowthStage::Young => 0.5,
            GrowthStage::Adult => 1.0,
            GrowthStage::Elderly => 1.5,
        };
        if is_deceased {
            Self {
                scale,
                rotation_degrees: 90.0,
                alpha: 0.7,
            }
        } else {
            Self {
                scale,
                rotation_degrees: 0.0,
                alpha: 1.0,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldEntity {
    pub id: String,
    /// Displayed position. Follows `motion` while one is active.
    pub position: Position,
    pub body: EntityBody,
    pub motion: Option<Motion>,
    pub speech: Option<SpeechBubble>,
}

impl WorldEntity {
    pub fn new(id: impl Into<String>, position: Position, body: EntityBody) -> Self {
        Self {
            id: id.into(),
            position,
            body,
            motion: None,
            speech: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.body.kind()
    }

    /// Where the entity is heading, or where it is if not moving.
    pub fn target_position(&self) -> Position {
        self.motion.as_ref().map(|m| m.to).unwrap_or(self.position)
    }

    /// Name tag text. Only players carry one.
    pub fn name_tag(&self) -> Option<&str> {
        match &self.body {
            EntityBody::Player { display_name } => display_name.as_deref(),
            _ => None,
        }
    }

    pub fn speech_text(&self) -> Option<&str> {
        self.speech.as_ref().map(|s| s.text.as_str())
    }

    pub fn fauna_appearance(&self) -> Option<FaunaAppearance> {
        match &self.body {
            EntityBody::Fauna {
                growth_stage,
                is_deceased,
                ..
            } => Some(FaunaAppearance::for_state(*growth_stage, *is_deceased)),
            _ => None,
        }
    }

    fn current_position(&self, now: Instant) -> Position {
        self.motion
            .as_ref()
            .map(|m| m.sample(now))
            .unwrap_or(self.position)
    }

    fn advance(&mut self, now: Instant) {
        if let Some(motion) = &self.motion {
            if motion.is_finished(now) {
                self.position = motion.to;
                self.motion = None;
            } else {
                self.position = motion.sample(now);
            }
        }
        if self.speech.as_ref().is_some_and(|s| now >= s.expires_at) {
            self.speech = None;
        }
    }
}

/// Row-major tile codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    cells: Vec<TileCode>,
}

impl TileGrid {
    /// Builds a grid from `rows[y][x]`. Short rows are padded with zeros.
    pub fn from_rows(rows: &[Vec<TileCode>]) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let height = rows.len();
        let mut cells = vec![0; width * height];
        for (y, row) in rows.iter().enumerate() {
            cells[y * width..y * width + row.len()].copy_from_slice(row);
        }
        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: i32, y: i32) -> Option<TileCode> {
        self.index(x, y).map(|i| self.cells[i])
    }

    /// Returns false if the coordinate lies outside the grid.
    pub fn set(&mut self, x: i32, y: i32, code: TileCode) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i] = code;
                true
            }
            None => false,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &[TileCode]> {
        self.cells.chunks(self.width.max(1)).take(self.height)
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let x = usize::try_from(x).ok()?;
        let y = usize::try_from(y).ok()?;
        (x < self.width && y < self.height).then(|| y * self.width + x)
    }
}

type EntityTable = HashMap<String, WorldEntity>;

#[derive(Debug, Clone, PartialEq)]
pub struct World {
    config: WorldConfig,
    players: EntityTable,
    fauna: EntityTable,
    food: EntityTable,
    tiles: Option<TileGrid>,
    own_entity_id: Option<String>,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        Self {
            config,
            players: HashMap::new(),
            fauna: HashMap::new(),
            food: HashMap::new(),
            tiles: None,
            own_entity_id: None,
        }
    }

    /// Applies one drained batch in arrival order, then advances motion and
    /// decorations. Returns the number of events applied.
    pub fn tick(&mut self, events: Vec<ServerMessage>, now: Instant) -> usize {
        let count = events.len();
        for event in events {
            self.apply(event, now);
        }
        self.advance(now);
        count
    }

    pub fn apply(&mut self, event: ServerMessage, now: Instant) {
        match event {
            ServerMessage::WorldState { player_id, world } => self.rebuild(Some(player_id), world),
            ServerMessage::ZoneRefresh { player_id, world } => self.rebuild(player_id, world),
            ServerMessage::WorldReset { world } => self.rebuild(None, world),

            ServerMessage::PlayerJoined { player_id, data } => {
                if self.is_own(&player_id) {
                    debug!("Ignoring join for own player {}", player_id);
                    return;
                }
                self.spawn(EntityKind::Player, player_id, data.position(), (&data).into());
            }
            ServerMessage::PlayerMoved { player_id, data } => {
                if self.is_own(&player_id) {
                    return;
                }
                self.begin_motion(EntityKind::Player, &player_id, data.position(), now);
            }
            ServerMessage::PlayerChatted { player_id, text } => {
                self.attach_speech(&player_id, text, now)
            }
            ServerMessage::PlayerLeft { player_id } => self.remove(EntityKind::Player, &player_id),

            ServerMessage::FaunaSpawned { fauna_id, data } => self.spawn_fauna(fauna_id, &data),
            ServerMessage::FaunaMoved { fauna_id, data } => {
                self.begin_motion(EntityKind::Fauna, &fauna_id, data.position(), now)
            }
            ServerMessage::FaunaStageChanged { fauna_id, data }
            | ServerMessage::FaunaDied { fauna_id, data } => {
                self.update_fauna_state(&fauna_id, &data)
            }
            ServerMessage::FaunaRemoved { fauna_id } => self.remove(EntityKind::Fauna, &fauna_id),

            ServerMessage::FoodSpawned { food_id, data } => {
                self.spawn(EntityKind::Food, food_id, data.position(), (&data).into())
            }
            ServerMessage::FoodRemoved { food_id } => self.remove(EntityKind::Food, &food_id),

            ServerMessage::TileUpdated { tile } => self.update_tile(tile),

            ServerMessage::JoinSuccess | ServerMessage::Error { .. } => {
                debug!("Lifecycle message reached the world, ignoring")
            }
            ServerMessage::Unknown => {}
        }
    }

    /// Steps every active motion and expires speech bubbles.
    pub fn advance(&mut self, now: Instant) {
        for entity in self
            .players
            .values_mut()
            .chain(self.fauna.values_mut())
            .chain(self.food.values_mut())
        {
            entity.advance(now);
        }
    }

    /// Moves the local player immediately. The only local mutation path;
    /// returns false if there is no local player yet.
    pub fn predict_own_position(&mut self, position: Position) -> bool {
        let Some(id) = &self.own_entity_id else {
            return false;
        };
        match self.players.get_mut(id) {
            Some(entity) => {
                entity.position = position;
                entity.motion = None;
                true
            }
            None => false,
        }
    }

    /// Forgets everything, including which player is local.
    pub fn clear(&mut self) {
        self.players.clear();
        self.fauna.clear();
        self.food.clear();
        self.tiles = None;
        self.own_entity_id = None;
    }

    pub fn players(&self) -> &HashMap<String, WorldEntity> {
        &self.players
    }

    pub fn fauna(&self) -> &HashMap<String, WorldEntity> {
        &self.fauna
    }

    pub fn food(&self) -> &HashMap<String, WorldEntity> {
        &self.food
    }

    pub fn entity(&self, kind: EntityKind, id: &str) -> Option<&WorldEntity> {
        self.table(kind).get(id)
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.table(kind).len()
    }

    pub fn tiles(&self) -> Option<&TileGrid> {
        self.tiles.as_ref()
    }

    pub fn own_entity_id(&self) -> Option<&str> {
        self.own_entity_id.as_deref()
    }

    pub fn own_entity(&self) -> Option<&WorldEntity> {
        self.own_entity_id
            .as_ref()
            .and_then(|id| self.players.get(id))
    }

    fn is_own(&self, id: &str) -> bool {
        self.own_entity_id.as_deref() == Some(id)
    }

    fn table(&self, kind: EntityKind) -> &EntityTable {
        match kind {
            EntityKind::Player => &self.players,
            EntityKind::Fauna => &self.fauna,
            EntityKind::Food => &self.food,
        }
    }

    fn table_mut(&mut self, kind: EntityKind) -> &mut EntityTable {
        match kind {
            EntityKind::Player => &mut self.players,
            EntityKind::Fauna => &mut self.fauna,
            EntityKind::Food => &mut self.food,
        }
    }

    fn profile(&self, kind: EntityKind) -> MotionProfile {
        match kind {
            EntityKind::Fauna => self.config.fauna_motion,
            EntityKind::Player | EntityKind::Food => self.config.player_motion,
        }
    }

    fn rebuild(&mut self, own_id: Option<String>, world: WorldPayload) {
        if let Some(id) = own_id {
            self.own_entity_id = Some(id);
        }
        self.tiles = Some(TileGrid::from_rows(&world.map));

        reconcile(
            &mut self.players,
            world
                .players
                .iter()
                .map(|(id, d)| (id.clone(), (d.position(), EntityBody::from(d))))
                .collect(),
        );
        reconcile(
            &mut self.fauna,
            world
                .fauna
                .iter()
                .map(|(id, d)| (id.clone(), (d.position(), EntityBody::from(d))))
                .collect(),
        );
        reconcile(
            &mut self.food,
            world
                .food
                .iter()
                .map(|(id, d)| (id.clone(), (d.position(), EntityBody::from(d))))
                .collect(),
        );

        debug!(
            "World rebuilt: {} players, {} fauna, {} food",
            self.players.len(),
            self.fauna.len(),
            self.food.len()
        );
    }

    fn spawn(&mut self, kind: EntityKind, id: String, position: Position, body: EntityBody) {
        let table = self.table_mut(kind);
        if table.contains_key(&id) {
            debug!("Duplicate {:?} spawn for {}", kind, id);
            return;
        }
        table.insert(id.clone(), WorldEntity::new(id, position, body));
    }

    fn spawn_fauna(&mut self, id: String, data: &FaunaData) {
        if !self.fauna.contains_key(&id) {
            if let Some(cap) = self.config.max_fauna {
                if self.fauna.len() >= cap {
                    info!(
                        "Fauna {} not shown: {} live, cap is {}",
                        id,
                        self.fauna.len(),
                        cap
                    );
                    return;
                }
            }
        }
        self.spawn(EntityKind::Fauna, id, data.position(), data.into());
    }

    fn begin_motion(&mut self, kind: EntityKind, id: &str, target: Position, now: Instant) {
        let profile = self.profile(kind);
        let Some(entity) = self.table_mut(kind).get_mut(id) else {
            debug!("Move for unknown {:?} {}", kind, id);
            return;
        };

        // Start from wherever the entity currently appears
        let from = entity.current_position(now);
        entity.motion = None;

        // Non-finite distances cannot be eased, so they snap as well
        let distance = from.distance(&target);
        if !distance.is_finite() || distance <= profile.snap_distance {
            entity.position = target;
            return;
        }

        entity.position = from;
        entity.motion = Some(Motion {
            from,
            to: target,
            started_at: now,
            duration: profile.duration_for(distance),
            easing: profile.easing,
        });
    }

    fn update_fauna_state(&mut self, id: &str, data: &FaunaData) {
        let Some(entity) = self.fauna.get_mut(id) else {
            debug!("State change for unknown fauna {}", id);
            return;
        };
        if let EntityBody::Fauna {
            growth_stage,
            is_deceased,
            ..
        } = &mut entity.body
        {
            *growth_stage = data.stage;
            *is_deceased = data.is_dead;
        }
    }

    fn remove(&mut self, kind: EntityKind, id: &str) {
        if self.table_mut(kind).remove(id).is_none() {
            debug!("Remove for absent {:?} {}", kind, id);
        }
    }

    fn update_tile(&mut self, tile: TileUpdate) {
        let Some(grid) = self.tiles.as_mut() else {
            debug!("Tile update before any map arrived");
            return;
        };
        if !grid.set(tile.x, tile.y, tile.tile_type) {
            debug!("Tile update out of bounds at ({}, {})", tile.x, tile.y);
        }
    }

    fn attach_speech(&mut self, id: &str, text: String, now: Instant) {
        let ttl = self.config.chat_bubble_ttl;
        let Some(entity) = self.players.get_mut(id) else {
            debug!("Chat from unknown player {}", id);
            return;
        };
        entity.speech = Some(SpeechBubble {
            text,
            expires_at: now + ttl,
        });
    }
}

/// Makes `table` hold exactly the incoming ids. Existing records are
/// repositioned in place so their decorations survive.
fn reconcile(table: &mut EntityTable, incoming: HashMap<String, (Position, EntityBody)>) {
    table.retain(|id, _| incoming.contains_key(id));
    for (id, (position, body)) in incoming {
        match table.get_mut(&id) {
            Some(entity) => {
                entity.position = position;
                entity.motion = None;
                entity.body = body;
            }
            None => {
                table.insert(id.clone(), WorldEntity::new(id, position, body));
            }
        }
    }
}
