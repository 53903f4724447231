use crate::channel::{ChannelSignal, Connector, SignalReceiver, WsConnector};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionNotice, ConnectionState};
use crate::error::{ClientError, Result};
use crate::identity::{Identity, IdentityError, IdentityStore};
use crate::intent::{Action, Intent, IntentEncoder};
use crate::world::{EntityKind, World};
use log::{debug, error, info, warn};
use shared::{ClientMessage, Position};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// A line typed on the console.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Intent(Intent),
    Logout,
    Status,
    Quit,
}

impl Command {
    /// Anything that is not a known slash command is chat.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let mut parts = line.split_whitespace();
        let command = match parts.next()? {
            "/logout" => Command::Logout,
            "/quit" => Command::Quit,
            "/status" => Command::Status,
            "/refresh" => Command::Intent(Intent::RefreshZone),
            "/till" => Command::Intent(Intent::Act(Action::Till)),
            "/food" => Command::Intent(Intent::Act(Action::DropFood)),
            "/move" => {
                let x = parts.next()?.parse().ok()?;
                let y = parts.next()?.parse().ok()?;
                Command::Intent(Intent::Move { x, y })
            }
            _ => Command::Intent(Intent::Chat(line.to_string())),
        };
        Some(command)
    }
}

pub struct Client {
    config: ClientConfig,
    connection: ConnectionManager,
    world: World,
    encoder: IntentEncoder,
    identity_store: Box<dyn IdentityStore>,
    signals: SignalReceiver,

    exit_reason: Option<ClientError>,
    finished: bool,
    ticks: u64,
    last_status: Instant,
}

impl Client {
    pub fn new(config: ClientConfig, identity_store: Box<dyn IdentityStore>) -> Result<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(&config.server_url, signal_tx)?;
        Ok(Self::with_connector(
            config,
            Box::new(connector),
            signal_rx,
            identity_store,
        ))
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: Box<dyn Connector>,
        signals: SignalReceiver,
        identity_store: Box<dyn IdentityStore>,
    ) -> Self {
        Client {
            connection: ConnectionManager::new(config.connection.clone(), connector),
            world: World::new(config.world.clone()),
            encoder: IntentEncoder::new(config.move_send_interval),
            identity_store,
            signals,
            exit_reason: None,
            finished: false,
            ticks: 0,
            last_status: Instant::now(),
            config,
        }
    }

    /// Connects with the given identity, falling back to the stored one.
    pub fn connect(&mut self, identity: Option<Identity>, now: Instant) -> Result<()> {
        let identity = identity
            .or_else(|| self.identity_store.load())
            .ok_or(IdentityError::Empty)?;
        self.finished = false;
        self.exit_reason = None;
        let result = self.connection.connect(identity, now);
        self.process_notices();
        result
    }

    pub fn handle_signal(&mut self, signal: ChannelSignal, now: Instant) {
        self.connection.handle_signal(signal, now);
        self.process_notices();
    }

    /// One application step: timers, queued events, motion.
    pub fn tick(&mut self, now: Instant) {
        self.connection.poll(now);
        if self.connection.state() == ConnectionState::Open {
            if let Some(message) = self.encoder.flush(now) {
                if let Err(e) = self.connection.send_intent(&message) {
                    warn!("Failed to send held move: {}", e);
                }
            }
        }
        let events = self.connection.drain_inbound();
        let applied = self.world.tick(events, now);
        if applied > 0 {
            debug!("Tick {} applied {} events", self.ticks, applied);
        }
        self.ticks += 1;
        self.process_notices();
    }

    pub fn submit(&mut self, intent: Intent, now: Instant) -> Result<()> {
        if let Intent::Move { x, y } = intent {
            self.world.predict_own_position(Position::new(x, y));
        }

        let own_position = self.world.own_entity().map(|e| e.position);
        match self.encoder.encode(intent, own_position, now) {
            Some(message) => self.connection.send_intent(&message),
            None => Ok(()),
        }
    }

    pub fn logout(&mut self) {
        self.connection.logout();
        self.process_notices();
    }

    pub fn handle_command(&mut self, command: Command, now: Instant) -> Result<()> {
        match command {
            Command::Intent(intent) => self.submit(intent, now)?,
            Command::Logout => self.logout(),
            Command::Status => self.log_status(),
            Command::Quit => self.finished = true,
        }
        Ok(())
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// True once nothing more will happen without user action.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn process_notices(&mut self) {
        for notice in self.connection.take_notices() {
            match notice {
                ConnectionNotice::StateChanged(state) => {
                    info!("Connection: {:?}", state);
                    if state == ConnectionState::Idle {
                        self.finished = true;
                    }
                }
                ConnectionNotice::Joined { identity } => {
                    if let Err(e) = self.identity_store.save(&identity) {
                        warn!("Could not save identity: {}", e);
                    }
                }
                ConnectionNotice::NameTaken { identity } => {
                    let name = identity.map(|i| i.to_string()).unwrap_or_default();
                    error!("Name '{}' is already taken, choose another with --name", name);
                    self.clear_session();
                    self.exit_reason = Some(ClientError::NameTaken(name));
                }
                ConnectionNotice::ConnectionReplaced { previous, current } => {
                    debug!("Channel {:?} replaced by {}", previous, current);
                    self.encoder.reset();
                }
                ConnectionNotice::ConnectFailed => {
                    error!("Could not reach {}", self.config.server_url);
                    self.exit_reason = Some(ClientError::NotConnected);
                }
                ConnectionNotice::LoggedOut => {
                    info!("Logged out");
                    self.clear_session();
                }
                ConnectionNotice::PermanentlyDisconnected => {
                    error!("Connection lost for good. Restart the client to play again.");
                    self.finished = true;
                    self.exit_reason = Some(ClientError::PermanentlyDisconnected);
                }
            }
        }
    }

    fn clear_session(&mut self) {
        if let Err(e) = self.identity_store.clear() {
            warn!("Could not clear stored identity: {}", e);
        }
        self.world.clear();
        self.encoder.reset();
    }

    fn log_status(&self) {
        let tiles = self
            .world
            .tiles()
            .map(|t| format!("{}x{}", t.width(), t.height()))
            .unwrap_or_else(|| "none".to_string());
        let own = self
            .world
            .own_entity()
            .map(|e| format!("({:.0}, {:.0})", e.position.x, e.position.y))
            .unwrap_or_else(|| "-".to_string());
        info!(
            "{:?} | attempts {}/{} | players {} fauna {} food {} | map {} | me {}",
            self.connection.state(),
            self.connection.retry_budget().attempts_made,
            self.connection.retry_budget().max_attempts,
            self.world.entity_count(EntityKind::Player),
            self.world.entity_count(EntityKind::Fauna),
            self.world.entity_count(EntityKind::Food),
            tiles,
            own,
        );
    }

    pub async fn run(&mut self, identity: Option<Identity>) -> Result<()> {
        self.connect(identity, Instant::now())?;

        let mut tick_interval = interval(self.config.tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        while !self.finished {
            tokio::select! {
                Some(signal) = self.signals.recv() => {
                    self.handle_signal(signal, Instant::now());
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    self.tick(now);
                    if now.duration_since(self.last_status) >= self.config.status_interval {
                        self.log_status();
                        self.last_status = now;
                    }
                },

                line = stdin.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(command) = Command::parse(&line) {
                                if let Err(e) = self.handle_command(command, Instant::now()) {
                                    warn!("{}", e);
                                }
                            }
                        }
                        Ok(None) => {
                            debug!("stdin closed");
                            stdin_open = false;
                        }
                        Err(e) => {
                            warn!("Error reading stdin: {}", e);
                            stdin_open = false;
                        }
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                },
            }
        }

        self.connection.shutdown();

        match self.exit_reason.take() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}
