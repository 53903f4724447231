//! Connection lifecycle management
//!
//! The [`ConnectionManager`] owns the single active channel handle, the retry
//! budget and the inbound event queue. It performs no I/O and reads no clock
//! of its own: every time-dependent operation takes `now`, and the caller
//! feeds it channel signals and calls [`ConnectionManager::poll`] once per
//! tick.
//!
//! ```text
//! Idle --connect--> Connecting --join accepted--> Open
//! Open --clean close--> Idle
//! Open --abnormal close--> Reconnecting --delay elapses--> Connecting
//! Reconnecting --failure with budget spent--> PermanentlyDisconnected
//! Connecting --name taken--> Idle
//! ```

use crate::channel::{Channel, ChannelEvent, ChannelId, ChannelSignal, Connector};
use crate::config::ConnectionConfig;
use crate::error::{ClientError, Result};
use crate::identity::Identity;
use crate::queue::EventQueue;
use log::{debug, error, info, warn};
use shared::{ClientMessage, ServerMessage, CLOSE_ABNORMAL, CLOSE_NORMAL, REASON_NAME_TAKEN};
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
    PermanentlyDisconnected,
}

/// Consecutive reconnect attempts since the last successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_made: 0,
            max_attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts_made = 0;
    }
}

/// Something the presentation side should hear about exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    StateChanged(ConnectionState),
    Joined {
        identity: Identity,
    },
    NameTaken {
        identity: Option<Identity>,
    },
    /// A new channel handle replaced the previous one.
    ConnectionReplaced {
        previous: Option<ChannelId>,
        current: ChannelId,
    },
    /// A first connection attempt failed before joining. Not retried.
    ConnectFailed,
    LoggedOut,
    PermanentlyDisconnected,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Box<dyn Connector>,
    state: ConnectionState,
    identity: Option<Identity>,
    channel: Option<Box<dyn Channel>>,
    last_channel: Option<ChannelId>,
    next_channel_id: u64,
    budget: RetryBudget,
    retry_at: Option<Instant>,
    error_deadline: Option<Instant>,
    // Set while the open attempt belongs to a reconnect cycle
    resync_on_open: bool,
    inbound: EventQueue,
    notices: VecDeque<ConnectionNotice>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Box<dyn Connector>) -> Self {
        let budget = RetryBudget::new(config.max_reconnect_attempts);
        Self {
            config,
            connector,
            state: ConnectionState::Idle,
            identity: None,
            channel: None,
            last_channel: None,
            next_channel_id: 1,
            budget,
            retry_at: None,
            error_deadline: None,
            resync_on_open: false,
            inbound: EventQueue::new(),
            notices: VecDeque::new(),
        }
    }

    /// Starts a connection attempt for an already validated identity.
    pub fn connect(&mut self, identity: Identity, now: Instant) -> Result<()> {
        match self.state {
            ConnectionState::Connecting => return Err(ClientError::ConnectInFlight),
            ConnectionState::Open => return Err(ClientError::AlreadyConnected),
            ConnectionState::PermanentlyDisconnected => {
                return Err(ClientError::PermanentlyDisconnected)
            }
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Reconnecting => {}
        }

        let resync = self.state == ConnectionState::Reconnecting;
        self.retry_at = None;
        info!("Connecting as '{}'", identity);
        self.identity = Some(identity);
        self.open_channel(resync, now)
    }

    /// Routes a signal from the channel layer. Signals from any handle other
    /// than the current one are discarded.
    pub fn handle_signal(&mut self, signal: ChannelSignal, now: Instant) {
        if self.channel_id() != Some(signal.id) {
            debug!("Ignoring {:?} from stale channel {}", signal.event, signal.id);
            return;
        }

        match signal.event {
            ChannelEvent::Opened => self.on_channel_open(),
            ChannelEvent::Frame(frame) => self.on_frame(&frame),
            ChannelEvent::Error(reason) => self.on_channel_error(&reason, now),
            ChannelEvent::Closed { code, was_clean } => {
                self.on_channel_closed(code, was_clean, now)
            }
        }
    }

    pub fn on_channel_closed(&mut self, code: u16, was_clean: bool, now: Instant) {
        let Some(mut channel) = self.channel.take() else {
            debug!("Close ({}) with no active channel", code);
            return;
        };
        channel.detach();
        self.error_deadline = None;
        self.handle_closure(code, was_clean, now);
    }

    /// Errors only arm a grace timer; the close that normally follows does
    /// the real work.
    pub fn on_channel_error(&mut self, reason: &str, now: Instant) {
        if self.channel.is_none() {
            return;
        }
        warn!("Channel error: {}", reason);
        if self.error_deadline.is_none() {
            self.error_deadline = Some(now + self.config.error_close_grace);
        }
    }

    /// Explicit clean teardown. Safe to call in any state, any number of
    /// times.
    pub fn logout(&mut self) {
        let had_session = self.channel.is_some()
            || self.retry_at.is_some()
            || self.identity.is_some()
            || self.state != ConnectionState::Idle;

        // Closing only lasts for the synchronous teardown, so it is not announced
        if self.channel.is_some() && self.state != ConnectionState::PermanentlyDisconnected {
            self.state = ConnectionState::Closing;
        }
        self.teardown_channel();
        self.retry_at = None;
        self.resync_on_open = false;
        self.identity = None;
        self.budget.reset();
        self.inbound.clear();

        if self.state == ConnectionState::PermanentlyDisconnected {
            debug!("Logout while permanently disconnected; state unchanged");
            return;
        }
        self.set_state(ConnectionState::Idle);
        if had_session {
            info!("Logged out");
            self.notices.push_back(ConnectionNotice::LoggedOut);
        }
    }

    /// Releases the channel and cancels timers without touching the
    /// identity. Used when the owning client goes away.
    pub fn shutdown(&mut self) {
        self.teardown_channel();
        self.retry_at = None;
        self.resync_on_open = false;
        if self.state != ConnectionState::PermanentlyDisconnected {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Asks for a full snapshot. Only allowed once joined; the reconnect
    /// path sends its own refresh right after the join request.
    pub fn request_world_refresh(&mut self) -> Result<()> {
        debug!("Requesting zone refresh");
        self.send_intent(&ClientMessage::RequestZoneRefresh)
    }

    /// Sends on the current channel regardless of join state.
    pub fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(ClientError::NotConnected)?;
        channel.send(message.to_frame()?)
    }

    /// Sends a gameplay message. Only allowed once joined.
    pub fn send_intent(&mut self, message: &ClientMessage) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        self.send(message)
    }

    /// Fires the error grace timer and the reconnect timer when due.
    pub fn poll(&mut self, now: Instant) {
        if let Some(deadline) = self.error_deadline {
            if now >= deadline {
                self.error_deadline = None;
                if self.channel.is_some() {
                    warn!("No close followed channel error, treating as abnormal closure");
                    self.teardown_channel();
                    self.handle_closure(CLOSE_ABNORMAL, false, now);
                }
            }
        }

        if let Some(retry_at) = self.retry_at {
            if now >= retry_at {
                self.retry_at = None;
                self.fire_retry(now);
            }
        }
    }

    pub fn drain_inbound(&mut self) -> Vec<ServerMessage> {
        self.inbound.drain_all()
    }

    pub fn take_notices(&mut self) -> Vec<ConnectionNotice> {
        self.notices.drain(..).collect()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|c| c.id())
    }

    pub fn retry_budget(&self) -> RetryBudget {
        self.budget
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    fn open_channel(&mut self, resync: bool, now: Instant) -> Result<()> {
        self.teardown_channel();

        let id = ChannelId(self.next_channel_id);
        self.next_channel_id += 1;
        self.set_state(ConnectionState::Connecting);
        self.resync_on_open = resync;

        match self.connector.open(id) {
            Ok(channel) => {
                self.channel = Some(channel);
                self.notices.push_back(ConnectionNotice::ConnectionReplaced {
                    previous: self.last_channel,
                    current: id,
                });
                self.last_channel = Some(id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open channel {}: {}", id, e);
                self.handle_closure(CLOSE_ABNORMAL, false, now);
                Err(e)
            }
        }
    }

    fn teardown_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            debug!("Tearing down channel {}", channel.id());
            channel.detach();
            channel.close();
        }
        self.error_deadline = None;
    }

    fn on_channel_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Open signal in state {:?}", self.state);
            return;
        }
        let Some(identity) = self.identity.clone() else {
            warn!("Channel opened without an identity");
            return;
        };

        let join = ClientMessage::PlayerJoinRequest {
            name: identity.to_string(),
        };
        if let Err(e) = self.send(&join) {
            warn!("Failed to send join request: {}", e);
            return;
        }
        if self.resync_on_open {
            if let Err(e) = self.send(&ClientMessage::RequestZoneRefresh) {
                warn!("Failed to request zone refresh: {}", e);
            }
        }
    }

    fn on_frame(&mut self, frame: &str) {
        let message = match ServerMessage::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                return;
            }
        };

        match message {
            ServerMessage::JoinSuccess => self.on_join_accepted(),
            ServerMessage::Error { reason } if reason == REASON_NAME_TAKEN => {
                self.on_name_taken()
            }
            ServerMessage::Error { reason } => warn!("Server error: {}", reason),
            other => self.inbound.push(other),
        }
    }

    fn on_join_accepted(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("join_success in state {:?}", self.state);
            return;
        }
        self.budget.reset();
        self.resync_on_open = false;
        self.set_state(ConnectionState::Open);
        if let Some(identity) = self.identity.clone() {
            info!("Joined as '{}'", identity);
            self.notices
                .push_back(ConnectionNotice::Joined { identity });
        }
    }

    fn on_name_taken(&mut self) {
        let identity = self.identity.take();
        match &identity {
            Some(name) => warn!("Name '{}' is already in use", name),
            None => warn!("Name is already in use"),
        }
        self.teardown_channel();
        self.retry_at = None;
        self.resync_on_open = false;
        self.set_state(ConnectionState::Idle);
        self.notices
            .push_back(ConnectionNotice::NameTaken { identity });
    }

    fn handle_closure(&mut self, code: u16, was_clean: bool, now: Instant) {
        let clean = was_clean && code == CLOSE_NORMAL;
        match self.state {
            ConnectionState::Open if clean => {
                info!("Connection closed cleanly");
                self.set_state(ConnectionState::Idle);
            }
            ConnectionState::Open => {
                warn!("Connection lost (code {})", code);
                self.schedule_reconnect(now);
            }
            ConnectionState::Connecting if self.resync_on_open => {
                warn!("Reconnect attempt failed (code {})", code);
                self.schedule_reconnect(now);
            }
            ConnectionState::Connecting => {
                warn!("Connection attempt failed (code {})", code);
                self.set_state(ConnectionState::Idle);
                self.notices.push_back(ConnectionNotice::ConnectFailed);
            }
            state => debug!("Close ({}) in state {:?}", code, state),
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.budget.is_exhausted() {
            self.retry_at = None;
            self.resync_on_open = false;
            error!(
                "Giving up after {} reconnect attempts",
                self.budget.attempts_made
            );
            self.set_state(ConnectionState::PermanentlyDisconnected);
            self.notices
                .push_back(ConnectionNotice::PermanentlyDisconnected);
            return;
        }

        self.budget.attempts_made += 1;
        self.retry_at = Some(now + self.config.reconnect_delay);
        self.set_state(ConnectionState::Reconnecting);
        info!(
            "Reconnect attempt {}/{} in {:?}",
            self.budget.attempts_made, self.budget.max_attempts, self.config.reconnect_delay
        );
    }

    fn fire_retry(&mut self, now: Instant) {
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        let Some(identity) = self.identity.clone() else {
            debug!("Retry due without an identity");
            self.set_state(ConnectionState::Idle);
            return;
        };
        if let Err(e) = self.connect(identity, now) {
            debug!("Retry failed to start: {}", e);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.notices
                .push_back(ConnectionNotice::StateChanged(state));
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown_channel();
    }
}
