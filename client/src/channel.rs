//! Message channel adapter
//!
//! A channel is one bidirectional, ordered connection to the server. It has
//! no game knowledge: it reports open/frame/error/close signals and accepts
//! outbound text frames.
//!
//! Every signal carries the [`ChannelId`] of the handle that produced it.
//! Ids are never reused, so the connection manager can discard anything
//! still in flight from a handle it has already replaced. Detaching a handle
//! additionally stops it from emitting at all.

use crate::error::{ClientError, Result};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Close code reported when the peer closed without giving a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed { code: u16, was_clean: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSignal {
    pub id: ChannelId,
    pub event: ChannelEvent,
}

impl ChannelSignal {
    pub fn new(id: ChannelId, event: ChannelEvent) -> Self {
        Self { id, event }
    }
}

pub type SignalSender = mpsc::UnboundedSender<ChannelSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<ChannelSignal>;

/// A live connection handle.
pub trait Channel: Send {
    fn id(&self) -> ChannelId;

    fn send(&mut self, frame: String) -> Result<()>;

    /// Stops all further signals from this handle. Must be called before
    /// `close` whenever the close must not be observed.
    fn detach(&mut self);

    fn close(&mut self);
}

/// Opens new channels. Injected into the connection manager.
pub trait Connector: Send {
    fn open(&mut self, id: ChannelId) -> Result<Box<dyn Channel>>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

enum Outbound {
    Frame(String),
    Close,
}

/// Opens WebSocket channels to a fixed server URL.
pub struct WsConnector {
    url: Url,
    signals: SignalSender,
}

impl WsConnector {
    pub fn new(url: &str, signals: SignalSender) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| ClientError::Channel(format!("{}: {}", url, e)))?;
        Ok(Self { url, signals })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    fn open(&mut self, id: ChannelId) -> Result<Box<dyn Channel>> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let emitter = SignalEmitter {
            id,
            signals: self.signals.clone(),
            attached: Arc::new(AtomicBool::new(true)),
        };
        let attached = Arc::clone(&emitter.attached);

        info!("Opening channel {} to {}", id, self.url);
        tokio::spawn(run_ws_channel(self.url.clone(), emitter, outbound_rx));

        Ok(Box::new(WsChannel {
            id,
            outbound: outbound_tx,
            attached,
        }))
    }
}

pub struct WsChannel {
    id: ChannelId,
    outbound: mpsc::UnboundedSender<Outbound>,
    attached: Arc<AtomicBool>,
}

impl Channel for WsChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&mut self, frame: String) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::Channel(format!("channel {} has stopped", self.id)))
    }

    fn detach(&mut self) {
        self.attached.store(false, Ordering::Release);
    }

    fn close(&mut self) {
        // The task may already be gone; nothing left to close then
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        // Dropping the outbound sender lets the task close the socket
        self.detach();
    }
}

struct SignalEmitter {
    id: ChannelId,
    signals: SignalSender,
    attached: Arc<AtomicBool>,
}

impl SignalEmitter {
    fn emit(&self, event: ChannelEvent) {
        if !self.attached.load(Ordering::Acquire) {
            debug!("Channel {} detached, dropping {:?}", self.id, event);
            return;
        }
        let _ = self.signals.send(ChannelSignal::new(self.id, event));
    }

    fn fail(&self, reason: String) {
        self.emit(ChannelEvent::Error(reason));
        self.emit(ChannelEvent::Closed {
            code: CLOSE_ABNORMAL,
            was_clean: false,
        });
    }
}

async fn run_ws_channel(
    url: Url,
    emitter: SignalEmitter,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!("Channel {} failed to connect: {}", emitter.id, e);
            emitter.fail(e.to_string());
            return;
        }
    };

    emitter.emit(ChannelEvent::Opened);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    emitter.emit(ChannelEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame
                        .map(|f| u16::from(f.code))
                        .unwrap_or(CLOSE_NO_STATUS);
                    info!("Channel {} closed by server with code {}", emitter.id, code);
                    emitter.emit(ChannelEvent::Closed { code, was_clean: true });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Channel {} error: {}", emitter.id, e);
                    emitter.fail(e.to_string());
                    break;
                }
                None => {
                    emitter.emit(ChannelEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        was_clean: false,
                    });
                    break;
                }
            },

            command = outbound.recv() => match command {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        warn!("Channel {} failed to send: {}", emitter.id, e);
                        emitter.fail(e.to_string());
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: String::from("client closed").into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    emitter.emit(ChannelEvent::Closed {
                        code: CLOSE_NORMAL,
                        was_clean: true,
                    });
                    break;
                }
            },
        }
    }

    debug!("Channel {} task finished", emitter.id);
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-memory channels that record everything the manager does to them.
///
/// Signals are not produced on their own; callers feed them to the manager
/// directly, which makes connection scenarios fully deterministic.
pub mod mock {
    use super::*;
    use shared::ClientMessage;
    use std::sync::{Mutex, MutexGuard};

    #[derive(Debug, Default)]
    pub struct MockLog {
        pub opened: Vec<ChannelId>,
        pub sent: Vec<(ChannelId, String)>,
        pub detached: Vec<ChannelId>,
        pub closed: Vec<ChannelId>,
        pub refuse_open: bool,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockConnector {
        log: Arc<Mutex<MockLog>>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn log(&self) -> MutexGuard<'_, MockLog> {
            self.log.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn open_count(&self) -> usize {
            self.log().opened.len()
        }

        pub fn refuse_open(&self, refuse: bool) {
            self.log().refuse_open = refuse;
        }

        /// Decoded outbound messages, in send order.
        pub fn sent_messages(&self) -> Vec<ClientMessage> {
            self.log()
                .sent
                .iter()
                .filter_map(|(_, frame)| serde_json::from_str(frame).ok())
                .collect()
        }
    }

    impl Connector for MockConnector {
        fn open(&mut self, id: ChannelId) -> Result<Box<dyn Channel>> {
            let mut log = self.log();
            if log.refuse_open {
                return Err(ClientError::Channel("connection refused".to_string()));
            }
            log.opened.push(id);
            Ok(Box::new(MockChannel {
                id,
                log: Arc::clone(&self.log),
                closed: false,
            }))
        }
    }

    struct MockChannel {
        id: ChannelId,
        log: Arc<Mutex<MockLog>>,
        closed: bool,
    }

    impl MockChannel {
        fn log(&self) -> MutexGuard<'_, MockLog> {
            self.log.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    impl Channel for MockChannel {
        fn id(&self) -> ChannelId {
            self.id
        }

        fn send(&mut self, frame: String) -> Result<()> {
            if self.closed {
                return Err(ClientError::Channel("closed".to_string()));
            }
            let id = self.id;
            self.log().sent.push((id, frame));
            Ok(())
        }

        fn detach(&mut self) {
            let id = self.id;
            self.log().detached.push(id);
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                let id = self.id;
                self.log().closed.push(id);
            }
        }
    }
}
