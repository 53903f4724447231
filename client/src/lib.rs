//! # World Client Library
//!
//! Client-side implementation for the shared-world multiplayer game. It keeps a
//! local mirror of the server-authoritative world (players, fauna, food and the
//! tile map) up to date over a WebSocket connection that may drop at any time.
//!
//! ## Architecture Overview
//!
//! Two pieces carry the real logic; everything around them is plumbing.
//!
//! ### Connection Lifecycle
//! The connection manager opens a channel, sends the join request once it is
//! open, and waits for the server to accept the name. An abnormal closure
//! starts a bounded reconnect cycle: a fixed delay, a single scheduled retry,
//! and a retry budget that resets on every successful join. When the budget is
//! spent the client is permanently disconnected and says so. A rejected name is
//! never retried.
//!
//! ### World Reconciliation
//! Frames are decoded as they arrive but only queued. Once per tick the queue
//! is drained and every event is applied in order. Full snapshots rebuild the
//! tables idempotently, incremental events create, move, update or remove
//! single entities, and remote movement is eased rather than teleported.
//!
//! ### Local Authority
//! The local player moves immediately when the user moves. Server echoes of the
//! local player's own movement are ignored.
//!
//! ## Module Organization
//!
//! ### Channel Module (`channel`)
//! The transport seam:
//! - `Channel`/`Connector` traits injected into the connection manager
//! - WebSocket implementation on tokio-tungstenite
//! - In-memory implementation for deterministic tests
//!
//! ### Connection Module (`connection`)
//! Lifecycle state machine, retry budget and notices. Performs no I/O itself.
//!
//! ### Queue Module (`queue`)
//! FIFO buffer between network arrival and the tick.
//!
//! ### World Module (`world`)
//! Entity tables, tile grid, motion and speech bubbles.
//!
//! ### Intent Module (`intent`)
//! Turns moves, actions and chat into outbound messages.
//!
//! ### Network Module (`network`)
//! The `Client` driver tying everything to a tokio select loop.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::config::ClientConfig;
//! use client::identity::{FileIdentityStore, Identity};
//! use client::network::Client;
//!
//! # async fn start() -> Result<(), client::error::ClientError> {
//! let identity = Identity::parse("Ann")?;
//! let store = FileIdentityStore::new(".player_name");
//! let mut client = Client::new(ClientConfig::default(), Box::new(store))?;
//!
//! // Runs until logout, a rejected name or a permanent disconnect
//! client.run(Some(identity)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Notes
//!
//! ### Single Writer
//! Network callbacks never touch the world. All mutation happens inside one
//! tick, so the reconciliation pass never races with itself.
//!
//! ### Stale Handles
//! Every channel handle carries a generation id. Once a handle is replaced or
//! torn down, nothing it emits can drive the manager again.

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod intent;
pub mod network;
pub mod queue;
pub mod world;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionNotice, ConnectionState};
pub use error::ClientError;
pub use identity::Identity;
pub use world::World;
