//! Error types shared by the client components

use crate::identity::IdentityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    #[error("name '{0}' is already in use")]
    NameTaken(String),

    #[error("a connection attempt is already in flight")]
    ConnectInFlight,

    #[error("already connected")]
    AlreadyConnected,

    #[error("permanently disconnected, restart required")]
    PermanentlyDisconnected,

    #[error("not connected")]
    NotConnected,

    #[error("channel error: {0}")]
    Channel(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
