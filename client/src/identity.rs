//! Player identity validation and persistence
//!
//! A name is checked before any connection attempt is made. Storing the
//! chosen name across restarts is left to an [`IdentityStore`]; the
//! connection core never reads or writes it.

use log::{debug, warn};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

pub const MAX_IDENTITY_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("name must not be empty")]
    Empty,
    #[error("name cannot be longer than {MAX_IDENTITY_LEN} characters")]
    TooLong,
    #[error("name contains invalid character '{0}'")]
    InvalidCharacter(char),
}

/// A validated player name: 1-8 characters of `[A-Za-z0-9+\-!_.]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn parse(name: &str) -> Result<Self, IdentityError> {
        if name.is_empty() {
            return Err(IdentityError::Empty);
        }
        if name.chars().count() > MAX_IDENTITY_LEN {
            return Err(IdentityError::TooLong);
        }
        if let Some(bad) = name.chars().find(|c| !is_identity_char(*c)) {
            return Err(IdentityError::InvalidCharacter(bad));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identity_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '!' | '_' | '.')
}

/// Remembers the last identity that joined successfully.
///
/// Read once at startup, written after a successful join and cleared on
/// logout or when the server reports the name as taken.
pub trait IdentityStore {
    fn load(&self) -> Option<Identity>;
    fn save(&mut self, identity: &Identity) -> std::io::Result<()>;
    fn clear(&mut self) -> std::io::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    stored: Option<Identity>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Option<Identity> {
        self.stored.clone()
    }

    fn save(&mut self, identity: &Identity) -> std::io::Result<()> {
        self.stored = Some(identity.clone());
        Ok(())
    }

    fn clear(&mut self) -> std::io::Result<()> {
        self.stored = None;
        Ok(())
    }
}

/// Keeps the name in a plain text file.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Option<Identity> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Could not read identity file {}: {}", self.path.display(), e);
                }
                return None;
            }
        };

        match Identity::parse(contents.trim()) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!("Ignoring stored identity: {}", e);
                None
            }
        }
    }

    fn save(&mut self, identity: &Identity) -> std::io::Result<()> {
        debug!("Saving identity to {}", self.path.display());
        fs::write(&self.path, identity.as_str())
    }

    fn clear(&mut self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
