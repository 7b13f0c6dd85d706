//! Bearer token supply.
//!
//! The manager reads the token once per `connect()` through [`TokenSource`],
//! so a refreshed token is picked up on the next (re)connect without any
//! coordination.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors from token persistence.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Supplies the bearer token attached to the transport handshake.
pub trait TokenSource: Send + Sync + 'static {
    fn bearer_token(&self) -> Option<String>;
}

impl TokenSource for Option<String> {
    fn bearer_token(&self) -> Option<String> {
        self.clone()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

/// Token holder, optionally backed by a JSON file.
pub struct TokenStore {
    path: Option<PathBuf>,
    token: RwLock<Option<String>>,
}

impl TokenStore {
    /// Creates a store that lives only in memory.
    pub fn in_memory(token: Option<String>) -> Self {
        Self {
            path: None,
            token: RwLock::new(token),
        }
    }

    /// Opens a file-backed store, loading the token if the file exists.
    pub fn open(path: PathBuf) -> Result<Self, TokenError> {
        let file = load_token_file(&path)?;
        Ok(Self {
            path: Some(path),
            token: RwLock::new(file.token),
        })
    }

    /// Returns the current token, if any.
    pub fn get(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replaces the token and persists it.
    pub fn set(&self, token: &str) -> Result<(), TokenError> {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
        self.persist()
    }

    /// Forgets the token and persists the removal.
    pub fn clear(&self) -> Result<(), TokenError> {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.persist()
    }

    fn persist(&self) -> Result<(), TokenError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = TokenFile { token: self.get() };
        let json = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        debug!(path = ?path, present = file.token.is_some(), "persisted token");
        Ok(())
    }
}

impl TokenSource for TokenStore {
    fn bearer_token(&self) -> Option<String> {
        self.get()
    }
}

fn load_token_file(path: &Path) -> Result<TokenFile, TokenError> {
    if !path.exists() {
        return Ok(TokenFile::default());
    }
    let data = std::fs::read_to_string(path)?;
    let file: TokenFile = serde_json::from_str(&data)?;
    debug!(path = ?path, present = file.token.is_some(), "loaded token");
    Ok(file)
}
