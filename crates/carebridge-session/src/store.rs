//! Session token storage
//!
//! The token pair is the only mutable state shared by concurrent requests.
//! It lives behind [`SessionStore`] so callers inject the store they need.

use crate::{Result, SessionError};
use async_trait::async_trait;
use carebridge_core::TokenPair;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self) -> Result<Option<TokenPair>>;
    async fn set(&self, tokens: TokenPair) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self) -> Result<Option<TokenPair>> {
        Ok(self.tokens.read().await.clone())
    }

    async fn set(&self, tokens: TokenPair) -> Result<()> {
        *self.tokens.write().await = Some(tokens);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.tokens.write().await = None;
        Ok(())
    }
}

/// Store persisted as a JSON file `{accessToken, refreshToken, expiresAt}`
///
/// A missing file means no tokens. Writes go to a sibling `.tmp` file that
/// is renamed over the target.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Open a store at `path` (supports `~` for the home directory)
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            path: expand_tilde(path.as_ref())?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.as_os_str().to_owned();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self) -> Result<Option<TokenPair>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Session file does not exist: {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn set(&self, tokens: TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();
        let json = serde_json::to_vec_pretty(&tokens)?;
        tokio::fs::write(&temp_path, json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        debug!("Session tokens written to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Expand a leading `~` to the home directory
fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SessionError::Config("Invalid UTF-8 in path".to_string()))?;

    let home = || {
        dirs::home_dir()
            .ok_or_else(|| SessionError::Config("Could not determine home directory".to_string()))
    };

    if let Some(stripped) = path_str.strip_prefix("~/") {
        Ok(home()?.join(stripped))
    } else if path_str == "~" {
        home()
    } else {
        Ok(path.to_path_buf())
    }
}
