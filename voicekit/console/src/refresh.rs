//! Token refresh from a token file
//!
//! The console cannot log in by itself. When the backend rejects the token,
//! the file is read again; whatever process maintains it may have written
//! a fresh one in the meantime.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use voicekit_core::api::{TokenRefresher, TokenStore};

/// Read a token file, trimming surrounding whitespace
pub async fn read_token(path: &Path) -> Result<Option<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read token file: {path:?}"))?;
    let token = content.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}

/// Refresher re-reading the token file into the shared store
pub struct FileTokenRefresher {
    path: PathBuf,
    tokens: TokenStore,
}

impl FileTokenRefresher {
    pub fn new(path: PathBuf, tokens: TokenStore) -> Self {
        Self { path, tokens }
    }
}

#[async_trait]
impl TokenRefresher for FileTokenRefresher {
    async fn refresh_token(&self) -> bool {
        let fresh = match read_token(&self.path).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!(path = ?self.path, "Token file is empty");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return false;
            }
        };

        // The same token would be rejected again.
        if self.tokens.get().as_deref() == Some(fresh.as_str()) {
            debug!("Token file unchanged");
            return false;
        }
        self.tokens.set(fresh);
        debug!("Token reloaded from file");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_picks_up_new_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "old\n").unwrap();

        let tokens = TokenStore::with_token("old");
        let refresher = FileTokenRefresher::new(path.clone(), tokens.clone());
        assert!(!refresher.refresh_token().await);

        std::fs::write(&path, "  new-token \n").unwrap();
        assert!(refresher.refresh_token().await);
        assert_eq!(tokens.get().as_deref(), Some("new-token"));
    }

    #[tokio::test]
    async fn test_missing_or_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let refresher = FileTokenRefresher::new(path.clone(), TokenStore::new());
        assert!(!refresher.refresh_token().await);

        std::fs::write(&path, "\n").unwrap();
        assert!(!refresher.refresh_token().await);
        assert_eq!(read_token(&path).await.unwrap(), None);
    }
}
