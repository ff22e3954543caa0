//! Per-artifact access tokens, persisted as a JSON file.
//!
//! File layout: `{ "<artifact-id>": [{"name": "...", "token": "..."}] }`.
//! Every mutation rewrites the file while holding the write lock, so the
//! file always matches memory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::TokenStoreError;

const TOKEN_LEN: usize = 16;

/// A capability handed to one named holder for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub name: String,
    pub token: String,
}

type TokenMap = BTreeMap<String, Vec<AccessToken>>;

#[derive(Clone)]
pub struct TokenStore {
    path: PathBuf,
    inner: Arc<RwLock<TokenMap>>,
}

impl TokenStore {
    /// Load the token file. A missing file is an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, TokenStoreError> {
        let path = path.into();
        let map = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => TokenMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| TokenStoreError::Malformed {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No token file, starting empty");
                TokenMap::new()
            }
            Err(source) => return Err(TokenStoreError::Read { path, source }),
        };

        tracing::debug!(artifacts = map.len(), "Loaded access tokens");
        Ok(Self {
            path,
            inner: Arc::new(RwLock::new(map)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token values registered for an artifact. Empty if there are none.
    pub async fn tokens_for(&self, artifact: &str) -> HashSet<String> {
        self.inner
            .read()
            .await
            .get(artifact)
            .map(|tokens| tokens.iter().map(|t| t.token.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn list(&self, artifact: &str) -> Vec<AccessToken> {
        self.inner
            .read()
            .await
            .get(artifact)
            .cloned()
            .unwrap_or_default()
    }

    /// Issue a new token for `holder` on `artifact`.
    pub async fn create(&self, artifact: &str, holder: &str) -> Result<AccessToken, TokenStoreError> {
        let token = AccessToken {
            name: holder.to_string(),
            token: generate_token(),
        };
        let mut map = self.inner.write().await;
        map.entry(artifact.to_string())
            .or_default()
            .push(token.clone());
        self.persist(&map).await?;
        tracing::info!(artifact, holder, "Issued access token");
        Ok(token)
    }

    /// Revoke one token. Returns whether it existed.
    pub async fn revoke(&self, artifact: &str, token: &str) -> Result<bool, TokenStoreError> {
        let mut map = self.inner.write().await;
        let Some(tokens) = map.get_mut(artifact) else {
            return Ok(false);
        };
        let before = tokens.len();
        tokens.retain(|t| t.token != token);
        let removed = tokens.len() != before;
        if removed {
            self.persist(&map).await?;
            tracing::info!(artifact, "Revoked access token");
        }
        Ok(removed)
    }

    /// Drop every token of an artifact.
    pub async fn remove_artifact(&self, artifact: &str) -> Result<(), TokenStoreError> {
        let mut map = self.inner.write().await;
        if map.remove(artifact).is_some() {
            self.persist(&map).await?;
        }
        Ok(())
    }

    async fn persist(&self, map: &TokenMap) -> Result<(), TokenStoreError> {
        let write_err = |source| TokenStoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(map).map_err(|e| TokenStoreError::Write {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;
        tokio::fs::write(&self.path, json).await.map_err(write_err)
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::load(dir.path().join("tokens.json")).await.unwrap();
        assert!(store.tokens_for("abcd1234").await.is_empty());
        assert!(store.list("abcd1234").await.is_empty());
    }

    #[tokio::test]
    async fn create_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("tokens.json");
        let store = TokenStore::load(&path).await.unwrap();

        let token = store.create("abcd1234", "alice").await.unwrap();
        assert_eq!(token.token.len(), TOKEN_LEN);
        assert!(token.token.chars().all(|c| c.is_ascii_alphanumeric()));

        let reloaded = TokenStore::load(&path).await.unwrap();
        assert_eq!(reloaded.list("abcd1234").await, vec![token.clone()]);
        assert!(reloaded.tokens_for("abcd1234").await.contains(&token.token));
    }

    #[tokio::test]
    async fn revoke_only_removes_matching_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::load(dir.path().join("tokens.json")).await.unwrap();
        let a = store.create("abcd1234", "alice").await.unwrap();
        let b = store.create("abcd1234", "bob").await.unwrap();

        assert!(store.revoke("abcd1234", &a.token).await.unwrap());
        assert!(!store.revoke("abcd1234", &a.token).await.unwrap());
        assert!(!store.revoke("ffffffff", &b.token).await.unwrap());
        assert_eq!(store.list("abcd1234").await, vec![b]);
    }

    #[tokio::test]
    async fn remove_artifact_drops_all_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::load(&path).await.unwrap();
        store.create("abcd1234", "alice").await.unwrap();
        store.create("ffffffff", "bob").await.unwrap();

        store.remove_artifact("abcd1234").await.unwrap();
        let reloaded = TokenStore::load(&path).await.unwrap();
        assert!(reloaded.tokens_for("abcd1234").await.is_empty());
        assert_eq!(reloaded.list("ffffffff").await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = TokenStore::load(&path).await.unwrap_err();
        assert!(matches!(err, TokenStoreError::Malformed { .. }));
    }
}
