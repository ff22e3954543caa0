//! Authorization for proxied artifact traffic.
//!
//! A request may reach an artifact if it presents one of that artifact's
//! tokens, or if it carries any session at all.

pub mod session;
pub mod tokens;

use std::collections::HashSet;

pub use session::{SESSION_COOKIE, Session, SessionStore, without_session_cookie};
pub use tokens::{AccessToken, TokenStore};

#[derive(Debug, Clone)]
pub struct AccessGate {
    tokens: TokenStore,
}

impl AccessGate {
    pub fn new(tokens: TokenStore) -> Self {
        Self { tokens }
    }

    /// Current token values for an artifact; empty when none are registered.
    pub async fn tokens_for(&self, artifact: &str) -> HashSet<String> {
        self.tokens.tokens_for(artifact).await
    }

    pub async fn authorize(
        &self,
        artifact: &str,
        presented: Option<&str>,
        session: Option<&Session>,
    ) -> bool {
        if session.is_some() {
            return true;
        }
        match presented {
            Some(token) => self.tokens_for(artifact).await.contains(token),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn gate_with_token() -> (AccessGate, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tokens = TokenStore::load(dir.path().join("tokens.json")).await.unwrap();
        let token = tokens.create("p1p1p1p1", "alice").await.unwrap().token;
        (AccessGate::new(tokens), token, dir)
    }

    fn session() -> Session {
        Session {
            user: "admin".into(),
            admin: true,
        }
    }

    #[tokio::test]
    async fn registered_token_without_session_is_authorized() {
        let (gate, token, _dir) = gate_with_token().await;
        assert!(gate.authorize("p1p1p1p1", Some(&token), None).await);
    }

    #[tokio::test]
    async fn wrong_token_without_session_is_denied() {
        let (gate, _token, _dir) = gate_with_token().await;
        assert!(!gate.authorize("p1p1p1p1", Some("wrong"), None).await);
        assert!(!gate.authorize("p1p1p1p1", None, None).await);
    }

    #[tokio::test]
    async fn session_without_token_is_authorized() {
        let (gate, _token, _dir) = gate_with_token().await;
        assert!(gate.authorize("p1p1p1p1", None, Some(&session())).await);
    }

    #[tokio::test]
    async fn token_is_scoped_to_its_artifact() {
        let (gate, token, _dir) = gate_with_token().await;
        assert!(!gate.authorize("ffffffff", Some(&token), None).await);
        assert!(gate.tokens_for("ffffffff").await.is_empty());
    }
}
