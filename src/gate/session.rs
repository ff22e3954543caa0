//! Session lookup for requests.
//!
//! Sessions are issued elsewhere; here a request either carries a known
//! session token (bearer header or cookie) or it has no session.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use serde::Serialize;

use crate::config::SessionConfig;

pub const SESSION_COOKIE: &str = "plothub_session";

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user: String,
    pub admin: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    by_token: Arc<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn from_config(config: &SessionConfig) -> Self {
        let by_token = config
            .sessions
            .iter()
            .map(|s| {
                (
                    s.token.clone(),
                    Session {
                        user: s.user.clone(),
                        admin: s.admin,
                    },
                )
            })
            .collect();
        Self {
            by_token: Arc::new(by_token),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    pub fn lookup(&self, token: &str) -> Option<Session> {
        self.by_token.get(token).cloned()
    }

    /// Resolve the session carried by a request, bearer header first.
    pub fn resolve(&self, headers: &HeaderMap) -> Option<Session> {
        bearer_token(headers)
            .and_then(|t| self.lookup(t))
            .or_else(|| session_cookie(headers).and_then(|t| self.lookup(t)))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

/// A `Cookie` header value with the session cookie taken out, or `None`
/// when nothing else is left.
pub fn without_session_cookie(value: &str) -> Option<String> {
    let rest: Vec<&str> = value
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split_once('=').map(|(name, _)| name.trim()) != Some(SESSION_COOKIE))
        .collect();
    if rest.is_empty() {
        None
    } else {
        Some(rest.join("; "))
    }
}
