use crate::config::helpers::{optional_env, parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// Public HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL, handed to workers when they build
    /// absolute script URLs.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_url: "http://localhost:8000".to_string(),
        }
    }
}

impl ServerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let public_url = parse_string_env("PLOTHUB_PUBLIC_URL", defaults.public_url)?;
        Ok(Self {
            host: parse_string_env("PLOTHUB_HOST", defaults.host)?,
            port: parse_optional_env("PLOTHUB_PORT", defaults.port)?,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Reverse proxy behaviour.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Where denied WebSocket upgrades are sent. Nothing should listen here.
    pub blackhole_addr: String,
    /// Timeout for plain HTTP requests to a worker.
    pub upstream_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            blackhole_addr: "127.0.0.1:7000".to_string(),
            upstream_timeout_secs: 30,
        }
    }
}

impl ProxyConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            blackhole_addr: parse_string_env("PLOTHUB_BLACKHOLE_ADDR", defaults.blackhole_addr)?,
            upstream_timeout_secs: parse_optional_env(
                "PLOTHUB_UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout_secs,
            )?,
        })
    }
}

/// A session token configured ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSession {
    pub user: String,
    pub token: String,
    pub admin: bool,
}

impl StaticSession {
    /// Parse `"user:token"` or `"user:token:admin"`. Returns `None` if malformed.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().splitn(3, ':');
        let user = parts.next()?.trim();
        let token = parts.next()?.trim();
        if user.is_empty() || token.is_empty() {
            return None;
        }
        let admin = match parts.next().map(str::trim) {
            None => false,
            Some("admin") => true,
            Some(_) => return None,
        };
        Some(Self {
            user: user.to_string(),
            token: token.to_string(),
            admin,
        })
    }
}

/// Sessions accepted by the gateway.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub sessions: Vec<StaticSession>,
}

impl SessionConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let Some(raw) = optional_env("PLOTHUB_SESSION_TOKENS")? else {
            return Ok(Self::default());
        };
        let mut sessions = Vec::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let session =
                StaticSession::parse(entry).ok_or_else(|| ConfigError::InvalidValue {
                    key: "PLOTHUB_SESSION_TOKENS".to_string(),
                    message: "entries must look like user:token or user:token:admin"
                        .to_string(),
                })?;
            sessions.push(session);
        }
        Ok(Self { sessions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_session_parses_admin_flag() {
        let s = StaticSession::parse("alice:s3cret:admin").unwrap();
        assert_eq!(s.user, "alice");
        assert_eq!(s.token, "s3cret");
        assert!(s.admin);

        let s = StaticSession::parse(" bob : t0k ").unwrap();
        assert!(!s.admin);
        assert_eq!(s.token, "t0k");
    }

    #[test]
    fn static_session_rejects_garbage() {
        assert!(StaticSession::parse("nocolon").is_none());
        assert!(StaticSession::parse(":token").is_none());
        assert!(StaticSession::parse("user:token:root").is_none());
    }
}
