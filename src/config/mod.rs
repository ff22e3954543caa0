//! Configuration for plothub.
//!
//! Settings are loaded with priority: CLI flag > env var > default.
//! A `.env` file in the working directory is loaded via dotenvy first and
//! never overrides variables already present in the environment.

mod gateway;
pub(crate) mod helpers;
mod workers;

use std::path::PathBuf;

use crate::error::ConfigError;

pub use self::gateway::{ProxyConfig, ServerConfig, SessionConfig, StaticSession};
pub use self::workers::{ContentConfig, WorkerConfig};

/// Main configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub workers: WorkerConfig,
    pub content: ContentConfig,
    pub proxy: ProxyConfig,
    pub sessions: SessionConfig,
}

/// Values given on the command line. Any `Some` wins over the environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub plot_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub worker_path: Option<PathBuf>,
    pub worker_program: Option<String>,
    pub token_path: Option<PathBuf>,
    pub worker_port_1: Option<u16>,
    pub worker_port_2: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            server: ServerConfig::resolve()?,
            workers: WorkerConfig::resolve()?,
            content: ContentConfig::resolve()?,
            proxy: ProxyConfig::resolve()?,
            sessions: SessionConfig::resolve()?,
        })
    }

    /// Apply command line overrides on top of the resolved config.
    pub fn with_overrides(mut self, cli: CliOverrides) -> Result<Self, ConfigError> {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(path) = cli.plot_path {
            self.content.plot_dir = path;
        }
        if let Some(path) = cli.data_path {
            self.content.data_dir = path;
        }
        if let Some(path) = cli.token_path {
            self.content.token_path = path;
        }
        if let Some(path) = cli.worker_path {
            self.workers.script = path;
        }
        if let Some(program) = cli.worker_program {
            self.workers.program = program;
        }
        if let Some(port) = cli.worker_port_1 {
            self.workers.ports[0] = port;
        }
        if let Some(port) = cli.worker_port_2 {
            self.workers.ports[1] = port;
        }
        if self.workers.ports[0] == self.workers.ports[1] {
            return Err(ConfigError::InvalidValue {
                key: "--worker-port-2".to_string(),
                message: format!("both workers cannot share port {}", self.workers.ports[0]),
            });
        }
        Ok(self)
    }
}
