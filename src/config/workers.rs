use std::path::PathBuf;

use crate::config::helpers::{parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// How the two rendering workers are launched and reached.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interpreter or binary used to start a worker (e.g. "python3").
    pub program: String,
    /// Script handed to `program`; the worker port is appended after it.
    pub script: PathBuf,
    /// Ports of the two worker slots. The second one starts out active.
    pub ports: [u16; 2],
    /// Host the workers listen on.
    pub upstream_host: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            script: PathBuf::from("./worker/server.py"),
            ports: [8001, 8002],
            upstream_host: "127.0.0.1".to_string(),
        }
    }
}

impl WorkerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let ports = [
            parse_optional_env("PLOTHUB_WORKER_PORT_1", defaults.ports[0])?,
            parse_optional_env("PLOTHUB_WORKER_PORT_2", defaults.ports[1])?,
        ];
        if ports[0] == ports[1] {
            return Err(ConfigError::InvalidValue {
                key: "PLOTHUB_WORKER_PORT_2".to_string(),
                message: format!("both workers cannot share port {}", ports[0]),
            });
        }
        Ok(Self {
            program: parse_string_env("PLOTHUB_WORKER_PROGRAM", defaults.program)?,
            script: PathBuf::from(parse_string_env(
                "PLOTHUB_WORKER_SCRIPT",
                defaults.script.display().to_string(),
            )?),
            ports,
            upstream_host: parse_string_env("PLOTHUB_UPSTREAM_HOST", defaults.upstream_host)?,
        })
    }
}

/// Locations of the content shared by both workers.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Directory holding `plot_<id>.py` files.
    pub plot_dir: PathBuf,
    /// Directory holding uploaded datasets.
    pub data_dir: PathBuf,
    /// JSON file with per-artifact access tokens.
    pub token_path: PathBuf,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            plot_dir: PathBuf::from("./worker/plots/"),
            data_dir: PathBuf::from("./worker/data/datasets/"),
            token_path: PathBuf::from("./config/tokens.json"),
        }
    }
}

impl ContentConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            plot_dir: PathBuf::from(parse_string_env(
                "PLOTHUB_PLOT_PATH",
                defaults.plot_dir.display().to_string(),
            )?),
            data_dir: PathBuf::from(parse_string_env(
                "PLOTHUB_DATA_PATH",
                defaults.data_dir.display().to_string(),
            )?),
            token_path: PathBuf::from(parse_string_env(
                "PLOTHUB_TOKEN_PATH",
                defaults.token_path.display().to_string(),
            )?),
        })
    }
}
