//! plothub: blue/green restarts for two plot rendering workers, plus a
//! token-gated reverse proxy that always targets the live one.

pub mod config;
pub mod content;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod orchestrator;
pub mod registry;
pub mod testing;

pub use config::Config;
pub use error::{
    ConfigError, ContentError, OrchestratorError, ProxyError, TokenStoreError, WriteError,
};
