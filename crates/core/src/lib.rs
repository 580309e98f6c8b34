//! Core functionality for the Waymark local-first sync engine.
//!
//! This crate provides the configuration, logging, clock and error types
//! shared by every other crate in the workspace.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, HubConfig, NodeConfig, QualityConfig, RelayConfig, RelayEndpointConfig, SyncConfig,
};
pub use error::{CoreError, Result};
