//! kintone REST client and configuration shared by the MCP front ends.

pub mod apps;
pub mod client;
pub mod config;
pub mod error;

pub use client::{KintoneClient, KintoneClientHolder};
pub use config::{KintoneArgs, KintoneAuth, KintoneClientConfig};
pub use error::{ClientError, ConfigError};
