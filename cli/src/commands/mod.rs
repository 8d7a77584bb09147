//! Subcommand implementations.

pub mod auth;
pub mod diff;
pub mod range;
mod render;
pub mod sync;

use anyhow::{Context, Result};
use keysync_engine::Connection;

use crate::config::Config;
use crate::gateway::GatewayStore;

/// Open a retrying connection from the environment.
pub fn connect() -> Result<Connection<GatewayStore>> {
    let config = Config::from_env().context("invalid configuration")?;
    tracing::debug!(endpoints = ?config.endpoints, retries = config.retries, "connecting");
    Ok(Connection::new(
        GatewayStore::from_config(&config),
        config.retry_policy(),
    ))
}
