//! Library root for `teams-bridge`.
//!
//! Teams-bridge relays messages between a multi-protocol chat relay gateway and
//! Microsoft Teams channels:
//! - Polls each joined channel and diffs successive snapshots to detect new, edited
//!   and deleted messages and replies
//! - Forwards every observed change to the gateway exactly once
//! - Posts, edits and deletes gateway messages on Teams, including mentions and images
//!
//! The remote platform is reached through a trait-abstracted client, so the
//! reconciliation engine can be driven by any implementation (or a mock).

#[deny(missing_docs)]
pub mod base;
pub mod bridge;
pub mod gateway;
pub mod prelude;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the teams-bridge runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with the Graph client
/// - Starts relaying until shutdown
pub async fn start(config: Config) -> Void {
    info!("Starting teams-bridge ...");

    // Start the crypto provider.
    crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install the crypto provider."))?;

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config)?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
