//! Runtime services and shared state for the teams-bridge.

use tokio::sync::mpsc;

use crate::{bridge::Bridge, gateway::stdio, prelude::*, service::teams::TeamsClient};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the remote client and configuration.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The remote platform client instance.
    pub client: TeamsClient,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub fn new(config: Config) -> Res<Self> {
        // Initialize the Graph client.
        let client = TeamsClient::graph(&config)?;

        Ok(Self { config, client })
    }

    /// Connects the bridge, joins every configured channel, and relays between the remote
    /// platform and the gateway on stdio until Ctrl-C.
    pub async fn start(&self) -> Void {
        // Wire the gateway transport.

        let (events_tx, events_rx) = mpsc::channel(self.config.gateway_buffer);
        let (requests_tx, mut requests_rx) = mpsc::channel(self.config.gateway_buffer);

        let writer = tokio::spawn(stdio::write_events(events_rx, tokio::io::stdout()));
        stdio::spawn_stdin_reader(requests_tx)?;

        // Connect and join.

        let bridge = Bridge::connect(&self.config, self.client.clone(), events_tx).await?;

        for channel in &self.config.channels {
            bridge.join_channel(channel);
        }

        // Relay gateway requests until shutdown.

        let mut requests_open = true;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down ...");
                    break;
                }
                request = requests_rx.recv(), if requests_open => match request {
                    Some(message) => match bridge.send(&message).await {
                        Ok(remote_id) => info!("Relayed gateway message as `{}`.", remote_id),
                        Err(e) => error!("Failed to relay gateway message: {}", e),
                    },
                    None => {
                        info!("Gateway request stream closed.");
                        requests_open = false;
                    }
                },
            }
        }

        drop(requests_rx);

        bridge.disconnect().await;
        drop(bridge);

        writer.await??;

        Ok(())
    }
}
