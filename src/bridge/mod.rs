//! The bridge between a relay gateway and the remote platform.
//!
//! Inbound, every joined channel runs its own poll loop:
//!
//! ```text
//!  fetch_snapshot ──► Reconciler (per-channel state) ──► Dispatcher ──► gateway
//! ```
//!
//! Outbound, gateway requests go through the [`RemoteSender`] straight to the client.
//! The only state shared between the two directions is the [`IdMap`].

pub mod dispatch;
pub mod ids;
pub mod poll;
pub mod reconcile;
pub mod send;
pub mod state;
pub mod text;

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::{
    base::{config::Config, types::Res},
    gateway::{GatewayMessage, GatewaySender},
    service::teams::TeamsClient,
};

use dispatch::Dispatcher;
use ids::IdMap;
use poll::ChannelPoller;
use reconcile::Reconciler;
use send::RemoteSender;
use text::MessageFormatter;

/// A connected bridge.
///
/// Join channels to start relaying them to the gateway; call [`Bridge::send`] to relay
/// gateway messages to the remote platform; call [`Bridge::disconnect`] to stop.
pub struct Bridge {
    config: Config,
    client: TeamsClient,
    bot_id: String,
    dispatcher: Dispatcher,
    sender: RemoteSender,
    ids: IdMap,
    cancel: CancellationToken,
    channels: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Bridge {
    /// Connects the bridge, resolving the identity it posts as.
    #[instrument(name = "Bridge::connect", skip_all)]
    pub async fn connect(config: &Config, client: TeamsClient, gateway: GatewaySender) -> Res<Self> {
        let bot_id = client.resolve_self_identity().await?;

        info!("Bot user ID: {}", bot_id);

        let formatter = MessageFormatter::new(&config.attachment_tag_pattern)?;
        let ids = IdMap::new(config.id_map_capacity, config.id_map_retention());

        let dispatcher = Dispatcher::new(client.clone(), formatter.clone(), gateway, config.account.clone(), config.media_download_size);
        let sender = RemoteSender::new(client.clone(), formatter, config.team_id.clone(), ids.clone());

        info!("Connection succeeded.");

        Ok(Self {
            config: config.clone(),
            client,
            bot_id,
            dispatcher,
            sender,
            ids,
            cancel: CancellationToken::new(),
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// The identity the bridge posts as.
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn ids(&self) -> &IdMap {
        &self.ids
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Builds a poller for `channel` with fresh, empty conversation state.
    pub fn channel_poller(&self, channel: &str) -> ChannelPoller {
        let reconciler = Reconciler::new(self.bot_id.clone()).with_message_dump(self.config.debug);

        ChannelPoller::new(
            self.client.clone(),
            self.dispatcher.clone(),
            reconciler,
            self.config.team_id.clone(),
            channel,
            self.config.poll_interval(),
        )
    }

    /// Starts polling `channel` in the background. Joining a channel twice is a no-op.
    #[instrument(skip(self))]
    pub fn join_channel(&self, channel: &str) {
        let mut channels = self.channels();

        if channels.contains_key(channel) {
            warn!("Channel `{}` already joined.", channel);
            return;
        }

        let poller = self.channel_poller(channel);
        let handle = tokio::spawn(poller.run(self.cancel.child_token()));

        channels.insert(channel.to_string(), handle);

        info!("Joined channel `{}`.", channel);
    }

    /// Relays a gateway message to the remote platform, returning the remote id.
    pub async fn send(&self, message: &GatewayMessage) -> Res<String> {
        self.sender.send(message).await
    }

    /// Stops every poll loop and waits for them to finish.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        self.cancel.cancel();

        let handles: Vec<_> = self.channels().drain().map(|(_, handle)| handle).collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Poll loop ended abnormally: {}", e);
            }
        }

        info!("Disconnected.");
    }
}
