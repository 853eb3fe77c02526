//! The per-channel poll loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::{base::types::Res, service::teams::TeamsClient};

use super::{dispatch::Dispatcher, reconcile::Reconciler};

/// Polls one channel on a fixed interval and forwards what changed.
///
/// Owns its [`Reconciler`] (and thus the channel's conversation state) exclusively.
pub struct ChannelPoller {
    client: TeamsClient,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    team_id: String,
    channel: String,
    interval: Duration,
}

impl ChannelPoller {
    pub fn new(client: TeamsClient, dispatcher: Dispatcher, reconciler: Reconciler, team_id: impl Into<String>, channel: impl Into<String>, interval: Duration) -> Self {
        Self {
            client,
            dispatcher,
            reconciler,
            team_id: team_id.into(),
            channel: channel.into(),
            interval,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Runs one cycle: fetch, reconcile, deliver. Returns the number of delivered events.
    ///
    /// A failed fetch leaves the conversation state untouched.
    pub async fn poll_once(&mut self) -> Res<usize> {
        let snapshot = self.client.fetch_snapshot(&self.team_id, &self.channel).await?;

        let baseline = !self.reconciler.has_baseline();
        let events = self.reconciler.reconcile(&snapshot);

        if baseline {
            debug!("Got initial messages for `{}`.", self.channel);
        }

        self.dispatcher.dispatch(&self.channel, events).await
    }

    /// Polls until `cancel` fires or the gateway goes away. Errors never end the loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        let span = info_span!("poll", channel = %self.channel);

        async move {
            info!("Polling channel every {:?}.", self.interval);

            loop {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = self.poll_once() => result,
                };

                if let Err(e) = result {
                    if self.dispatcher.is_closed() {
                        info!("Gateway closed; stopping.");
                        break;
                    }

                    error!("Polling failed for `{}`: {}. Retrying in {:?}.", self.channel, e, self.interval);
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            info!("Stopped polling.");
        }
        .instrument(span)
        .await
    }
}
