//! Maps change events onto gateway envelopes and hands them to the gateway.

use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    base::types::Res,
    gateway::{FileAttachment, GatewayEvent, GatewayMessage, GatewaySender},
    service::teams::{RemoteAttachment, RemoteMessage, TeamsClient},
};

use super::{reconcile::ChangeEvent, text::MessageFormatter};

/// Content type of a code snippet card.
const CODE_SNIPPET_CONTENT_TYPE: &str = "application/vnd.microsoft.card.codesnippet";

/// Number of `/`-separated segments in a well-formed snippet URL.
const CODE_SNIPPET_URL_SEGMENTS: usize = 13;

/// The inline content of a code snippet card.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeSnippet {
    #[serde(default)]
    language: String,
    code_snippet_url: String,
}

/// Turns [`ChangeEvent`]s into [`GatewayMessage`]s and delivers them in order.
#[derive(Clone)]
pub struct Dispatcher {
    client: TeamsClient,
    formatter: MessageFormatter,
    gateway: GatewaySender,
    account: String,
    media_download_size: usize,
}

impl Dispatcher {
    pub fn new(client: TeamsClient, formatter: MessageFormatter, gateway: GatewaySender, account: impl Into<String>, media_download_size: usize) -> Self {
        Self {
            client,
            formatter,
            gateway,
            account: account.into(),
            media_download_size,
        }
    }

    /// Whether the gateway stopped accepting events.
    pub fn is_closed(&self) -> bool {
        self.gateway.is_closed()
    }

    /// Delivers the events of one poll cycle, in order.
    ///
    /// Waits whenever the gateway applies backpressure. Fails only if the gateway is gone.
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn dispatch(&self, channel: &str, events: Vec<ChangeEvent>) -> Res<usize> {
        let mut delivered = 0;

        for event in events {
            let message = self.to_gateway_message(channel, &event).await;

            info!("Forwarding {} `{}` from `{}` on {}.", event.kind(), message.id, message.username, self.account);

            self.gateway.send(message).await.map_err(|_| anyhow::anyhow!("Gateway channel closed"))?;

            delivered += 1;
        }

        Ok(delivered)
    }

    /// Builds the envelope for a single event.
    pub async fn to_gateway_message(&self, channel: &str, event: &ChangeEvent) -> GatewayMessage {
        let remote = event.message();
        let (username, user_id) = remote.author.as_ref().map(|a| (a.display_name.clone(), a.id.clone())).unwrap_or_default();

        let mut message = GatewayMessage {
            id: remote.id.clone(),
            parent_id: event.parent_id().unwrap_or_default().to_string(),
            username,
            user_id,
            channel: channel.to_string(),
            account: self.account.clone(),
            ..Default::default()
        };

        if event.is_delete() {
            message.event = GatewayEvent::MessageDelete;
            return message;
        }

        message.text = self.formatter.to_gateway_text(remote);
        self.handle_attachments(&mut message, remote).await;

        message
    }

    /// Adds the attachments of `remote` to `message`; failures are logged and skipped.
    async fn handle_attachments(&self, message: &mut GatewayMessage, remote: &RemoteMessage) {
        for attachment in &remote.attachments {
            if attachment.content_type == CODE_SNIPPET_CONTENT_TYPE {
                if let Err(e) = self.handle_code_snippet(message, attachment).await {
                    error!("Code snippet on `{}` skipped: {}", remote.id, e);
                }
                continue;
            }

            let Some(url) = attachment.content_url.as_deref() else {
                debug!("Ignoring attachment of type `{}` without content url.", attachment.content_type);
                continue;
            };

            let name = attachment.name.clone().unwrap_or_else(|| url.rsplit('/').next().unwrap_or_default().to_string());

            match self.client.download_attachment(url).await {
                Ok(data) if data.len() > self.media_download_size => {
                    warn!("Not forwarding `{}`: {} bytes exceeds the limit of {}.", name, data.len(), self.media_download_size);
                }
                Ok(data) => message.files.push(FileAttachment {
                    name,
                    data,
                    url: url.to_string(),
                    comment: String::new(),
                }),
                Err(e) => error!("Download of `{}` failed: {}", name, e),
            }
        }
    }

    /// Appends a code snippet to the text as a fenced block.
    async fn handle_code_snippet(&self, message: &mut GatewayMessage, attachment: &RemoteAttachment) -> Res<()> {
        let content = attachment.content.as_deref().ok_or_else(|| anyhow::anyhow!("Snippet has no content"))?;
        let snippet: CodeSnippet = serde_json::from_str(content)?;

        let segments = snippet.code_snippet_url.split('/').count();
        if segments != CODE_SNIPPET_URL_SEGMENTS {
            return Err(anyhow::anyhow!("Snippet url has unexpected shape: {}", snippet.code_snippet_url));
        }

        let code = self.client.download_attachment(&snippet.code_snippet_url).await?;

        message.text.push_str(&format!("\n```{}\n{}\n```\n", snippet.language, String::from_utf8_lossy(&code)));

        Ok(())
    }
}
