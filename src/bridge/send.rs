//! Posts, edits and deletes gateway-originated messages on the remote platform.

use tracing::{debug, info, instrument};

use crate::{
    base::types::Res,
    gateway::GatewayMessage,
    service::teams::{OutgoingMessage, TeamsClient},
};

use super::{
    ids::IdMap,
    text::{MessageFormatter, escape_html, markdown_to_html},
};

/// Maps gateway requests onto the remote client's create, update and soft-delete calls.
///
/// Errors from the client are returned to the caller; nothing is retried and no id mapping
/// is recorded for a failed send.
#[derive(Clone)]
pub struct RemoteSender {
    client: TeamsClient,
    formatter: MessageFormatter,
    team_id: String,
    ids: IdMap,
}

impl RemoteSender {
    pub fn new(client: TeamsClient, formatter: MessageFormatter, team_id: impl Into<String>, ids: IdMap) -> Self {
        Self {
            client,
            formatter,
            team_id: team_id.into(),
            ids,
        }
    }

    /// Sends a gateway request, returning the remote id of the affected message.
    #[instrument(skip_all, fields(channel = %message.channel, id = %message.id))]
    pub async fn send(&self, message: &GatewayMessage) -> Res<String> {
        if message.is_delete() {
            return self.delete(message).await;
        }

        debug!("=> Receiving {:?}", message);

        if message.parent_valid() {
            return self.send_reply(message).await;
        }

        if message.parent_not_found() {
            let mut unthreaded = message.clone();
            unthreaded.parent_id.clear();
            unthreaded.text = format!("[thread]: {}", message.text);

            return self.send_top_level(&unthreaded).await;
        }

        self.send_top_level(message).await
    }

    /// Builds the html body, mention descriptors and inline images of a message.
    pub fn encode(&self, message: &GatewayMessage) -> OutgoingMessage {
        let text = if message.username.is_empty() {
            message.text.clone()
        } else {
            format!("<p><strong>{}</strong></p>\n\n{}", escape_html(&message.username), message.text)
        };

        let (text, mentions) = self.formatter.encode_mentions(&text, &message.channel);

        let mut html = markdown_to_html(&text);
        let hosted_contents = self.formatter.encode_attachments(&mut html, &message.files);

        OutgoingMessage {
            html,
            mentions,
            hosted_contents,
        }
    }

    async fn send_top_level(&self, message: &GatewayMessage) -> Res<String> {
        let body = self.encode(message);

        if !message.id.is_empty() {
            let remote_id = self.ids.resolve(&message.id);
            self.client.update_message(&self.team_id, &message.channel, &remote_id, &body).await?;

            info!("Updated message `{}`.", remote_id);

            return Ok(remote_id);
        }

        let remote_id = self.client.create_message(&self.team_id, &message.channel, &body).await?;
        self.remember(message, &remote_id);

        info!("Created message `{}`.", remote_id);

        Ok(remote_id)
    }

    async fn send_reply(&self, message: &GatewayMessage) -> Res<String> {
        let body = self.encode(message);
        let parent_id = self.ids.resolve(&message.parent_id);

        if !message.id.is_empty() {
            let remote_id = self.ids.resolve(&message.id);
            self.client.update_reply(&self.team_id, &message.channel, &parent_id, &remote_id, &body).await?;

            info!("Updated reply `{}` under `{}`.", remote_id, parent_id);

            return Ok(remote_id);
        }

        let remote_id = self.client.create_reply(&self.team_id, &message.channel, &parent_id, &body).await?;
        self.remember(message, &remote_id);

        info!("Created reply `{}` under `{}`.", remote_id, parent_id);

        Ok(remote_id)
    }

    async fn delete(&self, message: &GatewayMessage) -> Res<String> {
        let local_id = if message.id.is_empty() { &message.origin_id } else { &message.id };

        if local_id.is_empty() {
            return Err(anyhow::anyhow!("Cannot delete a message without an id"));
        }

        let remote_id = self.ids.resolve(local_id);

        if message.parent_valid() {
            let parent_id = self.ids.resolve(&message.parent_id);
            self.client.soft_delete_reply(&self.team_id, &message.channel, &parent_id, &remote_id).await?;
        } else {
            self.client.soft_delete_message(&self.team_id, &message.channel, &remote_id).await?;
        }

        info!("Deleted `{}`.", remote_id);

        Ok(remote_id)
    }

    /// Records the remote id under the request's local id, if it has one.
    fn remember(&self, message: &GatewayMessage, remote_id: &str) {
        if !message.origin_id.is_empty() {
            self.ids.insert(&message.origin_id, remote_id);
        }
    }
}
