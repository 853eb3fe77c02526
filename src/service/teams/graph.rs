//! Microsoft Graph implementation of the remote platform client.
//!
//! Channel messages are read and written through the `teams/{team}/channels/{channel}/messages`
//! resources of the Graph API, authenticated with a bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::skip_serializing_none;
use tracing::{debug, info, instrument, warn};

use crate::base::{
    config::Config,
    types::{Res, Void},
};

use super::{
    BodyKind, GenericTeamsClient, MentionKind, OutgoingMessage, RemoteAttachment, RemoteAuthor, RemoteMention, RemoteMessage,
    TeamsClient,
};

// Extra methods on `TeamsClient` applied by the graph implementation.

impl TeamsClient {
    /// Creates a new Graph backed client.
    pub fn graph(config: &Config) -> Res<Self> {
        let client = GraphTeamsClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Wire types.

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[skip_serializing_none]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphIdentity {
    id: Option<String>,
    display_name: Option<String>,
    conversation_identity_type: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphIdentitySet {
    user: Option<GraphIdentity>,
    conversation: Option<GraphIdentity>,
    application: Option<GraphIdentity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphItemBody {
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    content_type: Option<String>,
    content_url: Option<String>,
    content: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMention {
    id: i64,
    mention_text: Option<String>,
    mentioned: Option<GraphIdentitySet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphChatMessage {
    id: String,
    created_date_time: Option<DateTime<Utc>>,
    last_modified_date_time: Option<DateTime<Utc>>,
    deleted_date_time: Option<DateTime<Utc>>,
    from: Option<GraphIdentitySet>,
    body: Option<GraphItemBody>,
    #[serde(default)]
    replies: Vec<GraphChatMessage>,
    #[serde(default)]
    attachments: Vec<GraphAttachment>,
    #[serde(default)]
    mentions: Vec<GraphMention>,
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphItemBodyOut<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMentionOut<'a> {
    id: usize,
    mention_text: &'a str,
    mentioned: GraphIdentitySet,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphHostedContentOut<'a> {
    #[serde(rename = "@microsoft.graph.temporaryId")]
    temporary_id: &'a str,
    content_bytes: &'a str,
    content_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphChatMessageOut<'a> {
    body: GraphItemBodyOut<'a>,
    mentions: Vec<GraphMentionOut<'a>>,
    hosted_contents: Vec<GraphHostedContentOut<'a>>,
}

// Conversions.

impl GraphChatMessage {
    /// Converts into the remote data model; messages without a creation time are dropped.
    fn into_remote(self) -> Option<RemoteMessage> {
        let Some(created) = self.created_date_time else {
            warn!("Skipping message `{}` without a creation time.", self.id);
            return None;
        };

        let author = self.from.and_then(|f| f.user).and_then(|u| {
            let id = u.id?;
            Some(RemoteAuthor {
                id,
                display_name: u.display_name.unwrap_or_default(),
            })
        });

        let (body, body_kind) = match self.body {
            Some(GraphItemBody { content_type, content }) => {
                let kind = match content_type.as_deref() {
                    Some(t) if t.eq_ignore_ascii_case("html") => BodyKind::Html,
                    _ => BodyKind::Text,
                };
                (content.unwrap_or_default(), kind)
            }
            None => (String::new(), BodyKind::Text),
        };

        let attachments = self
            .attachments
            .into_iter()
            .map(|a| RemoteAttachment {
                content_type: a.content_type.unwrap_or_default(),
                name: a.name,
                content_url: a.content_url,
                content: a.content,
            })
            .collect();

        let mentions = self
            .mentions
            .into_iter()
            .map(|m| {
                let mentioned = m.mentioned.unwrap_or_default();
                let (kind, target_id) = match (mentioned.conversation, mentioned.user) {
                    (Some(c), _) => (MentionKind::Channel, c.id),
                    (None, Some(u)) => (MentionKind::User, u.id),
                    (None, None) => (MentionKind::User, None),
                };
                RemoteMention {
                    id: m.id,
                    mention_text: m.mention_text.unwrap_or_default(),
                    target_id,
                    kind,
                }
            })
            .collect();

        let replies = self
            .replies
            .into_iter()
            .filter_map(|r| {
                let mut reply = r.into_remote()?;
                reply.replies.clear();
                Some(reply)
            })
            .collect();

        Some(RemoteMessage {
            id: self.id,
            author,
            body,
            body_kind,
            created,
            last_modified: self.last_modified_date_time,
            deleted: self.deleted_date_time,
            replies,
            attachments,
            mentions,
        })
    }
}

impl<'a> From<&'a OutgoingMessage> for GraphChatMessageOut<'a> {
    fn from(message: &'a OutgoingMessage) -> Self {
        let mentions = message
            .mentions
            .iter()
            .map(|m| GraphMentionOut {
                id: m.id,
                mention_text: &m.mention_text,
                mentioned: GraphIdentitySet {
                    conversation: Some(GraphIdentity {
                        id: Some(m.channel_id.clone()),
                        display_name: Some(m.mention_text.clone()),
                        conversation_identity_type: Some("channel".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            })
            .collect();

        let hosted_contents = message
            .hosted_contents
            .iter()
            .map(|h| GraphHostedContentOut {
                temporary_id: &h.temporary_id,
                content_bytes: &h.content_bytes,
                content_type: &h.content_type,
            })
            .collect();

        Self {
            body: GraphItemBodyOut {
                content_type: "html",
                content: &message.html,
            },
            mentions,
            hosted_contents,
        }
    }
}

// Specific implementations.

/// Graph client implementation.
#[derive(Clone)]
struct GraphTeamsClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphTeamsClient {
    /// Create a new Graph client.
    #[instrument(name = "GraphTeamsClient::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        if config.access_token.is_empty() {
            return Err(anyhow::anyhow!("An access token must be configured."));
        }

        let http = reqwest::Client::builder().user_agent(concat!("teams-bridge/", env!("CARGO_PKG_VERSION"))).build()?;

        info!("Graph client targets `{}`.", config.graph_base_url);

        Ok(Self {
            http,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn messages_url(&self, team_id: &str, channel_id: &str) -> String {
        format!("{}/teams/{}/channels/{}/messages", self.base_url, team_id, channel_id)
    }

    fn replies_url(&self, team_id: &str, channel_id: &str, parent_id: &str) -> String {
        format!("{}/{}/replies", self.messages_url(team_id, channel_id), parent_id)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Res<T> {
        let response = self.http.get(url).bearer_auth(&self.access_token).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &GraphChatMessageOut<'_>) -> Res<T> {
        let response = self.http.post(url).bearer_auth(&self.access_token).json(body).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn patch(&self, url: &str, body: &GraphChatMessageOut<'_>) -> Void {
        self.http.patch(url).bearer_auth(&self.access_token).json(body).send().await?.error_for_status()?;
        Ok(())
    }

    async fn soft_delete(&self, url: &str) -> Void {
        self.http
            .post(format!("{url}/softDelete"))
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl GenericTeamsClient for GraphTeamsClient {
    #[instrument(skip(self))]
    async fn resolve_self_identity(&self) -> Res<String> {
        let me: GraphUser = self
            .get_json(&format!("{}/me", self.base_url))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to resolve own identity: {}", e))?;

        Ok(me.id)
    }

    #[instrument(skip(self))]
    async fn fetch_snapshot(&self, team_id: &str, channel_id: &str) -> Res<Vec<RemoteMessage>> {
        let url = format!("{}?$expand=replies", self.messages_url(team_id, channel_id));

        let list: GraphList<GraphChatMessage> = self.get_json(&url).await.map_err(|e| anyhow::anyhow!("Failed to fetch messages: {}", e))?;

        debug!("Got {} messages.", list.value.len());

        Ok(list.value.into_iter().filter_map(GraphChatMessage::into_remote).collect())
    }

    #[instrument(skip(self, message))]
    async fn create_message(&self, team_id: &str, channel_id: &str, message: &OutgoingMessage) -> Res<String> {
        let url = self.messages_url(team_id, channel_id);

        let created: GraphChatMessage = self
            .post_json(&url, &GraphChatMessageOut::from(message))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create message: {}", e))?;

        Ok(created.id)
    }

    #[instrument(skip(self, message))]
    async fn create_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, message: &OutgoingMessage) -> Res<String> {
        let url = self.replies_url(team_id, channel_id, parent_id);

        let created: GraphChatMessage = self
            .post_json(&url, &GraphChatMessageOut::from(message))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create reply: {}", e))?;

        Ok(created.id)
    }

    #[instrument(skip(self, message))]
    async fn update_message(&self, team_id: &str, channel_id: &str, message_id: &str, message: &OutgoingMessage) -> Void {
        let url = format!("{}/{}", self.messages_url(team_id, channel_id), message_id);

        self.patch(&url, &GraphChatMessageOut::from(message))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to update message: {}", e))
    }

    #[instrument(skip(self, message))]
    async fn update_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, reply_id: &str, message: &OutgoingMessage) -> Void {
        let url = format!("{}/{}", self.replies_url(team_id, channel_id, parent_id), reply_id);

        self.patch(&url, &GraphChatMessageOut::from(message))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to update reply: {}", e))
    }

    #[instrument(skip(self))]
    async fn soft_delete_message(&self, team_id: &str, channel_id: &str, message_id: &str) -> Void {
        let url = format!("{}/{}", self.messages_url(team_id, channel_id), message_id);

        self.soft_delete(&url).await.map_err(|e| anyhow::anyhow!("Failed to delete message: {}", e))
    }

    #[instrument(skip(self))]
    async fn soft_delete_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, reply_id: &str) -> Void {
        let url = format!("{}/{}", self.replies_url(team_id, channel_id, parent_id), reply_id);

        self.soft_delete(&url).await.map_err(|e| anyhow::anyhow!("Failed to delete reply: {}", e))
    }

    #[instrument(skip(self))]
    async fn download_attachment(&self, url: &str) -> Res<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| anyhow::anyhow!("Failed to download `{}`: {}", url, e))?;

        let bytes = response.bytes().await.map_err(|e| anyhow::anyhow!("Failed to read `{}`: {}", url, e))?;

        Ok(bytes.to_vec())
    }
}

// Tests.
