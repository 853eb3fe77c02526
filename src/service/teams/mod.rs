//! Remote platform client abstraction for the teams-bridge.
//!
//! The reconciler and the send path only ever talk to a [`GenericTeamsClient`], so the
//! concrete Graph implementation can be swapped out (e.g., for a mock in tests).

pub mod graph;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::base::types::{Res, Void};

// Traits.

/// Generic remote platform trait that clients must implement.
///
/// Every operation maps onto a single request against the remote platform. Errors are
/// returned verbatim (with context) and never retried here.
#[async_trait]
pub trait GenericTeamsClient: Send + Sync + 'static {
    /// Resolve the identity the client is authenticated as.
    ///
    /// Called once at connect time; used to suppress echoes of our own posts.
    async fn resolve_self_identity(&self) -> Res<String>;

    /// Fetch the current snapshot of a channel.
    ///
    /// Returns top-level messages newest first, each with its replies nested.
    async fn fetch_snapshot(&self, team_id: &str, channel_id: &str) -> Res<Vec<RemoteMessage>>;

    /// Post a new top-level message, returning its remote id.
    async fn create_message(&self, team_id: &str, channel_id: &str, message: &OutgoingMessage) -> Res<String>;

    /// Post a new reply under `parent_id`, returning its remote id.
    async fn create_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, message: &OutgoingMessage) -> Res<String>;

    /// Replace the content of a top-level message.
    async fn update_message(&self, team_id: &str, channel_id: &str, message_id: &str, message: &OutgoingMessage) -> Void;

    /// Replace the content of a reply.
    async fn update_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, reply_id: &str, message: &OutgoingMessage) -> Void;

    /// Soft-delete a top-level message.
    async fn soft_delete_message(&self, team_id: &str, channel_id: &str, message_id: &str) -> Void;

    /// Soft-delete a reply.
    async fn soft_delete_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, reply_id: &str) -> Void;

    /// Download the content behind an attachment or snippet URL.
    async fn download_attachment(&self, url: &str) -> Res<Vec<u8>>;
}

// Structs.

/// Remote platform client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct TeamsClient {
    inner: Arc<dyn GenericTeamsClient>,
}

impl Deref for TeamsClient {
    type Target = dyn GenericTeamsClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl TeamsClient {
    pub fn new(inner: Arc<dyn GenericTeamsClient>) -> Self {
        Self { inner }
    }
}

// Remote data model.

/// The author of a remote message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAuthor {
    pub id: String,
    pub display_name: String,
}

/// How a remote body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyKind {
    #[default]
    Text,
    Html,
}

/// A file or card attached to a remote message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteAttachment {
    pub content_type: String,
    pub name: Option<String>,
    pub content_url: Option<String>,
    /// Inline content, e.g. the JSON description of a code snippet card.
    pub content: Option<String>,
}

/// Whom a mention points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MentionKind {
    User,
    Channel,
}

/// A mention inside a remote body, referenced by `<at id="N">` markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMention {
    pub id: i64,
    pub mention_text: String,
    pub target_id: Option<String>,
    pub kind: MentionKind,
}

/// A message as observed in one snapshot.
///
/// Replies share this shape; their own `replies` list is always empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    /// Absent for system and application messages.
    pub author: Option<RemoteAuthor>,
    pub body: String,
    pub body_kind: BodyKind,
    pub created: DateTime<Utc>,
    pub last_modified: Option<DateTime<Utc>>,
    pub deleted: Option<DateTime<Utc>>,
    pub replies: Vec<RemoteMessage>,
    pub attachments: Vec<RemoteAttachment>,
    pub mentions: Vec<RemoteMention>,
}

impl RemoteMessage {
    /// Creates a plain text message authored by nobody; handy as a builder base.
    pub fn new(id: impl Into<String>, body: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            author: None,
            body: body.into(),
            body_kind: BodyKind::Text,
            created,
            last_modified: None,
            deleted: None,
            replies: Vec::new(),
            attachments: Vec::new(),
            mentions: Vec::new(),
        }
    }

    /// The timestamp used for change detection: last-modified, else deleted, else created.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.last_modified.or(self.deleted).unwrap_or(self.created)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// Whether the message was authored by the given identity.
    pub fn is_authored_by(&self, identity: &str) -> bool {
        self.author.as_ref().is_some_and(|a| a.id == identity)
    }
}

// Outgoing data model.

/// A channel mention referenced from the outgoing html by its index.
///
/// User mentions need a remote user id, which relayed names do not carry, so only
/// `@channel` / `@all` become mentions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMention {
    pub id: usize,
    pub mention_text: String,
    pub channel_id: String,
}

/// An image embedded inline through a temporary id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedContent {
    pub temporary_id: String,
    pub content_type: String,
    /// Base64 encoded bytes.
    pub content_bytes: String,
}

/// A fully encoded message body ready to be created or updated remotely.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub html: String,
    pub mentions: Vec<OutgoingMention>,
    pub hosted_contents: Vec<HostedContent>,
}

// Tests.
