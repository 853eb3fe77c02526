//! The common message envelope shared with the relay gateway.
//!
//! Events observed on the remote platform are handed to the gateway as [`GatewayMessage`]s,
//! and the gateway asks the bridge to post, edit or delete messages with the same envelope.

pub mod stdio;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use tokio::sync::mpsc;

/// Parent id the gateway uses when the thread of a relayed reply is unknown here.
pub const PARENT_NOT_FOUND: &str = "msg-parent-not-found";

/// Handoff into the gateway's inbound channel.
pub type GatewaySender = mpsc::Sender<GatewayMessage>;

/// What happened to the message carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A new or edited message.
    #[default]
    Message,
    /// The message was deleted.
    MessageDelete,
}

/// A file travelling with an envelope.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAttachment {
    pub name: String,
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,
    /// Where the file was fetched from, if anywhere.
    pub url: String,
    pub comment: String,
}

/// The gateway message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayMessage {
    /// Remote id of the message; empty for a new outbound message.
    pub id: String,
    /// Provisional local id the gateway assigned to an outbound message.
    pub origin_id: String,
    /// Id of the top-level message this one replies to; empty for top-level messages.
    pub parent_id: String,
    pub text: String,
    pub username: String,
    pub user_id: String,
    pub channel: String,
    pub account: String,
    pub event: GatewayEvent,
    pub files: Vec<FileAttachment>,
}

impl GatewayMessage {
    pub fn is_delete(&self) -> bool {
        self.event == GatewayEvent::MessageDelete
    }

    /// Whether the message replies to a thread that can be addressed.
    pub fn parent_valid(&self) -> bool {
        !self.parent_id.is_empty() && self.parent_id != PARENT_NOT_FOUND
    }

    /// Whether the gateway could not find the thread of a reply.
    pub fn parent_not_found(&self) -> bool {
        self.parent_id == PARENT_NOT_FOUND
    }
}

// Tests.
