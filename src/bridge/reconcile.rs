//! Turns successive channel snapshots into change events.
//!
//! The remote platform offers no change feed, only full snapshots. The [`Reconciler`] keeps
//! the last observed effective time of every message and reply, and classifies each
//! difference between the stored state and a new snapshot into exactly one [`ChangeEvent`].
//!
//! Rules:
//! - The first snapshot is a baseline: it seeds the state and never produces events.
//! - Top-level messages are visited oldest first, so a parent is always reported before
//!   its replies.
//! - Replies are examined on every cycle, even when their parent did not change.
//! - Messages authored by the bridge itself are never reported as new or edited, but their
//!   deletion is.
//! - Messages without a user author are recorded and never reported.
//! - A message that disappears from a snapshot is not treated as deleted; only an explicit
//!   deleted timestamp counts.

use tracing::debug;

use crate::service::teams::RemoteMessage;

use super::state::{ConversationState, Observation, ReplyInfo, ThreadInfo};

/// A change observed between two snapshots of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    NewMessage(RemoteMessage),
    EditedMessage(RemoteMessage),
    DeletedMessage(RemoteMessage),
    NewReply { parent_id: String, reply: RemoteMessage },
    EditedReply { parent_id: String, reply: RemoteMessage },
    DeletedReply { parent_id: String, reply: RemoteMessage },
}

impl ChangeEvent {
    /// The message or reply the event is about.
    pub fn message(&self) -> &RemoteMessage {
        match self {
            Self::NewMessage(m) | Self::EditedMessage(m) | Self::DeletedMessage(m) => m,
            Self::NewReply { reply, .. } | Self::EditedReply { reply, .. } | Self::DeletedReply { reply, .. } => reply,
        }
    }

    /// The top-level message a reply belongs to.
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::NewMessage(_) | Self::EditedMessage(_) | Self::DeletedMessage(_) => None,
            Self::NewReply { parent_id, .. } | Self::EditedReply { parent_id, .. } | Self::DeletedReply { parent_id, .. } => Some(parent_id),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeletedMessage(_) | Self::DeletedReply { .. })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new message",
            Self::EditedMessage(_) => "edited message",
            Self::DeletedMessage(_) => "deleted message",
            Self::NewReply { .. } => "new reply",
            Self::EditedReply { .. } => "edited reply",
            Self::DeletedReply { .. } => "deleted reply",
        }
    }
}

/// Who wrote a message, as far as forwarding is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A human other than the bridge.
    User,
    /// The bridge's own account.
    Own,
    /// System or application message without a user author.
    NonUser,
}

fn origin(message: &RemoteMessage, bot_id: &str) -> Origin {
    match &message.author {
        None => Origin::NonUser,
        Some(author) if author.id == bot_id => Origin::Own,
        Some(_) => Origin::User,
    }
}

/// Whether `message` was posted by the bridge itself.
pub fn skip_own_message(message: &RemoteMessage, bot_id: &str) -> bool {
    let own = message.is_authored_by(bot_id);

    if own {
        debug!("Skipping own message `{}`.", message.id);
    }

    own
}

/// Whether a first observation should be forwarded. Deleted-on-arrival messages never are.
fn forward_new(message: &RemoteMessage, bot_id: &str) -> bool {
    match origin(message, bot_id) {
        Origin::NonUser => {
            debug!("Skipping non-user message `{}`.", message.id);
            false
        }
        Origin::Own => !skip_own_message(message, bot_id),
        Origin::User => !message.is_deleted(),
    }
}

/// What a changed effective time means for a known message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Edited,
    Deleted,
}

/// Classifies a changed observation. Deletions are never suppressed for own messages, and
/// once `was_deleted` any later change is a deletion again.
fn classify_changed(message: &RemoteMessage, bot_id: &str, was_deleted: bool) -> Option<Change> {
    match origin(message, bot_id) {
        Origin::NonUser => None,
        _ if was_deleted || message.is_deleted() => Some(Change::Deleted),
        Origin::Own => {
            skip_own_message(message, bot_id);
            None
        }
        Origin::User => Some(Change::Edited),
    }
}

/// Diffs snapshots of a single channel against what has already been seen.
#[derive(Debug)]
pub struct Reconciler {
    bot_id: String,
    state: ConversationState,
    baseline_done: bool,
    dump_messages: bool,
}

impl Reconciler {
    /// Creates a reconciler for a freshly joined channel.
    ///
    /// `bot_id` is the bridge's own identity, used to recognize echoes of its posts.
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            state: ConversationState::new(),
            baseline_done: false,
            dump_messages: false,
        }
    }

    /// Dumps every newly observed message at debug level.
    pub fn with_message_dump(mut self, enabled: bool) -> Self {
        self.dump_messages = enabled;
        self
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Whether the baseline snapshot has been taken.
    pub fn has_baseline(&self) -> bool {
        self.baseline_done
    }

    /// Diffs `snapshot` (newest first) against the known state, updating it in place.
    ///
    /// Returns the events in delivery order: oldest top-level message first, each followed
    /// by its replies in snapshot order.
    pub fn reconcile(&mut self, snapshot: &[RemoteMessage]) -> Vec<ChangeEvent> {
        if !self.baseline_done {
            self.seed(snapshot);
            self.baseline_done = true;

            if self.state.is_empty() {
                debug!("Baseline is empty.");
            } else {
                debug!("Baseline recorded {} messages.", self.state.len());
            }

            return Vec::new();
        }

        let Self { bot_id, state, dump_messages, .. } = self;
        let bot_id = bot_id.as_str();
        let dump_messages = *dump_messages;
        let mut events = Vec::new();

        for message in snapshot.iter().rev() {
            let (observation, thread) = state.observe(&message.id, message.effective_time());
            let was_deleted = thread.deleted;
            thread.deleted |= message.is_deleted();

            match observation {
                Observation::New => {
                    if dump_messages {
                        debug!("Message dump: {:#?}", message);
                    }

                    if forward_new(message, bot_id) {
                        events.push(ChangeEvent::NewMessage(message.clone()));
                    }
                }
                Observation::Unchanged => {}
                Observation::Changed => match classify_changed(message, bot_id, was_deleted) {
                    Some(Change::Deleted) => events.push(ChangeEvent::DeletedMessage(message.clone())),
                    Some(Change::Edited) => events.push(ChangeEvent::EditedMessage(message.clone())),
                    None => {}
                },
            }

            for reply in &message.replies {
                let parent_id = || message.id.clone();

                let (observation, seen) = thread.observe_reply(&reply.id, reply.effective_time());
                let was_deleted = seen.deleted;
                seen.deleted |= reply.is_deleted();

                match observation {
                    Observation::New => {
                        if forward_new(reply, bot_id) {
                            events.push(ChangeEvent::NewReply { parent_id: parent_id(), reply: reply.clone() });
                        }
                    }
                    Observation::Unchanged => {}
                    Observation::Changed => match classify_changed(reply, bot_id, was_deleted) {
                        Some(Change::Deleted) => events.push(ChangeEvent::DeletedReply { parent_id: parent_id(), reply: reply.clone() }),
                        Some(Change::Edited) => events.push(ChangeEvent::EditedReply { parent_id: parent_id(), reply: reply.clone() }),
                        None => {}
                    },
                }
            }
        }

        events
    }

    /// Records every message and reply of the baseline snapshot without classifying them.
    fn seed(&mut self, snapshot: &[RemoteMessage]) {
        for message in snapshot.iter().rev() {
            let mut thread = ThreadInfo::new(message.effective_time(), message.is_deleted());

            for reply in &message.replies {
                thread.put_reply(
                    &reply.id,
                    ReplyInfo {
                        last_seen: reply.effective_time(),
                        deleted: reply.is_deleted(),
                    },
                );
            }

            self.state.put(&message.id, thread);
        }
    }
}

// Tests.
