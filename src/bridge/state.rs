//! In-memory record of what has been observed in one channel.
//!
//! A [`ConversationState`] is owned by exactly one poll loop and never shared, so it needs
//! no locking. It is rebuilt from a fresh baseline every time the process starts.

use std::collections::{HashMap, hash_map::Entry};

use chrono::{DateTime, Utc};

/// The outcome of recording a timestamp for an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The id had not been seen before.
    New,
    /// The id was known with the same timestamp.
    Unchanged,
    /// The id was known with a different timestamp, now replaced.
    Changed,
}

/// Last observed state of one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyInfo {
    pub last_seen: DateTime<Utc>,
    /// Set once a deletion was observed; never cleared.
    pub deleted: bool,
}

/// What is known about one top-level message and its replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub last_seen: DateTime<Utc>,
    /// Set once a deletion was observed; never cleared.
    pub deleted: bool,
    replies: HashMap<String, ReplyInfo>,
}

impl ThreadInfo {
    pub fn new(last_seen: DateTime<Utc>, deleted: bool) -> Self {
        Self {
            last_seen,
            deleted,
            replies: HashMap::new(),
        }
    }

    /// What is known about a reply.
    pub fn reply(&self, reply_id: &str) -> Option<&ReplyInfo> {
        self.replies.get(reply_id)
    }

    pub fn put_reply(&mut self, reply_id: &str, info: ReplyInfo) {
        self.replies.insert(reply_id.to_string(), info);
    }

    /// Records a reply's time and reports whether it is new, unchanged or changed, along with
    /// the reply's record.
    pub fn observe_reply(&mut self, reply_id: &str, time: DateTime<Utc>) -> (Observation, &mut ReplyInfo) {
        match self.replies.entry(reply_id.to_string()) {
            Entry::Vacant(entry) => (Observation::New, entry.insert(ReplyInfo { last_seen: time, deleted: false })),
            Entry::Occupied(entry) => {
                let info = entry.into_mut();

                if info.last_seen == time {
                    (Observation::Unchanged, info)
                } else {
                    info.last_seen = time;
                    (Observation::Changed, info)
                }
            }
        }
    }
}

/// Table of every top-level message observed in a channel.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    threads: HashMap<String, ThreadInfo>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ThreadInfo> {
        self.threads.get(id)
    }

    pub fn put(&mut self, id: &str, info: ThreadInfo) {
        self.threads.insert(id.to_string(), info);
    }

    /// Records a top-level message's time and returns its thread, creating it when new.
    pub fn observe(&mut self, id: &str, time: DateTime<Utc>) -> (Observation, &mut ThreadInfo) {
        match self.threads.entry(id.to_string()) {
            Entry::Vacant(entry) => (Observation::New, entry.insert(ThreadInfo::new(time, false))),
            Entry::Occupied(entry) => {
                let info = entry.into_mut();

                if info.last_seen == time {
                    (Observation::Unchanged, info)
                } else {
                    info.last_seen = time;
                    (Observation::Changed, info)
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

// Tests.
