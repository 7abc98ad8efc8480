//! Core data model for threaded feed items.
//!
//! An [`Item`] is one node of the in-memory discussion forest: a confession
//! at the root level, or a comment/reply beneath one. Items authored locally
//! start out *provisional* (synthetic id) until the backend assigns an
//! authoritative id; see the `echo` module for that lifecycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix carried by provisional ids of top-level items.
pub const NEW_PREFIX: &str = "new-";

/// Prefix carried by provisional ids of replies.
pub const REPLY_PREFIX: &str = "reply-";

/// Owner-initiated deletion is only offered within this window.
/// The server is expected to re-enforce the same rule.
pub const DELETE_WINDOW_HOURS: i64 = 24;

/// Opaque identifier for the local browser/app session.
///
/// Used to decide authorship-based affordances (edit/delete) and to suppress
/// duplicate insertion of our own echoed items when the server broadcasts
/// them back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(format!("sess-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A user's vote on an item: tri-state, serialized as -1 / 0 / +1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i8", into = "i8")]
pub enum Vote {
    Down,
    #[default]
    None,
    Up,
}

impl Vote {
    /// Numeric contribution of this vote to an item's score.
    pub fn value(self) -> i64 {
        match self {
            Vote::Down => -1,
            Vote::None => 0,
            Vote::Up => 1,
        }
    }
}

impl From<i8> for Vote {
    fn from(v: i8) -> Self {
        match v {
            v if v < 0 => Vote::Down,
            0 => Vote::None,
            _ => Vote::Up,
        }
    }
}

impl From<Vote> for i8 {
    fn from(v: Vote) -> i8 {
        match v {
            Vote::Down => -1,
            Vote::None => 0,
            Vote::Up => 1,
        }
    }
}

/// Server-computed aggregate for one reaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReactionAggregate {
    pub count: u64,
    #[serde(default)]
    pub user_reacted: bool,
}

/// Display identity attached to an item. Opaque to the sync engine: it is
/// carried through reconciliation untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl AuthorIdentity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One node of the in-memory discussion forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Server-assigned id once persisted; provisional ids carry a
    /// [`NEW_PREFIX`] or [`REPLY_PREFIX`] tag.
    pub id: String,
    /// Absent for top-level items, present for replies.
    pub parent_id: Option<String>,
    pub content: String,
    pub author: AuthorIdentity,
    pub created_at: DateTime<Utc>,
    /// Aggregate score. Never negative after any vote transition.
    pub score: i64,
    /// This session's own vote indicator.
    pub user_vote: Vote,
    /// Reaction kind -> server aggregate.
    pub reactions: BTreeMap<String, ReactionAggregate>,
    /// 0 at the root; always parent depth + 1 below.
    pub depth: usize,
    pub children: Vec<Item>,
    /// Session that authored this item, when known.
    pub session_owner: Option<SessionId>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Whether this item still carries a synthetic (unconfirmed) id.
    pub fn is_provisional(&self) -> bool {
        is_provisional_id(&self.id)
    }

    pub fn owned_by(&self, session: &SessionId) -> bool {
        self.session_owner.as_ref() == Some(session)
    }

    /// Owner-only, time-boxed deletion eligibility. This is a UI affordance,
    /// not a security boundary.
    pub fn deletable_by(&self, session: &SessionId, now: DateTime<Utc>) -> bool {
        self.owned_by(session) && now - self.created_at < Duration::hours(DELETE_WINDOW_HOURS)
    }

    /// Direct reply count, used by the engagement ordering.
    pub fn reply_count(&self) -> usize {
        self.children.len()
    }

    /// Sum of all reaction counts on this item.
    pub fn total_reactions(&self) -> u64 {
        self.reactions.values().map(|r| r.count).sum()
    }

    /// Apply a vote transition from this session, adjusting the score by the
    /// delta between the old and new vote. The score is clamped at zero.
    pub fn apply_vote(&mut self, vote: Vote) {
        let delta = vote.value() - self.user_vote.value();
        self.score = (self.score + delta).max(0);
        self.user_vote = vote;
    }

    /// Toggle this session's reaction of the given kind, keeping the local
    /// aggregate plausible until the server-computed one arrives.
    pub fn toggle_reaction(&mut self, kind: &str) {
        let entry = self.reactions.entry(kind.to_string()).or_default();
        if entry.user_reacted {
            entry.user_reacted = false;
            entry.count = entry.count.saturating_sub(1);
        } else {
            entry.user_reacted = true;
            entry.count += 1;
        }
    }
}

/// Whether an id string marks an unconfirmed, locally-generated item.
pub fn is_provisional_id(id: &str) -> bool {
    id.starts_with(NEW_PREFIX) || id.starts_with(REPLY_PREFIX)
}
