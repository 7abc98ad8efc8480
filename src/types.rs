//! Wire types for the feed backend API.
//!
//! This module contains the request/response shapes exchanged with the REST
//! backend and the SSE event payloads. The backend owns these contracts; the
//! engine is a consumer. Deserialization is deliberately lenient where the
//! tree builder can recover (missing content, missing timestamps), and strict
//! nowhere that a single bad record could abort a whole snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::item::{AuthorIdentity, Item, ReactionAggregate, SessionId, Vote};

/// One flat item as returned by `GET /scopes/{scope}/items`.
///
/// A record with an empty `id` is invalid and will be dropped (and logged)
/// by the tree builder rather than failing the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Coerced to a string rather than rejected: empty-but-present comments
    /// are valid.
    #[serde(default, deserialize_with = "string_or_coerced")]
    pub content: String,
    #[serde(default)]
    pub author: AuthorIdentity,
    #[serde(default = "unix_epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub user_vote: Vote,
    #[serde(default)]
    pub reactions: BTreeMap<String, ReactionAggregate>,
    /// Session that authored the item, when the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl ItemRecord {
    /// Convert into an in-memory node at the given depth, with no children
    /// attached yet.
    pub fn into_item(self, depth: usize) -> Item {
        Item {
            id: self.id,
            parent_id: self.parent_id,
            content: self.content,
            author: self.author,
            created_at: self.created_at,
            score: self.score,
            user_vote: self.user_vote,
            reactions: self.reactions,
            depth,
            children: Vec::new(),
            session_owner: self.session,
            is_edited: self.is_edited,
            edited_at: self.edited_at,
        }
    }
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

fn string_or_coerced<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Response from `GET /scopes/{scope}/items`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub items: Vec<ItemRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Request for `POST /scopes/{scope}/items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItemRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub content: String,
    pub author: AuthorIdentity,
    pub session: SessionId,
}

/// Request for `POST /scopes/{scope}/items/{id}/vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub vote: Vote,
    pub session: SessionId,
}

/// Request for `POST /scopes/{scope}/items/{id}/reactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub kind: String,
    pub session: SessionId,
}

/// Request for `PATCH /scopes/{scope}/items/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditItemRequest {
    pub content: String,
    pub session: SessionId,
}

/// Payload of a `vote-update` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteEventData {
    pub id: String,
    pub score: i64,
    #[serde(default)]
    pub vote: Vote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

/// Payload of a `reaction-update` SSE event. The aggregate is authoritative:
/// it replaces the item's reaction map wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEventData {
    pub id: String,
    #[serde(default)]
    pub reactions: BTreeMap<String, ReactionAggregate>,
}

/// Payload of an `item-edited` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditEventData {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

/// Payload of an `item-removed` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveEventData {
    pub id: String,
}
