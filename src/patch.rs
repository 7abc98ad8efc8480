//! Live patch applier: applies out-of-band single-item events onto the
//! current tree without a full refetch.
//!
//! Events arrive over the scope's SSE channel. A malformed event is logged
//! and ignored; it must never panic or corrupt the tree. Live events and
//! poll cycles carry no mutual ordering guarantee, so every application here
//! is written to be idempotent with respect to authoritative state.

use chrono::Utc;
use tracing::{debug, warn};

use crate::item::{Item, SessionId};
use crate::tree::{find_item, find_item_mut, remove_item, set_depths};
use crate::types::{EditEventData, ItemRecord, ReactionEventData, RemoveEventData, VoteEventData};

/// A decoded event from the scope's live channel.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// New root or reply appended by some session.
    Appended(ItemRecord),
    /// An item's score changed; `vote` is the caster's resulting vote.
    Vote(VoteEventData),
    /// Server-computed reaction aggregate for one item.
    Reaction(ReactionEventData),
    /// An item's content was edited by its owner.
    Edited(EditEventData),
    /// An item was deleted.
    Removed(RemoveEventData),
}

impl LiveEvent {
    /// Decode a named SSE event. Unknown names and malformed payloads return
    /// `None` after logging; they are never an error.
    pub fn parse(name: &str, data: &str) -> Option<LiveEvent> {
        fn decode<T: serde::de::DeserializeOwned>(name: &str, data: &str) -> Option<T> {
            match serde_json::from_str(data) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(event = name, "ignoring malformed live event: {}", e);
                    None
                }
            }
        }

        match name {
            "item-appended" => {
                let record: ItemRecord = decode(name, data)?;
                if record.id.is_empty() {
                    warn!("ignoring item-appended event without id");
                    return None;
                }
                Some(LiveEvent::Appended(record))
            }
            "vote-update" => decode(name, data).map(LiveEvent::Vote),
            "reaction-update" => decode(name, data).map(LiveEvent::Reaction),
            "item-edited" => decode(name, data).map(LiveEvent::Edited),
            "item-removed" => decode(name, data).map(LiveEvent::Removed),
            other => {
                debug!(event = other, "unknown live event type");
                None
            }
        }
    }
}

/// Apply one live event to the forest. Returns whether the tree changed.
pub fn apply_live_event(items: &mut Vec<Item>, event: LiveEvent, local: &SessionId) -> bool {
    match event {
        LiveEvent::Appended(record) => apply_appended(items, record, local),
        LiveEvent::Vote(vote) => {
            let Some(item) = find_item_mut(items, &vote.id) else {
                debug!(id = %vote.id, "vote-update for unknown item");
                return false;
            };
            item.score = vote.score.max(0);
            // Another user's vote must not flip this client's own indicator.
            if vote.session.as_ref() == Some(local) {
                item.user_vote = vote.vote;
            }
            true
        }
        LiveEvent::Reaction(reaction) => {
            let Some(item) = find_item_mut(items, &reaction.id) else {
                debug!(id = %reaction.id, "reaction-update for unknown item");
                return false;
            };
            // Authoritative aggregate: replace wholesale, no local merge.
            item.reactions = reaction.reactions;
            true
        }
        LiveEvent::Edited(edit) => {
            let Some(item) = find_item_mut(items, &edit.id) else {
                debug!(id = %edit.id, "item-edited for unknown item");
                return false;
            };
            item.content = edit.content;
            item.is_edited = true;
            item.edited_at = Some(edit.edited_at.unwrap_or_else(Utc::now));
            true
        }
        LiveEvent::Removed(remove) => remove_item(items, &remove.id).is_some(),
    }
}

fn apply_appended(items: &mut Vec<Item>, record: ItemRecord, local: &SessionId) -> bool {
    // Our own append is assumed already present via the local echo store.
    if record.session.as_ref() == Some(local) {
        debug!(id = %record.id, "skipping own item-appended event");
        return false;
    }
    if find_item(items, &record.id).is_some() {
        return false;
    }
    let parent_id = record.parent_id.clone();
    match parent_id {
        Some(parent_id) => match find_item_mut(items, &parent_id) {
            Some(parent) => {
                let mut item = record.into_item(0);
                set_depths(&mut item, parent.depth + 1);
                parent.children.push(item);
                true
            }
            None => {
                debug!(id = %record.id, parent = %parent_id, "appended item's parent unknown, placing at root");
                items.push(record.into_item(0));
                true
            }
        },
        None => {
            items.push(record.into_item(0));
            true
        }
    }
}
