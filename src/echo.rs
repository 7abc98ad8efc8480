//! Local echo store: user-authored items rendered immediately, pending
//! backend confirmation.
//!
//! Echoes live inside the same forest as confirmed items; this module holds
//! the operations that insert, confirm and discard them. `append` followed by
//! `confirm` is idempotent with respect to final tree shape.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::item::{Item, SessionId};
use crate::tree::{find_item, find_item_mut, remove_item, set_depths};

/// Generate a synthetic id for a provisional item: a marker prefix plus a
/// client timestamp and random suffix.
pub fn provisional_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}-{}",
        prefix,
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

/// Insert a provisional item into the forest: the root list when it has no
/// parent, otherwise the matched parent's children. A reply whose parent is
/// no longer present is promoted to a root rather than dropped.
pub fn append_echo(items: &mut Vec<Item>, mut echo: Item) {
    match echo.parent_id.clone() {
        Some(parent_id) => {
            if let Some(parent) = find_item_mut(items, &parent_id) {
                set_depths(&mut echo, parent.depth + 1);
                parent.children.push(echo);
            } else {
                warn!(id = %echo.id, parent = %parent_id, "echo parent missing, appending at root");
                set_depths(&mut echo, 0);
                items.push(echo);
            }
        }
        None => {
            set_depths(&mut echo, 0);
            items.push(echo);
        }
    }
}

/// Rewrite a provisional node's id to its server-assigned id, in place,
/// without altering its position or children. Calling this twice with the
/// same arguments is a no-op after the first.
///
/// If the authoritative item already arrived through polling, the stale echo
/// is dropped instead so the two never coexist. Returns whether the tree
/// changed.
pub fn confirm_echo(items: &mut Vec<Item>, provisional_id: &str, server_id: &str) -> bool {
    if find_item(items, server_id).is_some() {
        // Confirmation raced with a snapshot that already carried the item.
        if remove_item(items, provisional_id).is_some() {
            debug!(%provisional_id, %server_id, "dropping echo already superseded by snapshot");
            return true;
        }
        return false;
    }
    match find_item_mut(items, provisional_id) {
        Some(item) => {
            item.id = server_id.to_string();
            true
        }
        None => false,
    }
}

/// Remove a provisional node, used when a request fails and rollback is
/// wanted. Most call sites deliberately keep the echo instead: the content is
/// already visible and silently losing it feels worse than a stale copy.
pub fn discard_echo(items: &mut Vec<Item>, provisional_id: &str) -> Option<Item> {
    remove_item(items, provisional_id)
}

/// Build a provisional item authored by the local session.
pub fn make_echo(
    prefix: &str,
    parent_id: Option<String>,
    content: String,
    author: crate::item::AuthorIdentity,
    session: &SessionId,
) -> Item {
    Item {
        id: provisional_id(prefix),
        parent_id,
        content,
        author,
        created_at: Utc::now(),
        score: 0,
        user_vote: Default::default(),
        reactions: Default::default(),
        depth: 0,
        children: Vec::new(),
        session_owner: Some(session.clone()),
        is_edited: false,
        edited_at: None,
    }
}
