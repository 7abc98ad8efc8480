//! Reconciler: merges a freshly fetched authoritative snapshot with the
//! current in-memory tree without losing not-yet-confirmed local echoes.
//!
//! A provisional item survives a merge until either its id shows up in the
//! snapshot, an authoritative item from the same session supersedes it, or it
//! is explicitly confirmed through the echo store. Fetch failures never reach
//! this module: the caller leaves the previous tree untouched.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use crate::item::Item;
use crate::tree::{build_tree, find_item_mut, set_depths};
use crate::types::ItemRecord;

/// Merge the previous tree's pending echoes into the tree built from a fresh
/// snapshot. Returns the merged forest; ordering policy is applied by the
/// caller afterwards.
pub fn reconcile(previous: &[Item], fresh_records: Vec<ItemRecord>) -> Vec<Item> {
    let mut pending = Vec::new();
    collect_pending(previous, None, &mut pending);

    let mut fresh = build_tree(fresh_records);
    if pending.is_empty() {
        return fresh;
    }

    let mut fresh_ids = HashSet::new();
    collect_ids(&fresh, &mut fresh_ids);

    let mut queue: VecDeque<PendingEcho> = pending.into();
    while let Some(PendingEcho { parent, item }) = queue.pop_front() {
        if fresh_ids.contains(&item.id) {
            // Confirmation arrived via polling; the snapshot version wins,
            // but replies made to the echo in the meantime must not go down
            // with it.
            debug!(id = %item.id, "echo present in snapshot, dropping local copy");
            let anchor = item.id.clone();
            salvage_descendants(item, &anchor, &mut queue);
            continue;
        }
        if let Some(winner) = superseded(&fresh, &item) {
            debug!(id = %item.id, %winner, "echo superseded by authoritative item from same session");
            salvage_descendants(item, &winner, &mut queue);
            continue;
        }
        fresh_ids.insert(item.id.clone());
        match parent {
            Some(parent_id) => match find_item_mut(&mut fresh, &parent_id) {
                Some(parent_node) => {
                    let mut item = item;
                    set_depths(&mut item, parent_node.depth + 1);
                    parent_node.children.push(item);
                }
                None => {
                    // The parent vanished from the snapshot. Keep the echo
                    // visible at the root rather than losing user input.
                    warn!(id = %item.id, parent = %parent_id, "echo parent gone, keeping at root");
                    let mut item = item;
                    set_depths(&mut item, 0);
                    fresh.push(item);
                }
            },
            None => {
                let mut item = item;
                set_depths(&mut item, 0);
                fresh.push(item);
            }
        }
    }

    fresh
}

struct PendingEcho {
    /// Id of the node the echo sat under in the previous tree, if any.
    parent: Option<String>,
    item: Item,
}

/// Collect the top-most provisional subtrees; descendants of a provisional
/// node travel with it rather than being collected separately.
fn collect_pending(items: &[Item], parent: Option<&str>, out: &mut Vec<PendingEcho>) {
    for item in items {
        if item.is_provisional() {
            out.push(PendingEcho {
                parent: parent.map(String::from),
                item: item.clone(),
            });
        } else {
            collect_pending(&item.children, Some(&item.id), out);
        }
    }
}

fn collect_ids(items: &[Item], out: &mut HashSet<String>) {
    for item in items {
        out.insert(item.id.clone());
        collect_ids(&item.children, out);
    }
}

/// A dropped echo may carry unconfirmed replies of its own that the backend
/// has never seen. Re-queue them anchored to the authoritative id so they
/// reattach instead of vanishing with their parent.
fn salvage_descendants(echo: Item, anchor: &str, queue: &mut VecDeque<PendingEcho>) {
    let mut rescued = Vec::new();
    collect_pending(&echo.children, Some(anchor), &mut rescued);
    for mut pending in rescued {
        if pending.parent.as_deref() == Some(anchor) {
            // The reply pointed at the provisional id; the authoritative id
            // replaces it.
            pending.item.parent_id = Some(anchor.to_string());
        }
        queue.push_back(pending);
    }
}

/// Secondary matching rule for echoes the id set cannot pair up: a fresh item
/// from the same session, under the same parent, with identical content is
/// taken as the authoritative version of the echo. Returns its id.
fn superseded(fresh: &[Item], echo: &Item) -> Option<String> {
    echo.session_owner.as_ref()?;
    for item in fresh {
        if item.session_owner == echo.session_owner
            && item.parent_id == echo.parent_id
            && item.content == echo.content
        {
            return Some(item.id.clone());
        }
        if let Some(winner) = superseded(&item.children, echo) {
            return Some(winner);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::{append_echo, make_echo};
    use crate::item::{AuthorIdentity, SessionId, NEW_PREFIX, REPLY_PREFIX};
    use crate::tree::{count_items, find_item};

    fn records(spec: serde_json::Value) -> Vec<ItemRecord> {
        serde_json::from_value(spec).unwrap()
    }

    fn session() -> SessionId {
        SessionId::new("local")
    }

    fn echo(prefix: &str, parent: Option<&str>, content: &str) -> Item {
        make_echo(
            prefix,
            parent.map(String::from),
            content.into(),
            AuthorIdentity::named("anon"),
            &session(),
        )
    }

    #[test]
    fn provisional_root_survives_merge_without_duplicates() {
        let mut previous = build_tree(records(serde_json::json!([
            {"id": "r1", "content": "one"},
        ])));
        let pending = echo(NEW_PREFIX, None, "mine");
        let pending_id = pending.id.clone();
        append_echo(&mut previous, pending);

        let merged = reconcile(
            &previous,
            records(serde_json::json!([
                {"id": "r1", "content": "one"},
                {"id": "r2", "content": "two"},
            ])),
        );

        assert_eq!(count_items(&merged), 3);
        assert!(find_item(&merged, &pending_id).is_some());
        let mut ids = HashSet::new();
        collect_ids(&merged, &mut ids);
        assert_eq!(ids.len(), 3, "duplicate ids after merge");
    }

    #[test]
    fn snapshot_version_wins_when_echo_id_appears() {
        let mut previous = Vec::new();
        let mut pending = echo(NEW_PREFIX, None, "local text");
        pending.id = "new-123-abc".into();
        append_echo(&mut previous, pending);

        let merged = reconcile(
            &previous,
            records(serde_json::json!([
                {"id": "new-123-abc", "content": "server text", "score": 7},
            ])),
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "server text");
        assert_eq!(merged[0].score, 7);
    }

    #[test]
    fn nested_echo_reattaches_under_fresh_parent() {
        let snapshot = serde_json::json!([
            {"id": "r1", "content": "root"},
            {"id": "c1", "parent_id": "r1", "content": "child"},
        ]);
        let mut previous = build_tree(records(snapshot.clone()));
        let pending = echo(REPLY_PREFIX, Some("c1"), "hello");
        let pending_id = pending.id.clone();
        append_echo(&mut previous, pending);

        let merged = reconcile(&previous, records(snapshot));
        let parent = find_item(&merged, "c1").unwrap();
        assert_eq!(parent.children.len(), 1);
        assert_eq!(parent.children[0].id, pending_id);
        assert_eq!(parent.children[0].depth, 2);
    }

    #[test]
    fn same_session_same_content_supersedes_echo() {
        let mut previous = build_tree(records(serde_json::json!([
            {"id": "r1", "content": "root"},
        ])));
        append_echo(&mut previous, echo(REPLY_PREFIX, Some("r1"), "hello"));

        let merged = reconcile(
            &previous,
            records(serde_json::json!([
                {"id": "r1", "content": "root"},
                {"id": "c9", "parent_id": "r1", "content": "hello", "session": "local"},
            ])),
        );

        let parent = find_item(&merged, "r1").unwrap();
        assert_eq!(parent.children.len(), 1, "echo should have been dropped");
        assert_eq!(parent.children[0].id, "c9");
    }

    #[test]
    fn echo_with_vanished_parent_is_kept_at_root() {
        let mut previous = build_tree(records(serde_json::json!([
            {"id": "r1", "content": "root"},
        ])));
        let pending = echo(REPLY_PREFIX, Some("r1"), "orphaned");
        let pending_id = pending.id.clone();
        append_echo(&mut previous, pending);

        let merged = reconcile(&previous, records(serde_json::json!([])));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, pending_id);
        assert_eq!(merged[0].depth, 0);
    }

    #[test]
    fn reply_to_pending_echo_survives_a_superseding_poll() {
        let mut previous = build_tree(records(serde_json::json!([
            {"id": "r1", "content": "root"},
        ])));
        let mut pending = echo(REPLY_PREFIX, Some("r1"), "hello");
        let pid = pending.id.clone();
        let nested = echo(REPLY_PREFIX, Some(pid.as_str()), "reply to pending");
        let nested_id = nested.id.clone();
        pending.children.push(nested);
        append_echo(&mut previous, pending);

        // The snapshot carries the superseding record but has never seen the
        // nested reply.
        let merged = reconcile(
            &previous,
            records(serde_json::json!([
                {"id": "r1", "content": "root"},
                {"id": "c9", "parent_id": "r1", "content": "hello", "session": "local"},
            ])),
        );

        assert!(find_item(&merged, &pid).is_none(), "superseded echo lingered");
        let winner = find_item(&merged, "c9").unwrap();
        assert_eq!(winner.children.len(), 1);
        assert_eq!(winner.children[0].id, nested_id);
        assert_eq!(winner.children[0].depth, 2);
        assert_eq!(winner.children[0].parent_id.as_deref(), Some("c9"));
    }

    #[test]
    fn nested_echo_survives_when_parent_id_lands_via_polling() {
        let mut previous = Vec::new();
        let mut pending = echo(NEW_PREFIX, None, "local text");
        pending.id = "new-123-abc".into();
        let nested = echo(REPLY_PREFIX, Some("new-123-abc"), "nested reply");
        let nested_id = nested.id.clone();
        pending.children.push(nested);
        append_echo(&mut previous, pending);

        let merged = reconcile(
            &previous,
            records(serde_json::json!([
                {"id": "new-123-abc", "content": "server text"},
            ])),
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "server text");
        assert_eq!(merged[0].children.len(), 1);
        assert_eq!(merged[0].children[0].id, nested_id);
        assert_eq!(merged[0].children[0].depth, 1);
    }

    #[test]
    fn echo_subtree_travels_whole() {
        let mut previous = build_tree(records(serde_json::json!([
            {"id": "r1", "content": "root"},
        ])));
        let mut pending = echo(REPLY_PREFIX, Some("r1"), "parent echo");
        let pid = pending.id.clone();
        let nested = echo(REPLY_PREFIX, Some(pid.as_str()), "nested echo");
        pending.children.push(nested);
        let pending_id = pending.id.clone();
        append_echo(&mut previous, pending);

        let merged = reconcile(
            &previous,
            records(serde_json::json!([{"id": "r1", "content": "root"}])),
        );
        let reattached = find_item(&merged, &pending_id).unwrap();
        assert_eq!(reattached.children.len(), 1);
        assert_eq!(reattached.depth, 1);
        assert_eq!(reattached.children[0].depth, 2);
    }
}
