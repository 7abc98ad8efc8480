//! Tree builder: converts a flat item list into a forest of nested nodes.
//!
//! The builder is a pure function of its input. Both passes are separate, so
//! a parent referenced before it is defined in the input array still resolves
//! correctly. Records with a missing id are dropped (and logged); records
//! whose parent is absent from the snapshot are promoted to roots rather than
//! silently vanishing.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::item::Item;
use crate::types::ItemRecord;

/// Build a forest from a flat snapshot.
///
/// Roots appear in input order; children appear in input order beneath their
/// parent. Depth is annotated as parent depth + 1, with roots at 0.
pub fn build_tree(records: Vec<ItemRecord>) -> Vec<Item> {
    // First pass: collect the set of usable ids so parents resolve regardless
    // of input order.
    let mut ids = HashSet::new();
    let mut valid = Vec::with_capacity(records.len());
    for record in records {
        if record.id.is_empty() {
            warn!("dropping item record with missing id");
            continue;
        }
        if !ids.insert(record.id.clone()) {
            warn!(id = %record.id, "dropping duplicate item record");
            continue;
        }
        valid.push(record);
    }

    // Second pass: bucket each record under its resolvable parent. Orphans
    // (parent missing or self-referential) become top-level.
    let mut root_records = Vec::new();
    let mut children_of: HashMap<String, Vec<ItemRecord>> = HashMap::new();
    for record in valid {
        let parent = record
            .parent_id
            .as_ref()
            .filter(|p| *p != &record.id && ids.contains(*p))
            .cloned();
        match parent {
            Some(parent) => children_of.entry(parent).or_default().push(record),
            None => {
                if record.parent_id.is_some() {
                    debug!(id = %record.id, "parent not in snapshot, promoting to root");
                }
                root_records.push(record);
            }
        }
    }

    let mut forest: Vec<Item> = root_records
        .into_iter()
        .map(|record| assemble(record, 0, &mut children_of))
        .collect();

    // A parent cycle leaves its members unreachable from any root. Surface
    // them as roots instead of dropping them.
    while let Some(key) = children_of.keys().next().cloned() {
        let bucket = children_of.remove(&key).unwrap_or_default();
        for record in bucket {
            warn!(id = %record.id, "item unreachable through its parent chain, promoting to root");
            forest.push(assemble(record, 0, &mut children_of));
        }
    }

    forest
}

fn assemble(
    record: ItemRecord,
    depth: usize,
    children_of: &mut HashMap<String, Vec<ItemRecord>>,
) -> Item {
    let id = record.id.clone();
    let mut item = record.into_item(depth);
    if let Some(kids) = children_of.remove(&id) {
        item.children = kids
            .into_iter()
            .map(|record| assemble(record, depth + 1, children_of))
            .collect();
    }
    item
}

/// Locate an item anywhere in the forest by id.
pub fn find_item<'a>(items: &'a [Item], id: &str) -> Option<&'a Item> {
    for item in items {
        if item.id == id {
            return Some(item);
        }
        if let Some(found) = find_item(&item.children, id) {
            return Some(found);
        }
    }
    None
}

/// Mutable variant of [`find_item`].
pub fn find_item_mut<'a>(items: &'a mut [Item], id: &str) -> Option<&'a mut Item> {
    for item in items.iter_mut() {
        if item.id == id {
            return Some(item);
        }
        if let Some(found) = find_item_mut(&mut item.children, id) {
            return Some(found);
        }
    }
    None
}

/// Detach an item (with its subtree) from the forest, wherever it sits.
pub fn remove_item(items: &mut Vec<Item>, id: &str) -> Option<Item> {
    if let Some(pos) = items.iter().position(|item| item.id == id) {
        return Some(items.remove(pos));
    }
    for item in items.iter_mut() {
        if let Some(removed) = remove_item(&mut item.children, id) {
            return Some(removed);
        }
    }
    None
}

/// Total node count, counting recursively.
pub fn count_items(items: &[Item]) -> usize {
    items
        .iter()
        .map(|item| 1 + count_items(&item.children))
        .sum()
}

/// Re-annotate a subtree's depths starting from the given depth.
pub fn set_depths(item: &mut Item, depth: usize) {
    item.depth = depth;
    for child in &mut item.children {
        set_depths(child, depth + 1);
    }
}
