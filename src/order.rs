//! Ordering policy for root items.
//!
//! Produces a deterministic display order for a chosen sort mode. Items
//! authored by the current session are always surfaced first so a user
//! immediately sees their own contribution. All sorts are stable: ties keep
//! the order produced by the prior step.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::item::{Item, SessionId};

/// Engagement weights. Chosen empirically by the product; a constant policy,
/// not a law.
pub const SCORE_WEIGHT: i64 = 2;
pub const REPLY_WEIGHT: i64 = 3;
pub const REACTION_WEIGHT: i64 = 1;

/// Recognized sort modes for root items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Descending score.
    Popularity,
    /// Descending creation time.
    #[default]
    New,
    /// Ascending creation time.
    Old,
    /// Descending engagement score.
    Best,
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortMode::Popularity => "popularity",
            SortMode::New => "new",
            SortMode::Old => "old",
            SortMode::Best => "best",
        };
        f.write_str(name)
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "popularity" => Ok(SortMode::Popularity),
            "new" => Ok(SortMode::New),
            "old" => Ok(SortMode::Old),
            "best" => Ok(SortMode::Best),
            other => Err(format!(
                "unknown sort mode '{other}' (expected popularity, new, old or best)"
            )),
        }
    }
}

/// Computed engagement score used by [`SortMode::Best`].
pub fn engagement(item: &Item) -> i64 {
    SCORE_WEIGHT * item.score.max(0)
        + REPLY_WEIGHT * item.reply_count() as i64
        + REACTION_WEIGHT * item.total_reactions() as i64
}

/// Sort root items in place. `children` of every item are left untouched.
pub fn sort_items(items: &mut [Item], mode: SortMode, session: Option<&SessionId>) {
    items.sort_by(|a, b| {
        if let Some(session) = session {
            let own = b.owned_by(session).cmp(&a.owned_by(session));
            if own != Ordering::Equal {
                return own;
            }
        }
        match mode {
            SortMode::Popularity => b.score.cmp(&a.score),
            SortMode::New => b.created_at.cmp(&a.created_at),
            SortMode::Old => a.created_at.cmp(&b.created_at),
            SortMode::Best => engagement(b).cmp(&engagement(a)),
        }
    });
}
