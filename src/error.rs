//! Error types for the sync engine.

use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Rejected before submission: an item needs content (or attached media,
    /// which this engine does not handle).
    #[error("item content is empty")]
    EmptyContent,

    #[error("item not found: {0}")]
    MissingItem(String),

    /// The local session does not own the item, or the action's eligibility
    /// window has passed.
    #[error("not permitted: {0}")]
    NotPermitted(&'static str),
}
