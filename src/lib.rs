//! feedsync: client-side sync engine for live threaded discussion feeds.
//!
//! The engine keeps an in-memory forest of discussion items (confessions and
//! their nested comments) converged against an authoritative REST backend
//! while preserving locally-authored optimistic items, and applies
//! out-of-band single-item events from a persistent SSE channel without a
//! full refetch.
//!
//! The pieces compose leaf-first: [`tree`] builds a forest from a flat
//! snapshot, [`echo`] manages provisional items, [`reconcile`] merges the
//! two, [`patch`] applies live events, [`order`] decides display order, and
//! [`feed::ScopeFeed`] wires them to the network with a polling task and a
//! live-channel task per followed scope.

pub mod cache;
pub mod client;
pub mod echo;
pub mod error;
pub mod feed;
pub mod item;
pub mod order;
pub mod patch;
pub mod reconcile;
pub mod tree;
pub mod types;

pub use client::FeedClient;
pub use error::{FeedError, FeedResult};
pub use feed::{FeedConfig, FeedTasks, ScopeFeed, DEFAULT_POLL_INTERVAL};
pub use item::{AuthorIdentity, Item, SessionId, Vote};
pub use order::SortMode;
pub use patch::LiveEvent;
pub use types::{ItemRecord, SnapshotResponse};

/// Default backend URL for local development.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:4000";
