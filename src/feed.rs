//! Scope feed engine: owns the in-memory tree for one scope and keeps it
//! converged against the backend.
//!
//! One `ScopeFeed` instance owns the forest for a given scope (one
//! confession's comments, or one campus feed). User actions get an immediate
//! optimistic reflection through the echo store; a background poll task
//! reconciles authoritative snapshots over it, and a live-channel task
//! applies single-item events between polls. Both tasks are spawned by
//! [`ScopeFeed::follow`] and cancelled together through the returned
//! [`FeedTasks`] handle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use reqwest_eventsource::{Event as SseEvent, EventSource};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::{CachedSnapshot, SnapshotCache, DEFAULT_MAX_AGE};
use crate::client::FeedClient;
use crate::echo::{append_echo, confirm_echo, discard_echo, make_echo};
use crate::error::{FeedError, FeedResult};
use crate::item::{AuthorIdentity, Item, SessionId, Vote, NEW_PREFIX, REPLY_PREFIX};
use crate::order::{sort_items, SortMode};
use crate::patch::{apply_live_event, LiveEvent};
use crate::reconcile::reconcile;
use crate::tree::{find_item, find_item_mut, remove_item};
use crate::types::ItemRecord;

/// Default background snapshot cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2500);

/// Backoff before reconnecting a dropped live channel.
const LIVE_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for a scope feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Backend base URL.
    pub server: String,
    /// Scope key: a campus feed id or a confession id.
    pub scope: String,
    /// Local session identity.
    pub session: SessionId,
    /// Display identity attached to items this session authors.
    pub author: AuthorIdentity,
    /// Initial sort mode for root items.
    pub sort: SortMode,
    /// Background snapshot cadence.
    pub poll_interval: Duration,
    /// Directory for the opportunistic snapshot cache; `None` disables it.
    pub cache_dir: Option<PathBuf>,
    /// Freshness window for cached snapshots.
    pub cache_max_age: Duration,
}

impl FeedConfig {
    pub fn new(server: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            scope: scope.into(),
            session: SessionId::generate(),
            author: AuthorIdentity::named("anonymous"),
            sort: SortMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cache_dir: None,
            cache_max_age: DEFAULT_MAX_AGE,
        }
    }
}

struct FeedState {
    items: Vec<Item>,
    cursor: Option<String>,
    has_more: bool,
    sort: SortMode,
}

/// Live view of one scope's discussion tree.
pub struct ScopeFeed {
    client: FeedClient,
    author: AuthorIdentity,
    poll_interval: Duration,
    cache: Option<SnapshotCache>,
    cache_max_age: Duration,
    state: RwLock<FeedState>,
    refresh_in_flight: AtomicBool,
    changes: broadcast::Sender<()>,
}

impl ScopeFeed {
    pub fn new(config: FeedConfig) -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            client: FeedClient::new(config.server, config.scope, config.session),
            author: config.author,
            poll_interval: config.poll_interval,
            cache: config.cache_dir.map(SnapshotCache::new),
            cache_max_age: config.cache_max_age,
            state: RwLock::new(FeedState {
                items: Vec::new(),
                cursor: None,
                has_more: false,
                sort: config.sort,
            }),
            refresh_in_flight: AtomicBool::new(false),
            changes,
        })
    }

    pub fn session(&self) -> &SessionId {
        self.client.session()
    }

    pub fn scope(&self) -> &str {
        self.client.scope()
    }

    /// Subscribe to change notifications. A receiver lagging behind only
    /// loses intermediate ticks, never the current state.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        // Ignore errors when there are no active subscribers.
        let _ = self.changes.send(());
    }

    /// Clone of the current forest, sorted per the active mode.
    pub async fn items(&self) -> Vec<Item> {
        self.state.read().await.items.clone()
    }

    /// Whether the last snapshot reported more pages beyond the cursor.
    pub async fn has_more(&self) -> bool {
        self.state.read().await.has_more
    }

    pub async fn sort_mode(&self) -> SortMode {
        self.state.read().await.sort
    }

    /// Switch the root ordering. Children of every item are untouched.
    pub async fn set_sort(&self, mode: SortMode) {
        {
            let mut state = self.state.write().await;
            state.sort = mode;
            let session = self.session().clone();
            sort_items(&mut state.items, mode, Some(&session));
        }
        self.notify();
    }

    fn resort(&self, state: &mut FeedState) {
        sort_items(&mut state.items, state.sort, Some(self.session()));
    }

    async fn apply_snapshot(
        &self,
        records: Vec<ItemRecord>,
        cursor: Option<String>,
        has_more: bool,
    ) {
        {
            let mut state = self.state.write().await;
            state.items = reconcile(&state.items, records);
            state.cursor = cursor;
            state.has_more = has_more;
            self.resort(&mut state);
        }
        self.notify();
    }

    /// Seed the tree from the snapshot cache if a fresh-enough entry exists.
    /// Returns whether anything was applied.
    pub async fn load_cached(&self) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        match cache.load(self.scope(), self.cache_max_age).await {
            Some(cached) => {
                debug!(scope = %self.scope(), "seeding from snapshot cache");
                self.apply_snapshot(cached.items, cached.cursor, cached.has_more)
                    .await;
                true
            }
            None => false,
        }
    }

    /// Run one snapshot fetch-and-reconcile cycle.
    ///
    /// Returns `Ok(false)` when the cycle was skipped because a previous one
    /// is still in flight (cycles are skipped, never queued). A fetch failure
    /// leaves the previous tree untouched.
    pub async fn refresh(&self) -> FeedResult<bool> {
        if self
            .refresh_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(scope = %self.scope(), "previous fetch cycle still in flight, skipping");
            return Ok(false);
        }
        // The guard stays held through application: a tick landing between
        // this cycle's fetch and its apply must not fetch a newer snapshot
        // only to have this older one land on top of it.
        let result = self.fetch_and_apply().await;
        self.refresh_in_flight.store(false, Ordering::SeqCst);
        result.map(|()| true)
    }

    async fn fetch_and_apply(&self) -> FeedResult<()> {
        let snapshot = self.client.fetch_snapshot(None).await?;
        if let Some(cache) = &self.cache {
            cache
                .store(
                    self.scope(),
                    &CachedSnapshot {
                        items: snapshot.items.clone(),
                        cursor: snapshot.cursor.clone(),
                        has_more: snapshot.has_more,
                        fetched_at: Utc::now(),
                    },
                )
                .await;
        }
        self.apply_snapshot(snapshot.items, snapshot.cursor, snapshot.has_more)
            .await;
        Ok(())
    }

    /// Seed from cache, then fetch live. The cached seed survives even if
    /// the fetch fails; the error is still returned for the initial-load
    /// empty state.
    pub async fn bootstrap(&self) -> FeedResult<()> {
        self.load_cached().await;
        self.refresh().await.map(|_| ())
    }

    /// Post a new top-level item. The echo is visible immediately; on
    /// failure it is rolled back and the error returned, since a full-page
    /// composer has no in-place placeholder worth preserving.
    pub async fn post(&self, content: &str) -> FeedResult<String> {
        self.submit(NEW_PREFIX, None, content, true).await
    }

    /// Post a reply beneath `parent_id`. The echo is visible immediately; on
    /// failure it is deliberately kept (the text is already on screen and
    /// silent rollback reads as data loss) and the error returned for
    /// optional surfacing.
    pub async fn reply(&self, parent_id: &str, content: &str) -> FeedResult<String> {
        self.submit(REPLY_PREFIX, Some(parent_id.to_string()), content, false)
            .await
    }

    async fn submit(
        &self,
        prefix: &str,
        parent_id: Option<String>,
        content: &str,
        rollback_on_failure: bool,
    ) -> FeedResult<String> {
        if content.trim().is_empty() {
            return Err(FeedError::EmptyContent);
        }
        let echo = make_echo(
            prefix,
            parent_id.clone(),
            content.to_string(),
            self.author.clone(),
            self.session(),
        );
        let provisional = echo.id.clone();
        {
            let mut state = self.state.write().await;
            append_echo(&mut state.items, echo);
            self.resort(&mut state);
        }
        self.notify();

        match self
            .client
            .create_item(parent_id, content, self.author.clone())
            .await
        {
            Ok(record) => {
                {
                    let mut state = self.state.write().await;
                    confirm_echo(&mut state.items, &provisional, &record.id);
                }
                self.notify();
                Ok(record.id)
            }
            Err(e) => {
                if rollback_on_failure {
                    {
                        let mut state = self.state.write().await;
                        discard_echo(&mut state.items, &provisional);
                    }
                    self.notify();
                } else {
                    warn!(id = %provisional, "submit failed, keeping local echo: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Cast (or clear) this session's vote. The optimistic transition is
    /// kept on network failure; the authoritative record reconciles it on
    /// success.
    pub async fn vote(&self, id: &str, vote: Vote) -> FeedResult<()> {
        {
            let mut state = self.state.write().await;
            let item = find_item_mut(&mut state.items, id)
                .ok_or_else(|| FeedError::MissingItem(id.to_string()))?;
            item.apply_vote(vote);
            self.resort(&mut state);
        }
        self.notify();

        match self.client.cast_vote(id, vote).await {
            Ok(record) => {
                {
                    let mut state = self.state.write().await;
                    if let Some(item) = find_item_mut(&mut state.items, id) {
                        item.score = record.score.max(0);
                        item.user_vote = record.user_vote;
                    }
                    self.resort(&mut state);
                }
                self.notify();
            }
            Err(e) => warn!(id, "vote request failed, keeping optimistic state: {}", e),
        }
        Ok(())
    }

    /// Toggle this session's reaction of `kind` on an item.
    pub async fn toggle_reaction(&self, id: &str, kind: &str) -> FeedResult<()> {
        {
            let mut state = self.state.write().await;
            let item = find_item_mut(&mut state.items, id)
                .ok_or_else(|| FeedError::MissingItem(id.to_string()))?;
            item.toggle_reaction(kind);
        }
        self.notify();

        match self.client.toggle_reaction(id, kind).await {
            Ok(record) => {
                {
                    let mut state = self.state.write().await;
                    if let Some(item) = find_item_mut(&mut state.items, id) {
                        item.reactions = record.reactions;
                    }
                }
                self.notify();
            }
            Err(e) => warn!(id, "reaction request failed, keeping optimistic state: {}", e),
        }
        Ok(())
    }

    /// Edit an item authored by this session. Content and edit flag update
    /// optimistically and are kept on network failure; the authoritative
    /// record reconciles them on success.
    pub async fn edit(&self, id: &str, content: &str) -> FeedResult<()> {
        if content.trim().is_empty() {
            return Err(FeedError::EmptyContent);
        }
        {
            let mut state = self.state.write().await;
            let item = find_item_mut(&mut state.items, id)
                .ok_or_else(|| FeedError::MissingItem(id.to_string()))?;
            if !item.owned_by(self.session()) {
                return Err(FeedError::NotPermitted(
                    "only the authoring session may edit",
                ));
            }
            item.content = content.to_string();
            item.is_edited = true;
            item.edited_at = Some(Utc::now());
        }
        self.notify();

        match self.client.edit_item(id, content).await {
            Ok(record) => {
                {
                    let mut state = self.state.write().await;
                    if let Some(item) = find_item_mut(&mut state.items, id) {
                        item.content = record.content;
                        item.is_edited = record.is_edited;
                        item.edited_at = record.edited_at;
                    }
                }
                self.notify();
            }
            Err(e) => warn!(id, "edit request failed, keeping optimistic state: {}", e),
        }
        Ok(())
    }

    /// Delete an item this session authored within the eligibility window.
    /// The removal is applied locally first; if the request fails the item
    /// simply reappears on a later poll.
    pub async fn delete(&self, id: &str) -> FeedResult<()> {
        {
            let mut state = self.state.write().await;
            let item = find_item(&state.items, id)
                .ok_or_else(|| FeedError::MissingItem(id.to_string()))?;
            if !item.deletable_by(self.session(), Utc::now()) {
                return Err(FeedError::NotPermitted(
                    "deletion is owner-only and time-boxed",
                ));
            }
            remove_item(&mut state.items, id);
        }
        self.notify();

        if let Err(e) = self.client.delete_item(id).await {
            warn!(id, "delete request failed, item may reappear on next poll: {}", e);
        }
        Ok(())
    }

    /// Apply one decoded live event to the tree.
    pub async fn apply_live(&self, event: LiveEvent) {
        let changed = {
            let mut state = self.state.write().await;
            let session = self.session().clone();
            let changed = apply_live_event(&mut state.items, event, &session);
            if changed {
                self.resort(&mut state);
            }
            changed
        };
        if changed {
            self.notify();
        }
    }

    /// Spawn the background poll task and the live-channel task for this
    /// scope. Both are cancelled together by the returned handle.
    pub fn follow(self: &Arc<Self>) -> FeedTasks {
        FeedTasks {
            handles: vec![
                tokio::spawn(poll_task(Arc::clone(self))),
                tokio::spawn(live_events_task(Arc::clone(self))),
            ],
        }
    }
}

/// Handles to a followed scope's background tasks, aborted together on
/// teardown.
pub struct FeedTasks {
    handles: Vec<JoinHandle<()>>,
}

impl FeedTasks {
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for FeedTasks {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Re-run the snapshot fetcher on a fixed cadence. Ticks that land while a
/// cycle is still in flight are skipped by the guard in `refresh`, never
/// queued.
async fn poll_task(feed: Arc<ScopeFeed>) {
    let mut interval = tokio::time::interval(feed.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if let Err(e) = feed.refresh().await {
            warn!(scope = %feed.scope(), "background refresh failed: {}", e);
        }
    }
}

/// Maintain a persistent connection to the scope's SSE channel, reconnecting
/// after a fixed backoff. One bad event never stops the stream.
async fn live_events_task(feed: Arc<ScopeFeed>) {
    let sse_url = feed.client.sse_url();
    let http = reqwest::Client::new();
    loop {
        info!("connecting to live channel: {}", sse_url);

        let mut es = match EventSource::new(http.get(&sse_url)) {
            Ok(es) => es,
            Err(e) => {
                warn!("failed to open live channel: {}", e);
                sleep(LIVE_RECONNECT_DELAY).await;
                continue;
            }
        };

        while let Some(event) = es.next().await {
            match event {
                Ok(SseEvent::Open) => {
                    debug!(scope = %feed.scope(), "live channel opened");
                }
                Ok(SseEvent::Message(msg)) => {
                    if let Some(live) = LiveEvent::parse(&msg.event, &msg.data) {
                        feed.apply_live(live).await;
                    }
                }
                Err(e) => {
                    warn!("live channel error: {}", e);
                    break;
                }
            }
        }

        warn!("live channel closed, reconnecting in {:?}", LIVE_RECONNECT_DELAY);
        sleep(LIVE_RECONNECT_DELAY).await;
    }
}
