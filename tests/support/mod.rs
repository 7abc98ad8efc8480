//! In-process mock backend for integration tests.
//!
//! Stands up a minimal axum server on an ephemeral port implementing the
//! slice of the feed API the engine consumes: snapshot listing, item
//! creation, vote/reaction/edit/delete, and the scope SSE channel. State is
//! a flat record list plus a broadcast channel for live events; tests poke
//! both directly.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch};
use axum::{Json, Router};
use chrono::Utc;
use futures::Stream;
use tokio::sync::{broadcast, Mutex};

use feedsync::types::{
    CreateItemRequest, EditItemRequest, ItemRecord, ReactionRequest, SnapshotResponse, VoteRequest,
};

pub struct BackendState {
    pub items: Mutex<Vec<ItemRecord>>,
    pub next_id: AtomicU64,
    /// When set, create requests fail with a 500.
    pub fail_creates: AtomicBool,
    /// When set, snapshot requests return a 200 with a non-JSON body.
    pub malformed_snapshots: AtomicBool,
    /// Artificial latency before create requests respond.
    pub create_delay: Mutex<Duration>,
    /// Artificial latency before snapshot requests respond.
    pub list_delay: Mutex<Duration>,
    /// Live events broadcast to SSE subscribers as (event name, payload).
    pub events: broadcast::Sender<(String, String)>,
}

impl BackendState {
    pub async fn seed(&self, record: ItemRecord) {
        self.items.lock().await.push(record);
    }

    pub async fn remove(&self, id: &str) {
        self.items.lock().await.retain(|r| r.id != id);
    }

    pub fn push_event(&self, name: &str, payload: serde_json::Value) {
        let _ = self.events.send((name.to_string(), payload.to_string()));
    }
}

pub struct MockBackend {
    pub url: String,
    pub state: Arc<BackendState>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Build an item record the way the backend would return it.
pub fn record(id: &str, parent: Option<&str>, content: &str) -> ItemRecord {
    record_with(id, parent, content, 0, 0)
}

pub fn record_with(
    id: &str,
    parent: Option<&str>,
    content: &str,
    score: i64,
    age_secs: i64,
) -> ItemRecord {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "parent_id": parent,
        "content": content,
        "score": score,
        "created_at": Utc::now() - chrono::Duration::seconds(age_secs),
    }))
    .unwrap()
}

pub async fn spawn_backend() -> MockBackend {
    let (events, _) = broadcast::channel(64);
    let state = Arc::new(BackendState {
        items: Mutex::new(Vec::new()),
        next_id: AtomicU64::new(0),
        fail_creates: AtomicBool::new(false),
        malformed_snapshots: AtomicBool::new(false),
        create_delay: Mutex::new(Duration::ZERO),
        list_delay: Mutex::new(Duration::ZERO),
        events,
    });

    let app = Router::new()
        .route("/scopes/:scope/items", get(list_items).post(create_item))
        .route("/scopes/:scope/items/:id/vote", axum::routing::post(cast_vote))
        .route(
            "/scopes/:scope/items/:id/reactions",
            axum::routing::post(toggle_reaction),
        )
        .route(
            "/scopes/:scope/items/:id",
            patch(edit_item).delete(delete_item),
        )
        .route("/sse/scopes/:scope", get(scope_events))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock backend serve");
    });

    MockBackend {
        url: format!("http://{addr}"),
        state,
        handle,
    }
}

async fn list_items(State(state): State<Arc<BackendState>>) -> axum::response::Response {
    let delay = *state.list_delay.lock().await;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if state.malformed_snapshots.load(Ordering::SeqCst) {
        return (StatusCode::OK, "not json").into_response();
    }
    let items = state.items.lock().await.clone();
    Json(SnapshotResponse {
        items,
        cursor: None,
        has_more: false,
    })
    .into_response()
}

async fn create_item(
    State(state): State<Arc<BackendState>>,
    Json(req): Json<CreateItemRequest>,
) -> axum::response::Response {
    let delay = *state.create_delay.lock().await;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if state.fail_creates.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response();
    }

    let id = format!("c{}", state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let record: ItemRecord = serde_json::from_value(serde_json::json!({
        "id": id,
        "parent_id": req.parent_id,
        "content": req.content,
        "author": req.author,
        "session": req.session,
        "created_at": Utc::now(),
    }))
    .unwrap();
    state.items.lock().await.push(record.clone());
    Json(record).into_response()
}

async fn cast_vote(
    State(state): State<Arc<BackendState>>,
    Path((_scope, id)): Path<(String, String)>,
    Json(req): Json<VoteRequest>,
) -> axum::response::Response {
    let mut items = state.items.lock().await;
    match items.iter_mut().find(|r| r.id == id) {
        Some(record) => {
            let delta = i64::from(i8::from(req.vote)) - i64::from(i8::from(record.user_vote));
            record.score = (record.score + delta).max(0);
            record.user_vote = req.vote;
            Json(record.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn toggle_reaction(
    State(state): State<Arc<BackendState>>,
    Path((_scope, id)): Path<(String, String)>,
    Json(req): Json<ReactionRequest>,
) -> axum::response::Response {
    let mut items = state.items.lock().await;
    match items.iter_mut().find(|r| r.id == id) {
        Some(record) => {
            let entry = record.reactions.entry(req.kind).or_default();
            if entry.user_reacted {
                entry.user_reacted = false;
                entry.count = entry.count.saturating_sub(1);
            } else {
                entry.user_reacted = true;
                entry.count += 1;
            }
            Json(record.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn edit_item(
    State(state): State<Arc<BackendState>>,
    Path((_scope, id)): Path<(String, String)>,
    Json(req): Json<EditItemRequest>,
) -> axum::response::Response {
    let mut items = state.items.lock().await;
    match items.iter_mut().find(|r| r.id == id) {
        Some(record) => {
            // The backend canonicalizes content on edit.
            record.content = req.content.trim().to_string();
            record.is_edited = true;
            record.edited_at = Some(Utc::now());
            Json(record.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_item(
    State(state): State<Arc<BackendState>>,
    Path((_scope, id)): Path<(String, String)>,
) -> StatusCode {
    let mut items = state.items.lock().await;
    let before = items.len();
    items.retain(|r| r.id != id);
    if items.len() < before {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn scope_events(
    State(state): State<Arc<BackendState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok((name, data)) => {
                    return Some((Ok(Event::default().event(name).data(data)), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
