//! HTTP client for the feed backend.
//!
//! Thin wrapper around `reqwest` for the REST endpoints the engine consumes:
//! snapshot fetches plus the create/vote/react/edit/delete operations, each
//! returning the authoritative updated record. The SSE live channel is
//! consumed by the feed engine itself; this type only knows the URL.

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{FeedError, FeedResult};
use crate::item::{AuthorIdentity, SessionId, Vote};
use crate::types::{
    CreateItemRequest, EditItemRequest, ItemRecord, ReactionRequest, SnapshotResponse, VoteRequest,
};

/// Client for one scope (a confession's comment list, or a campus feed) on
/// one backend server.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: Client,
    server: String,
    scope: String,
    session: SessionId,
}

impl FeedClient {
    pub fn new(server: impl Into<String>, scope: impl Into<String>, session: SessionId) -> Self {
        Self {
            http: Client::new(),
            server: server.into().trim_end_matches('/').to_string(),
            scope: scope.into(),
            session,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    fn items_url(&self) -> String {
        format!("{}/scopes/{}/items", self.server, self.scope)
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/scopes/{}/items/{}", self.server, self.scope, id)
    }

    /// URL of the scope's SSE live channel.
    pub fn sse_url(&self) -> String {
        format!("{}/sse/scopes/{}", self.server, self.scope)
    }

    /// Fetch the authoritative flat item list for this scope.
    pub async fn fetch_snapshot(&self, cursor: Option<&str>) -> FeedResult<SnapshotResponse> {
        let mut request = self
            .http
            .get(self.items_url())
            .query(&[("session", self.session.as_str())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let resp = request.send().await?;
        let snapshot: SnapshotResponse = expect_json(resp).await?;
        debug!(
            scope = %self.scope,
            items = snapshot.items.len(),
            has_more = snapshot.has_more,
            "fetched snapshot"
        );
        Ok(snapshot)
    }

    /// Create a confession (no parent) or a reply. Returns the authoritative
    /// record with the server-assigned id.
    pub async fn create_item(
        &self,
        parent_id: Option<String>,
        content: &str,
        author: AuthorIdentity,
    ) -> FeedResult<ItemRecord> {
        if content.trim().is_empty() {
            return Err(FeedError::EmptyContent);
        }
        let body = CreateItemRequest {
            parent_id,
            content: content.to_string(),
            author,
            session: self.session.clone(),
        };
        let resp = self.http.post(self.items_url()).json(&body).send().await?;
        expect_json(resp).await
    }

    /// Cast (or clear) this session's vote on an item.
    pub async fn cast_vote(&self, id: &str, vote: Vote) -> FeedResult<ItemRecord> {
        let body = VoteRequest {
            vote,
            session: self.session.clone(),
        };
        let url = format!("{}/vote", self.item_url(id));
        let resp = self.http.post(url).json(&body).send().await?;
        expect_json(resp).await
    }

    /// Toggle this session's reaction of the given kind on an item.
    pub async fn toggle_reaction(&self, id: &str, kind: &str) -> FeedResult<ItemRecord> {
        let body = ReactionRequest {
            kind: kind.to_string(),
            session: self.session.clone(),
        };
        let url = format!("{}/reactions", self.item_url(id));
        let resp = self.http.post(url).json(&body).send().await?;
        expect_json(resp).await
    }

    /// Replace an item's content. Ownership is checked by the engine before
    /// calling and re-enforced server-side.
    pub async fn edit_item(&self, id: &str, content: &str) -> FeedResult<ItemRecord> {
        if content.trim().is_empty() {
            return Err(FeedError::EmptyContent);
        }
        let body = EditItemRequest {
            content: content.to_string(),
            session: self.session.clone(),
        };
        let resp = self
            .http
            .patch(self.item_url(id))
            .json(&body)
            .send()
            .await?;
        expect_json(resp).await
    }

    /// Delete an item owned by this session.
    pub async fn delete_item(&self, id: &str) -> FeedResult<()> {
        let resp = self
            .http
            .delete(self.item_url(id))
            .query(&[("session", self.session.as_str())])
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(status_error(resp).await)
        }
    }
}

async fn expect_json<T: DeserializeOwned>(resp: reqwest::Response) -> FeedResult<T> {
    if !resp.status().is_success() {
        return Err(status_error(resp).await);
    }
    let body = resp.text().await?;
    Ok(serde_json::from_str(&body)?)
}

async fn status_error(resp: reqwest::Response) -> FeedError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    FeedError::Status { status, body }
}
