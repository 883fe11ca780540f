// Document-storage collaborator.
//
// Documents, permissions and chat history live in an external service.
// The server only reads snapshots and permissions on join and writes
// content (through autosave) and chat messages back.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coedit_common::types::{DocumentRecord, PermissionLevel};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid storage url: {0}")]
    Url(#[from] url::ParseError),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Identity attached to a persisted chat message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageAuthor {
    pub user_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Abstraction over the document-storage service. Trait-based for testability.
///
/// All methods return `Send` futures so they can be awaited from connection
/// tasks and autosave timers on a multi-threaded runtime.
pub trait DocumentStore: Send + Sync + 'static {
    /// Stored content and metadata of a document.
    fn fetch_document(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<DocumentRecord, StoreError>> + Send;

    /// Access level of `user_id` on a document.
    fn permission_for(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<PermissionLevel, StoreError>> + Send;

    /// Persist new content attributed to `user_id`. Returns the updated record.
    fn persist_content(
        &self,
        document_id: &str,
        user_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<DocumentRecord, StoreError>> + Send;

    /// Persist a chat message. Returns the stored record as the service
    /// shaped it; callers normalize it.
    fn persist_message(
        &self,
        document_id: &str,
        author: &MessageAuthor,
        content: &str,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send;
}

// ── HTTP ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: PermissionLevel,
}

/// reqwest client for the storage service's JSON API.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url, token })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StoreError::Unavailable("storage url cannot be a base".into()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        document_id: &str,
    ) -> Result<T, StoreError> {
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(document_id.to_string()));
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

impl DocumentStore for HttpDocumentStore {
    async fn fetch_document(&self, document_id: &str) -> Result<DocumentRecord, StoreError> {
        let url = self.endpoint(&["documents", document_id])?;
        self.send(self.client.get(url), document_id).await
    }

    async fn permission_for(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<PermissionLevel, StoreError> {
        let url = self.endpoint(&["documents", document_id, "permissions", user_id])?;
        let response: PermissionResponse = self.send(self.client.get(url), document_id).await?;
        Ok(response.permission)
    }

    async fn persist_content(
        &self,
        document_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<DocumentRecord, StoreError> {
        let url = self.endpoint(&["documents", document_id, "content"])?;
        let body = json!({ "content": content, "userId": user_id });
        self.send(self.client.put(url).json(&body), document_id).await
    }

    async fn persist_message(
        &self,
        document_id: &str,
        author: &MessageAuthor,
        content: &str,
    ) -> Result<Value, StoreError> {
        let url = self.endpoint(&["documents", document_id, "messages"])?;
        let body = json!({
            "content": content,
            "authorId": author.user_id,
            "authorName": author.display_name,
            "authorEmail": author.email,
        });
        self.send(self.client.post(url).json(&body), document_id).await
    }
}

// ── In-memory ──────────────────────────────────────────────────────

/// One successful content write, recorded for inspection.
#[derive(Debug, Clone)]
pub struct ContentWrite {
    pub document_id: String,
    pub user_id: String,
    pub content: String,
    pub written_at: Instant,
}

#[derive(Debug)]
struct MemoryState {
    documents: HashMap<String, DocumentRecord>,
    permissions: HashMap<(String, String), PermissionLevel>,
    default_permission: PermissionLevel,
    messages: HashMap<String, Vec<Value>>,
    next_message_id: u64,
    content_writes: Vec<ContentWrite>,
    failing_writes: usize,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            documents: HashMap::new(),
            permissions: HashMap::new(),
            default_permission: PermissionLevel::Write,
            messages: HashMap::new(),
            next_message_id: 1,
            content_writes: Vec::new(),
            failing_writes: 0,
        }
    }
}

/// Process-local store for development and tests.
///
/// Unknown documents are created empty on first fetch. Every user holds
/// the default permission (`write`) unless granted otherwise.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_document(&self, document_id: &str, content: &str) {
        let mut state = self.state.write().await;
        state.documents.insert(
            document_id.to_string(),
            DocumentRecord {
                id: document_id.to_string(),
                title: String::new(),
                content: content.to_string(),
                updated_at: None,
                updated_by: None,
            },
        );
    }

    pub async fn grant(&self, document_id: &str, user_id: &str, level: PermissionLevel) {
        self.state
            .write()
            .await
            .permissions
            .insert((document_id.to_string(), user_id.to_string()), level);
    }

    pub async fn set_default_permission(&self, level: PermissionLevel) {
        self.state.write().await.default_permission = level;
    }

    /// Make the next `count` writes (content or message) fail.
    pub async fn fail_next_writes(&self, count: usize) {
        self.state.write().await.failing_writes = count;
    }

    pub async fn content_writes(&self) -> Vec<ContentWrite> {
        self.state.read().await.content_writes.clone()
    }

    pub async fn messages(&self, document_id: &str) -> Vec<Value> {
        self.state.read().await.messages.get(document_id).cloned().unwrap_or_default()
    }

    pub async fn document(&self, document_id: &str) -> Option<DocumentRecord> {
        self.state.read().await.documents.get(document_id).cloned()
    }
}

impl MemoryState {
    fn take_injected_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_writes == 0 {
            return Ok(());
        }
        self.failing_writes -= 1;
        Err(StoreError::Unavailable("injected write failure".into()))
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn fetch_document(&self, document_id: &str) -> Result<DocumentRecord, StoreError> {
        let mut state = self.state.write().await;
        let record = state.documents.entry(document_id.to_string()).or_insert_with(|| {
            DocumentRecord {
                id: document_id.to_string(),
                title: String::new(),
                content: String::new(),
                updated_at: None,
                updated_by: None,
            }
        });
        Ok(record.clone())
    }

    async fn permission_for(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<PermissionLevel, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .permissions
            .get(&(document_id.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(state.default_permission))
    }

    async fn persist_content(
        &self,
        document_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<DocumentRecord, StoreError> {
        let mut state = self.state.write().await;
        state.take_injected_failure()?;

        let record = state
            .documents
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentRecord {
                id: document_id.to_string(),
                title: String::new(),
                content: String::new(),
                updated_at: None,
                updated_by: None,
            });
        record.content = content.to_string();
        record.updated_at = Some(Utc::now());
        record.updated_by = Some(user_id.to_string());
        let record = record.clone();

        state.content_writes.push(ContentWrite {
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            written_at: Instant::now(),
        });
        Ok(record)
    }

    async fn persist_message(
        &self,
        document_id: &str,
        author: &MessageAuthor,
        content: &str,
    ) -> Result<Value, StoreError> {
        let mut state = self.state.write().await;
        state.take_injected_failure()?;

        let id = state.next_message_id;
        state.next_message_id += 1;
        let stored = json!({
            "id": id,
            "content": content,
            "authorId": author.user_id,
            "authorName": author.display_name,
            "authorEmail": author.email,
            "createdAt": Utc::now().to_rfc3339(),
        });
        state.messages.entry(document_id.to_string()).or_default().push(stored.clone());
        Ok(stored)
    }
}

// ── Backend selection ──────────────────────────────────────────────

/// Store chosen at startup from configuration.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Http(HttpDocumentStore),
    Memory(MemoryDocumentStore),
}

impl StoreBackend {
    pub fn from_config(storage_url: Option<&str>, token: Option<String>) -> Result<Self, StoreError> {
        match storage_url {
            Some(url) => Ok(Self::Http(HttpDocumentStore::new(url, token)?)),
            None => Ok(Self::Memory(MemoryDocumentStore::new())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Memory(_) => "memory",
        }
    }
}

impl DocumentStore for StoreBackend {
    async fn fetch_document(&self, document_id: &str) -> Result<DocumentRecord, StoreError> {
        match self {
            Self::Http(store) => store.fetch_document(document_id).await,
            Self::Memory(store) => store.fetch_document(document_id).await,
        }
    }

    async fn permission_for(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<PermissionLevel, StoreError> {
        match self {
            Self::Http(store) => store.permission_for(document_id, user_id).await,
            Self::Memory(store) => store.permission_for(document_id, user_id).await,
        }
    }

    async fn persist_content(
        &self,
        document_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<DocumentRecord, StoreError> {
        match self {
            Self::Http(store) => store.persist_content(document_id, user_id, content).await,
            Self::Memory(store) => store.persist_content(document_id, user_id, content).await,
        }
    }

    async fn persist_message(
        &self,
        document_id: &str,
        author: &MessageAuthor,
        content: &str,
    ) -> Result<Value, StoreError> {
        match self {
            Self::Http(store) => store.persist_message(document_id, author, content).await,
            Self::Memory(store) => store.persist_message(document_id, author, content).await,
        }
    }
}
