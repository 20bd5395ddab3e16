//! HTTP document-store client implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{Entry, ListDocumentsResponse, REMOTE_BATCH_HARD_LIMIT, RemoteError, RemoteStore, WriteOp};

/// Page size used when listing whole collections.
const LIST_PAGE_SIZE: u32 = 100;

/// Attempts per request: initial + 3 retries with backoff.
const MAX_ATTEMPTS: u32 = 4;

/// Client for a REST document store.
///
/// Documents live at `{base}/v1/collections/{collection}/documents/{id}`;
/// atomic batches are posted to `{base}/v1/batch`.
pub struct DocumentClient {
    http: Client,
    base_url: Url,
    token: Arc<RwLock<Option<String>>>,
    batch_limit: usize,
}

impl DocumentClient {
    /// Create a new client for the given store URL.
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            http,
            base_url,
            token: Arc::new(RwLock::new(None)),
            batch_limit: REMOTE_BATCH_HARD_LIMIT,
        })
    }

    /// Override the store's batch ceiling (for stores with a lower limit).
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Set the bearer token sent with every request.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    /// Get the store URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked for cannot-be-a-base in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    fn document_url(&self, collection: &str, id: &str) -> Url {
        self.url(&["collections", collection, "documents", id])
    }

    /// Send a request, retrying transient failures with exponential backoff.
    async fn send_with_retry<F>(&self, op: &str, build: F) -> Result<Response, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            let mut request = build();
            if let Some(token) = self.token.read().await.as_deref() {
                request = request.bearer_auth(token);
            }

            let result = match request.send().await {
                Ok(response) => Self::check_status(response).await,
                Err(e) => Err(RemoteError::from(e)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff_ms = 500 * (1 << attempt); // 500ms, 1s, 2s
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        op,
                        "transient error from document store, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RemoteError::InvalidResponse("retry exhausted".into())))
    }

    /// Map a non-success status to an error.
    async fn check_status(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(RemoteError::RateLimited { retry_after_secs });
        }

        let text = response.text().await.unwrap_or_default();

        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(RemoteError::Unavailable(format!("{}: {}", status, text)));
        }

        let message = serde_json::from_str::<StoreErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);

        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// List one page of a collection.
    pub async fn list_documents(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse, RemoteError> {
        let url = self.url(&["collections", collection, "documents"]);
        let page_size = page_size.to_string();

        let response = self
            .send_with_retry("list_documents", || {
                let mut request = self.http.get(url.clone()).query(&[("pageSize", &page_size)]);
                if let Some(token) = page_token {
                    request = request.query(&[("pageToken", token)]);
                }
                request
            })
            .await?;

        Self::parse(response).await
    }

    /// List every document in a collection (handles pagination).
    pub async fn list_all_documents(&self, collection: &str) -> Result<Vec<Entry>, RemoteError> {
        let mut documents = Vec::new();
        let mut page_token = None;

        loop {
            let page = self
                .list_documents(collection, LIST_PAGE_SIZE, page_token.as_deref())
                .await?;

            documents.extend(page.documents);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(collection, count = documents.len(), "listed collection");
        Ok(documents)
    }

    /// Fetch a single document. Returns `None` if it does not exist.
    pub async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Entry>, RemoteError> {
        let url = self.document_url(collection, id);
        match self
            .send_with_retry("get_document", || self.http.get(url.clone()))
            .await
        {
            Ok(response) => Ok(Some(Self::parse(response).await?)),
            Err(RemoteError::Rejected { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RemoteStore for DocumentClient {
    async fn get_collection(&self, collection: &str) -> Result<Vec<Entry>, RemoteError> {
        let documents = self.list_all_documents(collection).await?;
        Ok(documents.into_iter().map(Entry::normalized).collect())
    }

    async fn put_document(&self, collection: &str, entry: &Entry) -> Result<(), RemoteError> {
        let url = self.document_url(collection, &entry.id);
        self.send_with_retry("put_document", || self.http.put(url.clone()).json(entry))
            .await?;
        debug!(collection, id = %entry.id, "put document");
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let url = self.document_url(collection, id);
        match self
            .send_with_retry("delete_document", || self.http.delete(url.clone()))
            .await
        {
            Ok(_) | Err(RemoteError::Rejected { status: 404, .. }) => {
                debug!(collection, id, "deleted document");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_batch(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        if ops.is_empty() {
            return Ok(());
        }
        if ops.len() > self.batch_limit {
            return Err(RemoteError::BatchTooLarge {
                len: ops.len(),
                max: self.batch_limit,
            });
        }

        #[derive(Serialize)]
        struct BatchRequest<'a> {
            writes: &'a [WriteOp],
        }

        let url = self.url(&["batch"]);
        let body = BatchRequest { writes: &ops };

        debug!(count = ops.len(), "committing batch");
        self.send_with_retry("commit_batch", || self.http.post(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}

/// Error body returned by the store.
#[derive(Debug, Deserialize)]
struct StoreErrorBody {
    message: String,
}
