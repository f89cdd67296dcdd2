//! Appwrite REST client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::gateway::{ChannelHandle, Collection, DocumentStore, EventHandler};
use crate::realtime::RealtimeClient;
use crate::{AppwriteError, DocumentList, Query};

/// Retries after the initial attempt for transient failures.
const MAX_RETRIES: u32 = 3;

/// Connection settings for the hosted document database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// API root, e.g. `https://cloud.appwrite.io/v1`.
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    /// Server API key. Browser-style sessions run without one.
    pub api_key: Option<String>,
}

impl GatewayConfig {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            database_id: database_id.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Realtime channel name for a collection.
    pub fn channel(&self, collection: Collection) -> String {
        format!(
            "databases.{}.collections.{}.documents",
            self.database_id,
            collection.as_str()
        )
    }
}

/// Client for the Appwrite databases API.
pub struct AppwriteClient {
    http: Client,
    config: GatewayConfig,
    realtime: RealtimeClient,
}

impl AppwriteClient {
    /// Create a new client for the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, AppwriteError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        let realtime = RealtimeClient::new(&config);

        Ok(Self {
            http,
            config,
            realtime,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn documents_url(&self, collection: Collection) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.config.endpoint,
            self.config.database_id,
            collection.as_str()
        )
    }

    fn document_url(&self, collection: Collection, id: &str) -> String {
        format!("{}/{}", self.documents_url(collection), id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("X-Appwrite-Project", &self.config.project_id);
        match &self.config.api_key {
            Some(key) => builder.header("X-Appwrite-Key", key),
            None => builder,
        }
    }

    /// Send a request, retrying failures that `retry_if` accepts with backoff
    /// (500ms, 1s, 2s).
    async fn send_with_retry(
        &self,
        op: &'static str,
        collection: Collection,
        id: Option<&str>,
        retry_if: fn(&AppwriteError) -> bool,
        build: impl Fn() -> RequestBuilder + Send + Sync,
    ) -> Result<Response, AppwriteError> {
        let mut attempt = 0;
        loop {
            let result = match build().send().await {
                Ok(response) => Self::check_status(response, collection, id).await,
                Err(e) => Err(AppwriteError::from(e)),
            };

            match result {
                Err(ref e) if retry_if(e) && attempt < MAX_RETRIES => {
                    let backoff_ms = 500 * (1u64 << attempt);
                    warn!(
                        op,
                        collection = %collection,
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Map a non-success response onto an error.
    async fn check_status(
        response: Response,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<Response, AppwriteError> {
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
            return Err(AppwriteError::RateLimited { retry_after_secs });
        }

        let text = response.text().await.map_err(|e| {
            AppwriteError::InvalidResponse(format!(
                "request failed ({}): failed to read response: {}",
                status, e
            ))
        })?;
        let api_error = serde_json::from_str::<ApiError>(&text).ok();

        match status {
            StatusCode::NOT_FOUND => Err(AppwriteError::NotFound {
                collection: collection.to_string(),
                id: id.unwrap_or_default().to_string(),
            }),
            StatusCode::CONFLICT => Err(AppwriteError::Conflict {
                collection: collection.to_string(),
                message: api_error.map(|e| e.message).unwrap_or(text),
            }),
            _ => match api_error {
                Some(e) => Err(AppwriteError::Api {
                    code: status.as_u16(),
                    kind: e.kind,
                    message: e.message,
                }),
                None => Err(AppwriteError::InvalidResponse(format!(
                    "request failed ({}): {}",
                    status, text
                ))),
            },
        }
    }
}

#[async_trait]
impl DocumentStore for AppwriteClient {
    async fn list_documents(
        &self,
        collection: Collection,
        queries: &[Query],
    ) -> Result<Vec<Value>, AppwriteError> {
        let url = self.documents_url(collection);
        let params = queries
            .iter()
            .map(|q| q.to_param().map(|p| ("queries[]", p)))
            .collect::<Result<Vec<_>, _>>()?;

        let response = self
            .send_with_retry("list_documents", collection, None, AppwriteError::is_transient, || {
                self.request(Method::GET, &url).query(&params)
            })
            .await?;

        let list: DocumentList = response.json().await?;
        debug!(
            collection = %collection,
            returned = list.documents.len(),
            total = list.total,
            "listed documents"
        );
        Ok(list.documents)
    }

    async fn create_document(
        &self,
        collection: Collection,
        id: Option<&str>,
        data: Value,
    ) -> Result<Value, AppwriteError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateRequest<'a> {
            document_id: &'a str,
            data: &'a Value,
        }

        let url = self.documents_url(collection);
        let body = CreateRequest {
            document_id: id.unwrap_or("unique()"),
            data: &data,
        };
        debug!(collection = %collection, body = %data, "creating document");

        // A create that timed out may have been committed, and resending it
        // with a server-picked id would store a second document.
        let response = self
            .send_with_retry("create_document", collection, id, AppwriteError::is_unsent, || {
                self.request(Method::POST, &url).json(&body)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        data: Value,
    ) -> Result<Value, AppwriteError> {
        #[derive(Serialize)]
        struct UpdateRequest<'a> {
            data: &'a Value,
        }

        let url = self.document_url(collection, id);
        let body = UpdateRequest { data: &data };
        debug!(collection = %collection, id, body = %data, "updating document");

        let response = self
            .send_with_retry(
                "update_document",
                collection,
                Some(id),
                AppwriteError::is_transient,
                || self.request(Method::PATCH, &url).json(&body),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<(), AppwriteError> {
        let url = self.document_url(collection, id);
        self.send_with_retry(
            "delete_document",
            collection,
            Some(id),
            AppwriteError::is_transient,
            || self.request(Method::DELETE, &url),
        )
        .await?;
        debug!(collection = %collection, id, "deleted document");
        Ok(())
    }

    fn subscribe(&self, collection: Collection, handler: EventHandler) -> ChannelHandle {
        self.realtime.subscribe(collection, handler)
    }
}

/// Error body returned by the REST API.
#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}
