//! HTTP client for an Algolia-compatible search index service.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use reindex_types::{DocumentId, IndexDocument, Settings};

use crate::error::SearchError;
use crate::service::{BrowseFilter, BrowsePage, QueryRule, SearchIndex};

/// Rules fetched per rules/search page.
const RULES_PAGE_SIZE: usize = 1000;

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct AlgoliaConfig {
    /// Application id, sent with every request
    pub app_id: String,

    /// Admin API key
    pub api_key: SecretString,

    /// Service base URL (e.g., "https://APPID.algolia.net")
    pub base_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Maximum attempts per call
    pub max_retries: u32,
}

impl AlgoliaConfig {
    /// Create config for the hosted endpoint of an application.
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let app_id = app_id.into();
        Self {
            base_url: format!("https://{}.algolia.net", app_id),
            app_id,
            api_key: SecretString::from(api_key.into()),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    /// Point the client at a different base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Build from loaded settings. Missing credentials are a configuration error.
    pub fn from_settings(settings: &Settings) -> Result<Self, SearchError> {
        let app_id = settings
            .app_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SearchError::Config("app_id is not set".to_string()))?;
        let api_key = settings
            .api_key
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SearchError::Config("api_key is not set".to_string()))?;

        let mut config = Self::new(app_id, api_key).with_max_retries(settings.max_retries);
        config.timeout = Duration::from_secs(settings.timeout_secs.max(1));
        if let Some(base_url) = &settings.base_url {
            config = config.with_base_url(base_url.clone());
        }
        Ok(config)
    }
}

/// HTTP implementation of [`SearchIndex`].
pub struct AlgoliaClient {
    client: Client,
    config: AlgoliaConfig,
}

#[derive(Serialize)]
struct BatchRequest<T: Serialize> {
    requests: Vec<BatchOperation<T>>,
}

#[derive(Serialize)]
struct BatchOperation<T: Serialize> {
    action: &'static str,
    body: T,
}

#[derive(Serialize)]
struct ObjectIdBody<'a> {
    #[serde(rename = "objectID")]
    object_id: &'a DocumentId,
}

#[derive(Deserialize)]
struct BrowseResponse {
    hits: Vec<IndexDocument>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct GetObjectsResponse {
    results: Vec<Option<IndexDocument>>,
}

#[derive(Deserialize)]
struct RulesSearchResponse {
    hits: Vec<QueryRule>,
    #[serde(default, rename = "nbPages")]
    nb_pages: usize,
}

impl AlgoliaClient {
    /// Create a new client.
    pub fn new(config: AlgoliaConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Call the service with retry logic.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, SearchError> {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, path = %path, "Calling search service");

            match self.make_request(method.clone(), path, body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_retryable() || attempts >= self.config.max_retries {
                        error!(error = %e, path = %path, attempts = attempts, "Search call failed");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Search call failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Make a single request.
    async fn make_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, SearchError> {
        let url = format!("{}{}", self.config.base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .header("X-Algolia-Application-Id", &self.config.app_id)
            .header("X-Algolia-API-Key", self.config.api_key.expose_secret())
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SearchError::Http(e.to_string()))?;

        if response.status() == 429 {
            return Err(SearchError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Api { status, message });
        }

        response
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))
    }

    async fn batch<T: Serialize>(
        &self,
        index: &str,
        action: &'static str,
        bodies: impl IntoIterator<Item = T>,
    ) -> Result<(), SearchError> {
        let request = BatchRequest {
            requests: bodies
                .into_iter()
                .map(|body| BatchOperation { action, body })
                .collect(),
        };
        if request.requests.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(&request)?;
        let _: serde_json::Value = self
            .call(Method::POST, &format!("/1/indexes/{}/batch", index), Some(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for AlgoliaClient {
    async fn browse_page(
        &self,
        index: &str,
        filter: &BrowseFilter,
        cursor: Option<String>,
    ) -> Result<BrowsePage, SearchError> {
        let body = match cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => serde_json::to_value(filter)?,
        };
        let response: BrowseResponse = self
            .call(Method::POST, &format!("/1/indexes/{}/browse", index), Some(&body))
            .await?;
        Ok(BrowsePage {
            hits: response.hits,
            cursor: response.cursor,
        })
    }

    async fn get_documents(
        &self,
        index: &str,
        ids: &[DocumentId],
    ) -> Result<Vec<Option<IndexDocument>>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let requests: Vec<_> = ids
            .iter()
            .map(|id| json!({ "indexName": index, "objectID": id }))
            .collect();
        let body = json!({ "requests": requests });
        let response: GetObjectsResponse = self
            .call(Method::POST, "/1/indexes/*/objects", Some(&body))
            .await?;
        if response.results.len() != ids.len() {
            return Err(SearchError::Parse(format!(
                "expected {} results, got {}",
                ids.len(),
                response.results.len()
            )));
        }
        Ok(response.results)
    }

    async fn save_documents(
        &self,
        index: &str,
        docs: &[IndexDocument],
    ) -> Result<(), SearchError> {
        self.batch(index, "updateObject", docs).await
    }

    async fn partial_update_documents(
        &self,
        index: &str,
        docs: &[IndexDocument],
    ) -> Result<(), SearchError> {
        self.batch(index, "partialUpdateObjectNoCreate", docs).await
    }

    async fn delete_documents(&self, index: &str, ids: &[DocumentId]) -> Result<(), SearchError> {
        self.batch(
            index,
            "deleteObject",
            ids.iter().map(|id| ObjectIdBody { object_id: id }),
        )
        .await
    }

    async fn get_settings(&self, index: &str) -> Result<serde_json::Value, SearchError> {
        self.call(Method::GET, &format!("/1/indexes/{}/settings", index), None)
            .await
    }

    async fn save_settings(
        &self,
        index: &str,
        settings: &serde_json::Value,
    ) -> Result<(), SearchError> {
        let _: serde_json::Value = self
            .call(
                Method::PUT,
                &format!("/1/indexes/{}/settings", index),
                Some(settings),
            )
            .await?;
        Ok(())
    }

    async fn browse_rules(&self, index: &str) -> Result<Vec<QueryRule>, SearchError> {
        let mut rules = Vec::new();
        let mut page = 0;
        loop {
            let body = json!({ "query": "", "page": page, "hitsPerPage": RULES_PAGE_SIZE });
            let response: RulesSearchResponse = self
                .call(
                    Method::POST,
                    &format!("/1/indexes/{}/rules/search", index),
                    Some(&body),
                )
                .await?;
            rules.extend(response.hits);
            page += 1;
            if page >= response.nb_pages {
                break;
            }
        }
        Ok(rules)
    }

    async fn save_rules(&self, index: &str, rules: &[QueryRule]) -> Result<(), SearchError> {
        if rules.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(rules)?;
        let _: serde_json::Value = self
            .call(
                Method::POST,
                &format!("/1/indexes/{}/rules/batch", index),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "algolia"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AlgoliaClient {
        let config = AlgoliaConfig::new("APP", "secret")
            .with_base_url(server.uri())
            .with_max_retries(1);
        AlgoliaClient::new(config).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = AlgoliaConfig::new("APP", "key");
        assert_eq!(config.base_url, "https://APP.algolia.net");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_config_from_settings_requires_credentials() {
        let settings = Settings::default();
        assert!(matches!(
            AlgoliaConfig::from_settings(&settings),
            Err(SearchError::Config(_))
        ));

        let settings = Settings {
            app_id: Some("APP".into()),
            api_key: Some("key".into()),
            base_url: Some("http://localhost:9999/".into()),
            ..Default::default()
        };
        let config = AlgoliaConfig::from_settings(&settings).unwrap();
        assert_eq!(config.base_url, "http://localhost:9999");
    }

    #[tokio::test]
    async fn test_save_documents_sends_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/products_en/batch"))
            .and(header("X-Algolia-Application-Id", "APP"))
            .and(header("X-Algolia-API-Key", "secret"))
            .and(body_partial_json(json!({
                "requests": [{"action": "updateObject", "body": {"objectID": "a", "title": "A"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"taskID": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let doc: IndexDocument =
            serde_json::from_value(json!({"objectID": "a", "title": "A"})).unwrap();
        client_for(&server)
            .save_documents("products_en", &[doc])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_documents_uses_delete_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/products_en/batch"))
            .and(body_partial_json(json!({
                "requests": [{"action": "deleteObject", "body": {"objectID": "x"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"taskID": 2})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .delete_documents("products_en", &[DocumentId::new("x")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_browse_page_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/products_en/browse"))
            .and(body_partial_json(json!({"cursor": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [{"objectID": "b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/products_en/browse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [{"objectID": "a"}],
                "cursor": "abc"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let all = crate::service::browse_all(&client, "products_en", &BrowseFilter::all())
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|d| d.object_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_get_documents_with_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/*/objects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"objectID": "a", "title": "A"}, null]
            })))
            .mount(&server)
            .await;

        let found = client_for(&server)
            .get_documents("products_en", &[DocumentId::new("a"), DocumentId::new("b")])
            .await
            .unwrap();
        assert!(found[0].is_some());
        assert!(found[1].is_none());
    }

    #[tokio::test]
    async fn test_api_error_and_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/indexes/missing/settings"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Index does not exist"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/indexes/busy/settings"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get_settings("missing").await.unwrap_err();
        assert!(matches!(err, SearchError::Api { status: 404, .. }));

        let err = client.get_settings("busy").await.unwrap_err();
        assert!(matches!(err, SearchError::RateLimited));
    }

    #[tokio::test]
    async fn test_browse_rules_pages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/products_en/rules/search"))
            .and(body_partial_json(json!({"page": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [{"objectID": "r1"}],
                "nbPages": 2
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/products_en/rules/search"))
            .and(body_partial_json(json!({"page": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [{"objectID": "r2"}],
                "nbPages": 2
            })))
            .mount(&server)
            .await;

        let rules = client_for(&server).browse_rules("products_en").await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].object_id, "r2");
    }
}
