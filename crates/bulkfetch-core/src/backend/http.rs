//! curl-backed implementation of [`AssetBackend`].
//!
//! Each call drives a blocking `curl::easy::Easy` handle inside
//! `spawn_blocking`. Metadata calls (listing, locator resolution) and payload
//! downloads use independent timeout budgets; payload transfers are larger
//! and slower than the JSON round trips.

use std::str;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::resilience::{classify_http_status, ErrorKind, FetchError};

use super::{AssetBackend, LocatorMap, RemoteItem};

/// HTTP client for a remote design-asset service.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    api_token: Option<String>,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ItemListing {
    items: Vec<RemoteItem>,
}

#[derive(Debug, Deserialize)]
struct LocatorListing {
    locators: LocatorMap,
}

struct HttpResponse {
    status: u32,
    body: Vec<u8>,
    retry_after: Option<Duration>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            api_token,
            metadata_timeout: Duration::from_secs(15),
            download_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeouts(mut self, metadata: Duration, download: Duration) -> Self {
        self.metadata_timeout = metadata;
        self.download_timeout = download;
        self
    }

    /// GET `url`, collecting the body in memory. Runs on the blocking pool.
    async fn get(&self, url: String, timeout: Duration, what: String) -> Result<HttpResponse, FetchError> {
        let token = self.api_token.clone();
        let response = tokio::task::spawn_blocking(move || perform_get(&url, token.as_deref(), timeout))
            .await
            .map_err(|e| FetchError::Internal(format!("blocking http task join: {}", e)))??;

        match status_error(&response, &what) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    fn metadata_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }
}

#[async_trait]
impl AssetBackend for HttpBackend {
    async fn list_items(&self, project: &str) -> Result<Vec<RemoteItem>, FetchError> {
        let url = self.metadata_url(&format!("projects/{}/items", project));
        let response = self
            .get(url, self.metadata_timeout, format!("project {}", project))
            .await?;
        let listing: ItemListing = serde_json::from_slice(&response.body)?;
        tracing::debug!(project, items = listing.items.len(), "structure listing fetched");
        Ok(listing.items)
    }

    async fn resolve_locators(
        &self,
        project: &str,
        ids: &[String],
        scale: f64,
    ) -> Result<LocatorMap, FetchError> {
        let url = self.metadata_url(&format!(
            "projects/{}/locators?ids={}&scale={}",
            project,
            ids.join(","),
            scale
        ));
        let response = self
            .get(url, self.metadata_timeout, format!("project {}", project))
            .await?;
        let listing: LocatorListing = serde_json::from_slice(&response.body)?;
        Ok(listing.locators)
    }

    async fn fetch_payload(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .get(
                locator.to_string(),
                self.download_timeout,
                format!("locator {}", locator),
            )
            .await?;
        Ok(response.body)
    }
}

/// Map a non-2xx response to the structured error the resilience layer
/// branches on. 2xx returns None.
fn status_error(response: &HttpResponse, what: &str) -> Option<FetchError> {
    if (200..300).contains(&response.status) {
        return None;
    }
    Some(match classify_http_status(response.status) {
        ErrorKind::RateLimited(_) => FetchError::RateLimited {
            retry_after: response.retry_after,
        },
        ErrorKind::NotFound => FetchError::NotFound { what: what.into() },
        _ => FetchError::Http {
            status: response.status,
        },
    })
}

/// Blocking GET with header capture for Retry-After.
fn perform_get(url: &str, token: Option<&str>, timeout: Duration) -> Result<HttpResponse, FetchError> {
    let mut body = Vec::new();
    let mut retry_after = None;

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.useragent("bulkfetch/0.1")?;
    easy.connect_timeout(Duration::from_secs(15).min(timeout))?;
    easy.timeout(timeout)?;

    if let Some(token) = token {
        let mut list = curl::easy::List::new();
        list.append(&format!("X-Api-Token: {}", token.trim()))?;
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(line) = str::from_utf8(data) {
                if let Some(value) = header_value(line, "Retry-After") {
                    retry_after = value.parse::<u64>().ok().map(Duration::from_secs);
                }
            }
            true
        })?;
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let status = easy.response_code()?;
    Ok(HttpResponse {
        status,
        body,
        retry_after,
    })
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case(name)
        .then(|| value.trim())
}
