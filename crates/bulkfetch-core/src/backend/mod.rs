//! Typed interface to the remote asset service.
//!
//! The engine never inspects backend names or task types at runtime: one
//! implementation of [`AssetBackend`] per service, selected by the caller.
//! The HTTP implementation lives in [`http`]; tests use in-memory fakes.

mod http;

pub use http::HttpBackend;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::resilience::FetchError;

/// One exportable item from the service's structure listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    /// Grouping key (e.g. page or frame name); used as the storage partition.
    #[serde(default)]
    pub group: String,
}

/// Batch locator-resolution response: item id to locator, `None` when the
/// service could not render that item.
pub type LocatorMap = BTreeMap<String, Option<String>>;

/// Remote design-asset service operations the engine consumes.
///
/// All methods return [`FetchError`] with enough structure for the resilience
/// layer to classify: rate-limit signals carry the service's retry-after
/// hint, missing resources are terminal, transport errors are retryable.
#[async_trait]
pub trait AssetBackend: Send + Sync {
    /// Structure listing: every exportable item id in a project.
    async fn list_items(&self, project: &str) -> Result<Vec<RemoteItem>, FetchError>;

    /// Resolve up to `batch_size` item ids to time-limited fetch locators in
    /// one round trip. Absent or null entries mean the item was not resolved;
    /// that is not an error for the batch as a whole.
    async fn resolve_locators(
        &self,
        project: &str,
        ids: &[String],
        scale: f64,
    ) -> Result<LocatorMap, FetchError>;

    /// Retrieve one payload via a previously resolved locator.
    async fn fetch_payload(&self, locator: &str) -> Result<Vec<u8>, FetchError>;
}
