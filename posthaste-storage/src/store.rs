use crate::client::Result;
use async_trait::async_trait;
use bytes::Bytes;
use posthaste_common::model::asset::AssetKey;
use url::Url;

/// Somewhere post assets can be written to and fetched back from by url.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Writes `bytes` under `key` and returns the url the asset is reachable at.
    async fn put(&self, key: AssetKey, bytes: Bytes) -> Result<Url>;
}
