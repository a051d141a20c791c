use crate::store::AssetStore;
use bytes::Bytes;
use posthaste_common::model::asset::AssetKey;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage initialization failed: {0}")]
    Init(String),
    #[error("Error uploading asset: {0}")]
    Backend(#[from] opendal::Error),
    #[error("Asset url could not be built: {0}")]
    Url(#[from] url::ParseError),
    #[error("Asset upload timed out after {0:?}")]
    Timeout(Duration),
}

/// Uploads post assets under freshly generated keys.
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn AssetStore>,
    timeout: Duration,
}

impl StorageClient {
    #[must_use]
    pub fn new(store: Arc<dyn AssetStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Stores `bytes` under a new random key and returns its url once fully written.
    #[instrument(skip_all, fields(size = bytes.len()))]
    pub async fn upload(&self, bytes: Bytes) -> Result<Url> {
        let key = AssetKey::generate();

        let url = tokio::time::timeout(self.timeout, self.store.put(key, bytes))
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))??;

        debug!(%key, %url, "Asset uploaded");
        Ok(url)
    }
}
