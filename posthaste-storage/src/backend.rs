//! Asset storage on top of OpenDAL.

use crate::{
    client::{Result, StorageError},
    store::AssetStore,
};
use async_trait::async_trait;
use bytes::Bytes;
use opendal::{Operator, services};
use posthaste_common::model::asset::AssetKey;
use tracing::{debug, info};
use url::Url;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum BackendConfig {
    AzureBlob {
        account: String,
        access_key: String,
        container: String,
        /// Defaults to `https://{account}.blob.core.windows.net`.
        endpoint: Option<String>,
    },
    /// Keeps assets in process memory, they are gone after a restart.
    Memory,
}

/// Writes assets through an OpenDAL operator and derives their urls from a base url.
#[derive(Clone)]
pub struct OpendalStore {
    operator: Operator,
    public_url: Url,
}

impl OpendalStore {
    /// Creates the store. Asset urls are `public_url` joined with the asset key, when no
    /// `public_url` is given it is derived from the backend.
    pub fn new(config: &BackendConfig, public_url: Option<Url>) -> Result<Self> {
        let (operator, derived_url) = match config {
            BackendConfig::AzureBlob {
                account,
                access_key,
                container,
                endpoint,
            } => {
                let endpoint = endpoint
                    .clone()
                    .unwrap_or_else(|| format!("https://{account}.blob.core.windows.net"));
                let builder = services::Azblob::default()
                    .container(container)
                    .account_name(account)
                    .account_key(access_key)
                    .endpoint(&endpoint);
                let operator = Operator::new(builder)
                    .map_err(|err| StorageError::Init(err.to_string()))?
                    .finish();

                (operator, format!("{}/{container}/", endpoint.trim_end_matches('/')))
            }
            BackendConfig::Memory => {
                let operator = Operator::new(services::Memory::default())
                    .map_err(|err| StorageError::Init(err.to_string()))?
                    .finish();

                (operator, "memory:///".to_owned())
            }
        };

        let public_url = match public_url {
            Some(url) => url,
            None => Url::parse(&derived_url)?,
        };

        info!(%public_url, "Storage backend initialized");
        Ok(Self {
            operator,
            public_url: with_trailing_slash(public_url),
        })
    }

    fn url_for(&self, key: AssetKey) -> Result<Url> {
        Ok(self.public_url.join(&key.to_string())?)
    }
}

/// Makes sure joining a key appends to the path instead of replacing its last segment.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl AssetStore for OpendalStore {
    async fn put(&self, key: AssetKey, bytes: Bytes) -> Result<Url> {
        let path = key.to_string();
        debug!(%path, size = bytes.len(), "Writing asset");

        self.operator.write(&path, bytes).await?;

        self.url_for(key)
    }
}
