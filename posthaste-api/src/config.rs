use posthaste_broker::client::BrokerConfig;
use posthaste_common::queue::Retention;
use posthaste_storage::backend::BackendConfig;
use serde::Deserialize;
use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};
use thiserror::Error;
use url::Url;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
#[error("{0} must be set when using the azblob storage backend")]
pub struct MissingSettingError(pub &'static str);

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Azblob,
    Memory,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct Env {
    #[serde(default = "default_server_address")]
    pub server_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    pub broker_url: String,
    #[serde(default = "default_broker_pool_size")]
    pub broker_pool_size: usize,
    #[serde(default = "default_broker_timeout_ms")]
    pub broker_timeout_ms: u64,
    /// Zero keeps messages regardless of age.
    #[serde(default = "default_broker_queue_max_age_ms")]
    pub broker_queue_max_age_ms: u64,
    /// Zero keeps any number of messages.
    #[serde(default = "default_broker_queue_max_messages")]
    pub broker_queue_max_messages: u64,
    #[serde(default)]
    pub storage_backend: StorageBackend,
    pub azure_storage_account: Option<String>,
    pub azure_storage_accesskey: Option<String>,
    pub azure_storage_containername: Option<String>,
    pub azure_storage_endpoint: Option<String>,
    pub storage_public_url: Option<Url>,
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_server_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    3000
}

fn default_broker_pool_size() -> usize {
    8
}

fn default_broker_timeout_ms() -> u64 {
    10_000
}

fn default_broker_queue_max_age_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_broker_queue_max_messages() -> u64 {
    100_000
}

fn default_storage_timeout_ms() -> u64 {
    30_000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "https://artwo.onrender.com".to_owned(),
        "http://localhost:5173".to_owned(),
    ]
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Env {
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            url: self.broker_url.clone(),
            pool_size: self.broker_pool_size,
            timeout: Duration::from_millis(self.broker_timeout_ms),
            retention: Retention {
                max_age: (self.broker_queue_max_age_ms > 0)
                    .then(|| Duration::from_millis(self.broker_queue_max_age_ms)),
                max_messages: (self.broker_queue_max_messages > 0)
                    .then_some(self.broker_queue_max_messages),
            },
        }
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn backend_config(&self) -> Result<BackendConfig, MissingSettingError> {
        match self.storage_backend {
            StorageBackend::Memory => Ok(BackendConfig::Memory),
            StorageBackend::Azblob => {
                let required = |value: &Option<String>, name| {
                    value.clone().ok_or(MissingSettingError(name))
                };

                Ok(BackendConfig::AzureBlob {
                    account: required(&self.azure_storage_account, "AZURE_STORAGE_ACCOUNT")?,
                    access_key: required(&self.azure_storage_accesskey, "AZURE_STORAGE_ACCESSKEY")?,
                    container: required(
                        &self.azure_storage_containername,
                        "AZURE_STORAGE_CONTAINERNAME",
                    )?,
                    endpoint: self.azure_storage_endpoint.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Env, MissingSettingError, StorageBackend};
    use posthaste_common::queue::Retention;
    use posthaste_storage::backend::BackendConfig;
    use std::{net::Ipv4Addr, time::Duration};

    fn env(vars: &[(&str, &str)]) -> Env {
        envy::from_iter(
            vars.iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned())),
        )
        .unwrap()
    }

    #[test]
    fn defaults_apply() {
        let env = env(&[("BROKER_URL", "memory://")]);

        assert_eq!(env.server_address, Ipv4Addr::UNSPECIFIED);
        assert_eq!(env.port, 3000);
        assert_eq!(env.storage_backend, StorageBackend::Azblob);
        assert_eq!(
            env.cors_origins,
            ["https://artwo.onrender.com", "http://localhost:5173"]
        );
        assert_eq!(env.broker_config().pool_size, 8);
        assert_eq!(env.broker_config().timeout, Duration::from_secs(10));
        assert_eq!(env.storage_timeout(), Duration::from_secs(30));
        assert_eq!(env.max_upload_bytes, 10_485_760);
        assert_eq!(
            env.broker_config().retention,
            Retention {
                max_age: Some(Duration::from_secs(86_400)),
                max_messages: Some(100_000),
            }
        );
    }

    #[test]
    fn zero_retention_bounds_are_off() {
        let env = env(&[
            ("BROKER_URL", "memory://"),
            ("BROKER_QUEUE_MAX_AGE_MS", "0"),
            ("BROKER_QUEUE_MAX_MESSAGES", "0"),
        ]);

        assert_eq!(env.broker_config().retention, Retention::default());
    }

    #[test]
    fn broker_url_is_required() {
        assert!(envy::from_iter::<_, Env>(Vec::<(String, String)>::new()).is_err());
    }

    #[test]
    fn azure_settings_are_collected() {
        let env = env(&[
            ("BROKER_URL", "nats://localhost:4222"),
            ("PORT", "8080"),
            ("AZURE_STORAGE_ACCOUNT", "artwo"),
            ("AZURE_STORAGE_ACCESSKEY", "a2V5"),
            ("AZURE_STORAGE_CONTAINERNAME", "posts"),
            ("CORS_ORIGINS", "https://a.example,https://b.example"),
        ]);

        assert_eq!(env.port, 8080);
        assert_eq!(env.cors_origins, ["https://a.example", "https://b.example"]);
        assert_eq!(
            env.backend_config().unwrap(),
            BackendConfig::AzureBlob {
                account: "artwo".to_owned(),
                access_key: "a2V5".to_owned(),
                container: "posts".to_owned(),
                endpoint: None,
            }
        );
    }

    #[test]
    fn azure_without_container_is_refused() {
        let env = env(&[
            ("BROKER_URL", "memory://"),
            ("AZURE_STORAGE_ACCOUNT", "artwo"),
            ("AZURE_STORAGE_ACCESSKEY", "a2V5"),
        ]);

        assert_eq!(
            env.backend_config().unwrap_err(),
            MissingSettingError("AZURE_STORAGE_CONTAINERNAME")
        );
    }

    #[test]
    fn memory_backend_needs_no_azure_settings() {
        let env = env(&[("BROKER_URL", "memory://"), ("STORAGE_BACKEND", "memory")]);

        assert_eq!(env.backend_config().unwrap(), BackendConfig::Memory);
    }
}
