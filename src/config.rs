//! Configuration for the server

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{http::HttpConfig, identity::Identity};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CATALOG_DELTA_DATA_DIR";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Server configuration
///
/// The config is usually loaded from a file with [`Self::load`].
///
/// The struct also implements [`Default`] which creates a config suitable for local development
/// and testing.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Config for the HTTP server
    pub http: HttpConfig,
    /// Where the part library and catalog descriptors live.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Pin the process identity instead of generating a random one at startup.
    ///
    /// Two servers sharing an identity will refuse to serve each other.
    #[serde(default)]
    pub identity: Option<String>,
    /// Upper bound for streaming one delta archive to a client.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

/// Config for the storage layout.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage root. Defaults to [`Config::data_dir`].
    pub root: Option<PathBuf>,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl Config {
    /// Load the config from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        let config: Config = toml::from_str(&s)?;
        Ok(config)
    }

    /// Get the data directory.
    pub fn data_dir() -> Result<PathBuf> {
        let dir = if let Some(val) = env::var_os(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            let path = dirs_next::data_dir().ok_or_else(|| {
                anyhow!("operating environment provides no directory for application data")
            })?;
            path.join("catalog-delta")
        };
        Ok(dir)
    }

    /// Get the storage root, falling back to the data directory.
    pub fn storage_root(&self) -> Result<PathBuf> {
        match &self.storage.root {
            Some(root) => Ok(root.clone()),
            None => Self::data_dir(),
        }
    }

    /// Get the process identity: the configured one, or a freshly generated one.
    pub fn identity(&self) -> Result<Identity> {
        match &self.identity {
            Some(identity) => identity.parse().context("invalid identity in config"),
            None => Ok(Identity::generate(rand::thread_rng())),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                port: 8080,
                bind_addr: None,
            },
            storage: StorageConfig::default(),
            identity: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            [http]
            port = 9000
            "#,
        )?;
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(config.storage.root.is_none());
        assert!(config.identity.is_none());
        Ok(())
    }

    #[test]
    fn parse_full() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            identity = "0123456789abcdef"
            request_timeout = "90s"

            [http]
            port = 0
            bind_addr = "127.0.0.1"

            [storage]
            root = "/srv/hololib"
            "#,
        )?;
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.storage_root()?, PathBuf::from("/srv/hololib"));
        assert_eq!(config.identity()?.as_str(), "0123456789abcdef");
        assert_eq!(
            config.http.bind_addr,
            Some(std::net::Ipv4Addr::LOCALHOST.into())
        );
        Ok(())
    }

    #[test]
    fn generated_identity_when_unset() -> Result<()> {
        let config = Config::default();
        assert_ne!(config.identity()?, config.identity()?);
        Ok(())
    }
}
