//! The main server: catalog oracle plus the HTTP delta endpoint.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tracing::info;

use crate::{
    config::Config,
    http::HttpServer,
    identity::Identity,
    metrics::Metrics,
    oracle::CatalogOracle,
    state::AppState,
    store::{FsStore, PartStore},
};

/// Spawn the server and run until the `Ctrl-C` signal is received, then shutdown.
pub async fn run_with_config_until_ctrl_c(config: Config) -> Result<()> {
    let store: Arc<dyn PartStore> = Arc::new(FsStore::new(config.storage_root()?));
    info!("serving catalogs from {}", store.root().display());
    let oracle = CatalogOracle::from_store(store.clone()).await?;
    let server = Server::spawn(config, store, oracle).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown");
    server.shutdown().await?;
    Ok(())
}

/// The catalog-delta server.
pub struct Server {
    http_server: HttpServer,
    state: AppState,
}

impl Server {
    /// Spawn the server.
    ///
    /// The oracle is shared with the caller, who may keep registering catalogs while the server
    /// runs.
    pub async fn spawn(
        config: Config,
        store: Arc<dyn PartStore>,
        oracle: CatalogOracle,
    ) -> Result<Self> {
        let identity = config.identity()?;
        info!(%identity, "process identity");
        let state = AppState {
            oracle,
            identity,
            store,
            request_timeout: config.request_timeout,
            metrics: Arc::new(Metrics::default()),
        };
        let http_server = HttpServer::spawn(config.http, state.clone()).await?;
        Ok(Self { http_server, state })
    }

    /// The identity this server refuses delta requests from.
    pub fn identity(&self) -> &Identity {
        &self.state.identity
    }

    /// The server metrics.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.state.metrics
    }

    /// The catalog oracle the server answers from.
    pub fn oracle(&self) -> &CatalogOracle {
        &self.state.oracle
    }

    /// The bound address of the HTTP server.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_server.http_addr()
    }

    /// Cancel the server tasks and wait for all tasks to complete.
    pub async fn shutdown(self) -> Result<()> {
        self.http_server.shutdown().await
    }

    /// Wait for all tasks to complete.
    ///
    /// This will run forever unless the HTTP server fails.
    pub async fn run_until_error(self) -> Result<()> {
        self.http_server.run_until_done().await
    }

    /// Spawn a server suitable for testing, bound to a random localhost port.
    ///
    /// It returns the server handle and the [`Url`] of the HTTP server.
    ///
    /// [`Url`]: url::Url
    #[cfg(test)]
    pub async fn spawn_for_tests(
        store: Arc<dyn PartStore>,
        oracle: CatalogOracle,
    ) -> Result<(Self, url::Url)> {
        Self::spawn_for_tests_with_timeout(store, oracle, Config::default().request_timeout).await
    }

    /// Spawn a server suitable for testing, with a custom request timeout.
    #[cfg(test)]
    pub async fn spawn_for_tests_with_timeout(
        store: Arc<dyn PartStore>,
        oracle: CatalogOracle,
        request_timeout: std::time::Duration,
    ) -> Result<(Self, url::Url)> {
        use std::net::{IpAddr, Ipv4Addr};

        let mut config = Config::default();
        config.http.port = 0;
        config.http.bind_addr = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        config.storage.root = Some(store.root().to_path_buf());
        config.request_timeout = request_timeout;

        let server = Self::spawn(config, store, oracle).await?;
        let http_url = format!("http://{}", server.http_addr()).parse()?;
        Ok((server, http_url))
    }
}
