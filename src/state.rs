//! Shared state for the HTTP handlers

use std::{sync::Arc, time::Duration};

use crate::{identity::Identity, metrics::Metrics, oracle::CatalogOracle, store::PartStore};

/// The shared app state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The catalog membership oracle
    pub oracle: CatalogOracle,
    /// Identity of this process, used to refuse requests from ourselves
    pub identity: Identity,
    /// Layout of the part library
    pub store: Arc<dyn PartStore>,
    /// Upper bound for streaming one archive
    pub request_timeout: Duration,
    /// Server metrics
    pub metrics: Arc<Metrics>,
}
