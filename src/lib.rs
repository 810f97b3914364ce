//! Serve content-addressed catalogs to peers, sending only the parts they are missing.
//!
//! A peer posts the list of parts it wants from a catalog. The server asks the [`CatalogOracle`]
//! for the catalog's membership, keeps the wanted parts that are members, and streams them back
//! as a zip archive, followed by the catalog descriptor.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod archive;
pub mod client;
pub mod config;
pub mod delta;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod oracle;
pub mod server;
pub mod state;
pub mod store;

pub use oracle::CatalogOracle;
