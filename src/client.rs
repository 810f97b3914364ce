//! Client side of the delta protocol.
//!
//! A node that is missing parts of a catalog sends a peer the list of parts it wants and
//! receives an archive with those the peer recognizes as members, plus the catalog descriptor.
//! [`missing_parts`](crate::store::missing_parts) computes the wanted list from the local library. Requests carry the local [`Identity`] so
//! that a node listed among its own peers refuses to answer itself.

use std::{
    io,
    path::{Path, PathBuf},
};

use futures_lite::StreamExt;
use http::StatusCode;
use snafu::{ResultExt, Snafu, ensure};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::{
    archive,
    identity::{IDENTITY_HEADER, Identity},
    oracle::is_valid_catalog_name,
    store::PartStore,
};

/// Errors returned by the [`DeltaClient`].
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("invalid catalog name {catalog:?}"))]
    InvalidCatalog { catalog: String },
    #[snafu(display("cannot build delta url from {peer}"))]
    InvalidUrl {
        peer: Url,
        source: url::ParseError,
    },
    #[snafu(display("delta request to {url} failed"))]
    Transport { url: Url, source: reqwest::Error },
    #[snafu(display("peer does not know catalog {catalog:?}"))]
    UnknownCatalog { catalog: String },
    #[snafu(display("peer refused the request as coming from itself"))]
    SelfRequest,
    #[snafu(display("peer answered with unexpected status {status}"))]
    UnexpectedStatus { status: StatusCode },
    #[snafu(display("failed to write {}", path.display()))]
    Io { path: PathBuf, source: io::Error },
    #[snafu(display("failed to unpack delta archive"))]
    Unpack {
        #[snafu(source(from(anyhow::Error, Into::into)))]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Requests catalog deltas from peers.
#[derive(Debug, Clone)]
pub struct DeltaClient {
    http: reqwest::Client,
    identity: Identity,
}

impl DeltaClient {
    /// Create a client sending `identity` with every request.
    pub fn new(identity: Identity) -> Self {
        Self::with_http_client(reqwest::Client::new(), identity)
    }

    /// Create a client on top of an existing [`reqwest::Client`].
    pub fn with_http_client(http: reqwest::Client, identity: Identity) -> Self {
        Self { http, identity }
    }

    /// The delta url for `catalog` on the peer reachable at `peer`.
    ///
    /// `peer` is treated as a directory, with or without a trailing slash.
    pub fn delta_url(peer: &Url, catalog: &str) -> Result<Url, Error> {
        ensure!(
            is_valid_catalog_name(catalog),
            InvalidCatalogSnafu { catalog }
        );
        let mut base = peer.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(catalog).context(InvalidUrlSnafu { peer: peer.clone() })
    }

    /// Ask `peer` for the `wanted` parts of `catalog`.
    ///
    /// Returns the successful response; its body is the zip archive.
    pub async fn request<I, S>(
        &self,
        peer: &Url,
        catalog: &str,
        wanted: I,
    ) -> Result<reqwest::Response, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let url = Self::delta_url(peer, catalog)?;
        let mut body = String::new();
        for part in wanted {
            body.push_str(part.as_ref());
            body.push('\n');
        }
        debug!(%url, bytes = body.len(), "requesting delta");
        let response = self
            .http
            .post(url.clone())
            .header(IDENTITY_HEADER, self.identity.as_str())
            .body(body)
            .send()
            .await
            .context(TransportSnafu { url })?;
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => UnknownCatalogSnafu { catalog }.fail(),
            StatusCode::CONFLICT => SelfRequestSnafu.fail(),
            status => UnexpectedStatusSnafu { status }.fail(),
        }
    }

    /// Download the delta archive for `catalog` to `dest`. Returns the archive size.
    pub async fn download<I, S>(
        &self,
        peer: &Url,
        catalog: &str,
        wanted: I,
        dest: &Path,
    ) -> Result<u64, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let response = self.request(peer, catalog, wanted).await?;
        let url = response.url().clone();
        let mut file = tokio::fs::File::create(dest)
            .await
            .context(IoSnafu { path: dest })?;
        let mut stream = std::pin::pin!(response.bytes_stream());
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context(TransportSnafu { url: url.clone() })?;
            file.write_all(&chunk).await.context(IoSnafu { path: dest })?;
            size += chunk.len() as u64;
        }
        file.flush().await.context(IoSnafu { path: dest })?;
        Ok(size)
    }

    /// Fetch the delta for `catalog` and unpack it into `store`.
    ///
    /// The archive is staged next to the library and removed afterwards, whether unpacking
    /// succeeded or not. Returns the unpacked entry names; the catalog descriptor is the last.
    pub async fn fetch_into<I, S>(
        &self,
        peer: &Url,
        catalog: &str,
        wanted: I,
        store: &dyn PartStore,
    ) -> Result<Vec<String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let root = store.root();
        tokio::fs::create_dir_all(root)
            .await
            .context(IoSnafu { path: root })?;
        let staging = root.join(format!(".{catalog}.{:016x}.delta.zip", rand::random::<u64>()));
        let res: Result<Vec<String>, Error> = async {
            self.download(peer, catalog, wanted, &staging).await?;
            archive::unpack(&staging, root).await.context(UnpackSnafu)
        }
        .await;
        if let Err(err) = tokio::fs::remove_file(&staging).await {
            if err.kind() != io::ErrorKind::NotFound {
                debug!("failed to remove {}: {err}", staging.display());
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_urls() {
        let peer: Url = "http://peer.example:8080".parse().unwrap();
        assert_eq!(
            DeltaClient::delta_url(&peer, "abc123catalog").unwrap().as_str(),
            "http://peer.example:8080/abc123catalog"
        );
        let peer: Url = "http://peer.example/delta".parse().unwrap();
        assert_eq!(
            DeltaClient::delta_url(&peer, "abc123catalog").unwrap().as_str(),
            "http://peer.example/delta/abc123catalog"
        );
        let peer: Url = "http://peer.example/delta/".parse().unwrap();
        assert_eq!(
            DeltaClient::delta_url(&peer, "abc123catalog").unwrap().as_str(),
            "http://peer.example/delta/abc123catalog"
        );
        assert!(matches!(
            DeltaClient::delta_url(&peer, "../x"),
            Err(Error::InvalidCatalog { .. })
        ));
    }
}
