//! The catalog oracle: the single owner of catalog membership.
//!
//! All catalog state lives inside one actor task. Readers and writers talk to it through a
//! [`CatalogOracle`] handle which sends messages over a bounded channel; every message carries a
//! single-use reply channel and is answered exactly once. Messages are processed strictly in
//! arrival order, so a delta request never observes a catalog halfway through an update.

use std::{collections::HashMap, io, path::PathBuf, sync::Arc};

use snafu::{Snafu, ensure};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info_span, trace, warn};

use crate::store::PartStore;

const TO_ACTOR_CAP: usize = 256;

/// The canonical, ordered membership of one catalog.
pub type Members = Arc<[String]>;

/// Errors returned by the [`CatalogOracle`].
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("catalog oracle has stopped"))]
    Closed,
    #[snafu(display("invalid catalog name {name:?}"))]
    InvalidName { name: String },
    #[snafu(display("oracle has no storage layout to scan"))]
    NoStore,
    #[snafu(display("failed to read catalog directory {}", path.display()))]
    ReadDir { path: PathBuf, source: io::Error },
}

/// Whether `name` can be used as a catalog name.
///
/// Catalog names double as file names inside the catalog directory, so anything that could
/// escape that directory is rejected.
pub fn is_valid_catalog_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
}

/// Parse the contents of a catalog descriptor: one part identifier per line.
pub fn parse_descriptor(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Handle to the catalog oracle actor.
///
/// Cheap to clone. The actor stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct CatalogOracle {
    to_actor_tx: mpsc::Sender<ToActor>,
}

impl CatalogOracle {
    /// Spawn an oracle without any catalogs and without a storage layout.
    pub fn new() -> Self {
        Self::spawn(HashMap::new(), None)
    }

    /// Spawn an oracle knowing the given catalogs.
    pub fn with_catalogs<I, N, M>(catalogs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (N, M)>,
        N: Into<String>,
        M: IntoIterator<Item = String>,
    {
        let mut registry = HashMap::new();
        for (name, members) in catalogs {
            let name = name.into();
            ensure!(is_valid_catalog_name(&name), InvalidNameSnafu { name });
            registry.insert(name, members.into_iter().collect::<Members>());
        }
        Ok(Self::spawn(registry, None))
    }

    /// Spawn an oracle backed by a storage layout and load every catalog descriptor in it.
    pub async fn from_store(store: Arc<dyn PartStore>) -> Result<Self, Error> {
        let oracle = Self::spawn(HashMap::new(), Some(store));
        let count = oracle.rescan().await?;
        debug!(count, "catalog oracle loaded");
        Ok(oracle)
    }

    fn spawn(catalogs: HashMap<String, Members>, store: Option<Arc<dyn PartStore>>) -> Self {
        let (to_actor_tx, to_actor_rx) = mpsc::channel(TO_ACTOR_CAP);
        let actor = Actor {
            catalogs,
            store,
            to_actor_rx,
        };
        tokio::spawn(actor.run().instrument(info_span!("catalog-oracle")));
        Self { to_actor_tx }
    }

    /// Look up the membership of a catalog.
    ///
    /// Returns `None` if the catalog is unknown.
    pub async fn query(&self, catalog: &str) -> Result<Option<Members>, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(ToActor::Query {
            catalog: catalog.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClosedSnafu.build())
    }

    /// Insert or replace a catalog.
    pub async fn register(
        &self,
        catalog: impl Into<String>,
        members: impl IntoIterator<Item = String>,
    ) -> Result<(), Error> {
        let catalog = catalog.into();
        ensure!(
            is_valid_catalog_name(&catalog),
            InvalidNameSnafu { name: catalog }
        );
        let (reply, rx) = oneshot::channel();
        self.send(ToActor::Register {
            catalog,
            members: members.into_iter().collect(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClosedSnafu.build())
    }

    /// Remove a catalog. Returns whether it was known.
    pub async fn forget(&self, catalog: &str) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(ToActor::Forget {
            catalog: catalog.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClosedSnafu.build())
    }

    /// Names of all known catalogs, sorted.
    pub async fn catalogs(&self) -> Result<Vec<String>, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(ToActor::List { reply }).await?;
        rx.await.map_err(|_| ClosedSnafu.build())
    }

    /// Replace the registry with the descriptors currently found in the storage layout.
    ///
    /// Returns the number of catalogs loaded.
    pub async fn rescan(&self) -> Result<usize, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(ToActor::Rescan { reply }).await?;
        rx.await.map_err(|_| ClosedSnafu.build())?
    }

    async fn send(&self, msg: ToActor) -> Result<(), Error> {
        self.to_actor_tx
            .send(msg)
            .await
            .map_err(|_| ClosedSnafu.build())
    }
}

impl Default for CatalogOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum ToActor {
    Query {
        catalog: String,
        reply: oneshot::Sender<Option<Members>>,
    },
    Register {
        catalog: String,
        members: Members,
        reply: oneshot::Sender<()>,
    },
    Forget {
        catalog: String,
        reply: oneshot::Sender<bool>,
    },
    List {
        reply: oneshot::Sender<Vec<String>>,
    },
    Rescan {
        reply: oneshot::Sender<Result<usize, Error>>,
    },
}

struct Actor {
    catalogs: HashMap<String, Members>,
    store: Option<Arc<dyn PartStore>>,
    to_actor_rx: mpsc::Receiver<ToActor>,
}

impl Actor {
    async fn run(mut self) {
        while let Some(msg) = self.to_actor_rx.recv().await {
            self.handle(msg).await;
        }
        debug!("all oracle handles dropped, stopping");
    }

    async fn handle(&mut self, msg: ToActor) {
        // A dropped receiver means the requester went away; nothing to do about it.
        match msg {
            ToActor::Query { catalog, reply } => {
                let members = self.catalogs.get(&catalog).cloned();
                trace!(%catalog, found = members.is_some(), "query");
                reply.send(members).ok();
            }
            ToActor::Register {
                catalog,
                members,
                reply,
            } => {
                trace!(%catalog, members = members.len(), "register");
                self.catalogs.insert(catalog, members);
                reply.send(()).ok();
            }
            ToActor::Forget { catalog, reply } => {
                let known = self.catalogs.remove(&catalog).is_some();
                trace!(%catalog, known, "forget");
                reply.send(known).ok();
            }
            ToActor::List { reply } => {
                let mut names: Vec<_> = self.catalogs.keys().cloned().collect();
                names.sort();
                reply.send(names).ok();
            }
            ToActor::Rescan { reply } => {
                let res = self.rescan().await;
                reply.send(res).ok();
            }
        }
    }

    async fn rescan(&mut self) -> Result<usize, Error> {
        let store = self.store.as_ref().ok_or_else(|| NoStoreSnafu.build())?;
        let catalogs = load_catalogs(store.as_ref()).await?;
        let count = catalogs.len();
        self.catalogs = catalogs;
        Ok(count)
    }
}

/// Read every descriptor in the catalog directory of `store`.
///
/// A missing catalog directory yields no catalogs. Descriptors that cannot be read are skipped.
async fn load_catalogs(store: &dyn PartStore) -> Result<HashMap<String, Members>, Error> {
    let dir = store.catalog_dir();
    let mut catalogs = HashMap::new();
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "no catalog directory");
            return Ok(catalogs);
        }
        Err(source) => return Err(Error::ReadDir { path: dir, source }),
    };
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => return Err(Error::ReadDir { path: dir, source }),
        };
        let Some(name) = entry.file_name().to_str().map(ToString::to_string) else {
            continue;
        };
        if !is_valid_catalog_name(&name) {
            continue;
        }
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => {}
            _ => continue,
        }
        match tokio::fs::read_to_string(entry.path()).await {
            Ok(text) => {
                let members: Members = parse_descriptor(&text).into();
                trace!(catalog = %name, members = members.len(), "loaded descriptor");
                catalogs.insert(name, members);
            }
            Err(err) => warn!(catalog = %name, "skipping unreadable descriptor: {err}"),
        }
    }
    Ok(catalogs)
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;
    use tracing_test::traced_test;

    use super::*;
    use crate::store::FsStore;

    fn members(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    #[traced_test]
    async fn query_known_and_unknown() -> TestResult {
        let oracle = CatalogOracle::with_catalogs([(
            "abc123catalog",
            members(&["partAAAAAAA1", "partBBBBBBB2"]),
        )])?;
        let found = oracle.query("abc123catalog").await?.expect("known catalog");
        assert_eq!(&found[..], &members(&["partAAAAAAA1", "partBBBBBBB2"])[..]);
        assert!(oracle.query("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn register_replace_and_forget() -> TestResult {
        let oracle = CatalogOracle::new();
        oracle.register("one", members(&["aaaaaaaaaaaa"])).await?;
        oracle.register("two", members(&[])).await?;
        oracle.register("one", members(&["bbbbbbbbbbbb"])).await?;
        assert_eq!(oracle.catalogs().await?, vec!["one", "two"]);
        let one = oracle.query("one").await?.expect("known");
        assert_eq!(&one[..], &members(&["bbbbbbbbbbbb"])[..]);

        assert!(oracle.forget("one").await?);
        assert!(!oracle.forget("one").await?);
        assert!(oracle.query("one").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_invalid_names() {
        let oracle = CatalogOracle::new();
        for name in ["", ".", "..", "a/b", "a\\b"] {
            let res = oracle.register(name, members(&[])).await;
            assert!(
                matches!(res, Err(Error::InvalidName { .. })),
                "{name:?} accepted"
            );
        }
        assert!(CatalogOracle::with_catalogs([("../x", members(&[]))]).is_err());
    }

    #[tokio::test]
    async fn rescan_without_store_fails() {
        let oracle = CatalogOracle::new();
        assert!(matches!(oracle.rescan().await, Err(Error::NoStore)));
    }

    #[tokio::test]
    #[traced_test]
    async fn loads_descriptors_from_store() -> TestResult {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(FsStore::new(dir.path()));
        // no catalog dir yet
        let oracle = CatalogOracle::from_store(store.clone()).await?;
        assert!(oracle.catalogs().await?.is_empty());

        std::fs::create_dir_all(store.catalog_dir())?;
        std::fs::write(
            store.catalog_location("first"),
            "partAAAAAAA1\n  partBBBBBBB2  \n\n",
        )?;
        std::fs::write(store.catalog_location("second"), "")?;
        std::fs::create_dir(store.catalog_dir().join("not-a-catalog"))?;

        assert_eq!(oracle.rescan().await?, 2);
        assert_eq!(oracle.catalogs().await?, vec!["first", "second"]);
        let first = oracle.query("first").await?.expect("loaded");
        assert_eq!(&first[..], &members(&["partAAAAAAA1", "partBBBBBBB2"])[..]);

        // rescanning replaces the registry, it does not merge
        oracle.register("extra", members(&[])).await?;
        std::fs::remove_file(store.catalog_location("second"))?;
        assert_eq!(oracle.rescan().await?, 1);
        assert_eq!(oracle.catalogs().await?, vec!["first"]);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_queries_each_get_one_reply() -> TestResult {
        let oracle = CatalogOracle::with_catalogs([("cat", members(&["partAAAAAAA1"]))])?;
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..64 {
            let oracle = oracle.clone();
            tasks.spawn(async move {
                let name = if i % 2 == 0 { "cat" } else { "nope" };
                (i, oracle.query(name).await)
            });
        }
        while let Some(res) = tasks.join_next().await {
            let (i, reply) = res?;
            assert_eq!(reply?.is_some(), i % 2 == 0);
        }
        Ok(())
    }

    #[test]
    fn descriptor_parsing() {
        assert_eq!(
            parse_descriptor("a\r\n b \n\n c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_descriptor("").is_empty());
    }
}
