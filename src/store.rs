//! On-disk layout of the part library and catalog descriptors.

use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Directory below the storage root holding the content-addressed parts.
pub const LIBRARY_DIR: &str = "library";
/// Directory below the storage root holding one descriptor file per catalog.
pub const CATALOG_DIR: &str = "catalog";

/// Resolves part identifiers and catalog names to filesystem locations.
///
/// The delta service only ever reads through this trait; materializing parts on disk is the job
/// of whoever owns the library.
pub trait PartStore: fmt::Debug + Send + Sync + 'static {
    /// The storage root all relative locations are anchored at.
    fn root(&self) -> &Path;

    /// Location of a part relative to [`Self::root`], used as its archive entry name.
    fn relative_location(&self, part: &str) -> PathBuf;

    /// Absolute location of a part.
    fn exact_location(&self, part: &str) -> PathBuf {
        self.root().join(self.relative_location(part))
    }

    /// Location of a catalog descriptor relative to [`Self::root`].
    fn catalog_relative(&self, catalog: &str) -> PathBuf {
        Path::new(CATALOG_DIR).join(catalog)
    }

    /// Absolute location of a catalog descriptor.
    fn catalog_location(&self, catalog: &str) -> PathBuf {
        self.root().join(self.catalog_relative(catalog))
    }

    /// Directory containing all catalog descriptors.
    fn catalog_dir(&self) -> PathBuf {
        self.root().join(CATALOG_DIR)
    }
}

/// The default filesystem layout.
///
/// Parts are sharded three levels deep by the first six characters of their identifier:
/// `library/ab/cd/ef/abcdef0123...`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a layout anchored at `root`. Nothing is created on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PartStore for FsStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn relative_location(&self, part: &str) -> PathBuf {
        let mut path = PathBuf::from(LIBRARY_DIR);
        if let (Some(a), Some(b), Some(c)) = (part.get(0..2), part.get(2..4), part.get(4..6)) {
            path.push(a);
            path.push(b);
            path.push(c);
        }
        path.push(part);
        path
    }
}

/// The members of a catalog that are not present in `store`, in catalog order.
pub async fn missing_parts(store: &dyn PartStore, members: &[String]) -> Vec<String> {
    let mut missing = Vec::new();
    for part in members {
        let present = tokio::fs::try_exists(store.exact_location(part))
            .await
            .unwrap_or(false);
        if !present {
            missing.push(part.clone());
        }
    }
    missing
}

/// Render a relative path as a zip entry name, always using `/` separators.
pub(crate) fn entry_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharded_part_locations() {
        let store = FsStore::new("/var/holo");
        assert_eq!(
            store.relative_location("0123456789abcdef"),
            PathBuf::from("library/01/23/45/0123456789abcdef")
        );
        assert_eq!(
            store.exact_location("0123456789abcdef"),
            PathBuf::from("/var/holo/library/01/23/45/0123456789abcdef")
        );
    }

    #[test]
    fn short_identifiers_are_not_sharded() {
        let store = FsStore::new("/var/holo");
        assert_eq!(
            store.relative_location("abc"),
            PathBuf::from("library/abc")
        );
    }

    #[test]
    fn catalog_locations() {
        let store = FsStore::new("/var/holo");
        assert_eq!(
            store.catalog_relative("abc123catalog"),
            PathBuf::from("catalog/abc123catalog")
        );
        assert_eq!(
            store.catalog_location("abc123catalog"),
            PathBuf::from("/var/holo/catalog/abc123catalog")
        );
        assert_eq!(store.catalog_dir(), PathBuf::from("/var/holo/catalog"));
    }

    #[tokio::test]
    async fn missing_parts_checks_the_library() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FsStore::new(dir.path());
        let present = store.exact_location("partAAAAAAA1");
        std::fs::create_dir_all(present.parent().expect("nested"))?;
        std::fs::write(&present, b"a")?;

        let members = vec!["partAAAAAAA1".to_string(), "partBBBBBBB2".to_string()];
        assert_eq!(
            missing_parts(&store, &members).await,
            vec!["partBBBBBBB2".to_string()]
        );
        Ok(())
    }

    #[test]
    fn entry_names_use_forward_slashes() {
        let path = Path::new("library").join("01").join("part");
        assert_eq!(entry_name(&path), "library/01/part");
    }
}
