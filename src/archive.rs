//! Zip archives carrying catalog parts between peers.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use async_zip::{Compression, ZipEntryBuilder, error::ZipError, tokio::write::ZipFileWriter};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tracing::debug;

use crate::store::{PartStore, entry_name};

fn zip_err(err: ZipError) -> io::Error {
    io::Error::other(err)
}

/// A zip archive written front to back onto any async writer.
///
/// Entries use data descriptors, so nothing needs to be seekable and the archive can go straight
/// onto a socket.
pub struct ArchiveWriter<W: AsyncWrite + Unpin> {
    zip: ZipFileWriter<W>,
}

impl<W: AsyncWrite + Unpin> ArchiveWriter<W> {
    /// Start an archive on `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            zip: ZipFileWriter::with_tokio(writer),
        }
    }

    /// Stream the file at `path` into the archive as entry `name`.
    ///
    /// The file is opened for the duration of this call only. Returns the number of bytes read
    /// from the file.
    pub async fn append_file(&mut self, path: &Path, name: String) -> io::Result<u64> {
        let file = tokio::fs::File::open(path).await?;
        let builder = ZipEntryBuilder::new(name.into(), Compression::Deflate);
        let mut entry = self.zip.write_entry_stream(builder).await.map_err(zip_err)?;
        let copied = futures_lite::io::copy(file.compat(), &mut entry).await?;
        entry.close().await.map_err(zip_err)?;
        Ok(copied)
    }

    /// Write the central directory and return the underlying writer.
    pub async fn finish(self) -> io::Result<W> {
        let inner = self.zip.close().await.map_err(zip_err)?;
        Ok(inner.into_inner())
    }
}

/// Write the delta archive for `catalog`: every approved part, then the catalog descriptor.
///
/// The writer is shut down after the central directory is written. On error the partially
/// written archive is abandoned and the writer dropped.
pub async fn write_delta<W: AsyncWrite + Unpin>(
    writer: W,
    store: &dyn PartStore,
    approved: &[String],
    catalog: &str,
) -> io::Result<()> {
    let mut archive = ArchiveWriter::new(writer);
    for part in approved {
        let relative = store.relative_location(part);
        let fullpath = store.exact_location(part);
        if let Err(err) = archive.append_file(&fullpath, entry_name(&relative)).await {
            debug!(
                "DELTA: error {err} with {} -> {}",
                fullpath.display(),
                relative.display()
            );
            return Err(err);
        }
    }
    let fullpath = store.catalog_location(catalog);
    let relative = store.catalog_relative(catalog);
    if let Err(err) = archive.append_file(&fullpath, entry_name(&relative)).await {
        debug!("DELTA: error {err} with descriptor {}", fullpath.display());
        return Err(err);
    }
    let mut inner = archive.finish().await?;
    inner.shutdown().await?;
    Ok(())
}

/// Names of all entries in the archive at `path`, in archive order.
pub async fn list_entries(path: &Path) -> Result<Vec<String>> {
    let reader = async_zip::tokio::read::fs::ZipFileReader::new(path)
        .await
        .with_context(|| format!("failed to open archive {}", path.display()))?;
    reader
        .file()
        .entries()
        .iter()
        .map(|entry| -> Result<String> { Ok(entry.filename().as_str()?.to_string()) })
        .collect()
}

/// Unpack every entry of the archive at `path` below `root`.
///
/// Entry names must be relative and must not leave `root`. Returns the unpacked entry names in
/// archive order.
pub async fn unpack(path: &Path, root: &Path) -> Result<Vec<String>> {
    let reader = async_zip::tokio::read::fs::ZipFileReader::new(path)
        .await
        .with_context(|| format!("failed to open archive {}", path.display()))?;
    let mut names = Vec::new();
    for index in 0..reader.file().entries().len() {
        let name = reader.file().entries()[index]
            .filename()
            .as_str()?
            .to_string();
        let relative = contained(&name)?;
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let entry = reader.reader_with_entry(index).await?.compat();
        tokio::pin!(entry);
        let mut out = tokio::fs::File::create(&target)
            .await
            .with_context(|| format!("failed to create {}", target.display()))?;
        tokio::io::copy(&mut entry, &mut out)
            .await
            .with_context(|| format!("failed to unpack {name}"))?;
        out.flush().await?;
        names.push(name);
    }
    Ok(names)
}

/// Validate an entry name as a path that stays below the directory it is unpacked into.
fn contained(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => bail!("refusing to unpack entry {name:?}"),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("refusing to unpack entry {name:?}");
    }
    Ok(out)
}
