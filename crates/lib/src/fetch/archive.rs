//! Archive extraction.
//!
//! The compression format is detected from the archive's leading bytes, not
//! its file name: mirror URLs routinely end in script names or query strings.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio_tar::ArchiveBuilder;
use tracing::{debug, info};

use super::FetchError;

/// Compression wrapped around a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
  Gzip,
  Bzip2,
  Xz,
  None,
}

impl Compression {
  /// Detect compression from the first bytes of a file.
  pub fn sniff(header: &[u8]) -> Self {
    match header {
      [0x1f, 0x8b, ..] => Compression::Gzip,
      [b'B', b'Z', b'h', ..] => Compression::Bzip2,
      [0xfd, b'7', b'z', b'X', b'Z', 0x00, ..] => Compression::Xz,
      _ => Compression::None,
    }
  }
}

/// Extract `archive` into `dest` and return the source root.
///
/// When the archive holds a single top-level directory, that directory is
/// the source root; otherwise `dest` itself is.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf, FetchError> {
  fs::create_dir_all(dest).await?;

  let mut header = [0u8; 6];
  let read = File::open(archive).await?.read(&mut header).await?;
  let compression = Compression::sniff(&header[..read]);
  info!(archive = %archive.display(), dest = %dest.display(), ?compression, "extracting archive");

  let reader = BufReader::new(File::open(archive).await?);
  let stream: Pin<Box<dyn AsyncRead + Send>> = match compression {
    Compression::Gzip => Box::pin(GzipDecoder::new(reader)),
    Compression::Bzip2 => Box::pin(BzDecoder::new(reader)),
    Compression::Xz => Box::pin(XzDecoder::new(reader)),
    Compression::None => Box::pin(reader),
  };

  let mut tar = ArchiveBuilder::new(stream).set_preserve_permissions(true).build();
  tar.unpack(dest).await.map_err(|e| FetchError::Extract {
    archive: archive.to_path_buf(),
    message: e.to_string(),
  })?;

  source_root(dest).await
}

async fn source_root(dest: &Path) -> Result<PathBuf, FetchError> {
  let mut entries = fs::read_dir(dest).await?;
  let mut found = Vec::new();

  while let Some(entry) = entries.next_entry().await? {
    found.push(entry);
    if found.len() > 1 {
      return Ok(dest.to_path_buf());
    }
  }

  match found.pop() {
    Some(entry) if entry.file_type().await?.is_dir() => {
      debug!(root = %entry.path().display(), "using single top-level directory as source root");
      Ok(entry.path())
    }
    _ => Ok(dest.to_path_buf()),
  }
}
