//! Source fetching: download, verify, cache and extract.
//!
//! Every archive is verified against the recipe's SHA-256 before it is
//! written anywhere a later phase can see it. The primary URL is tried
//! first; a network or HTTP failure falls back to the mirror exactly once.
//! A checksum mismatch is never retried.

mod archive;

use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::package::SourceLocation;
use crate::util::hash::{hash_bytes, hash_file, normalize_checksum};

pub use archive::{Compression, extract_archive};

/// Errors raised while fetching or unpacking a source.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("download of {url} failed: {message}")]
  Download { url: String, message: String },

  #[error("integrity check failed for {url}: expected sha256 {expected}, got {actual}")]
  Integrity { url: String, expected: String, actual: String },

  #[error("failed to extract {}: {message}", archive.display())]
  Extract { archive: PathBuf, message: String },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// Transport seam for downloads.
///
/// Implementations return the full body of `url`, or a message describing
/// why the transfer failed.
pub trait Downloader {
  fn download(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, String>>;
}

impl<T: Downloader> Downloader for &T {
  fn download(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, String>> {
    (**self).download(url)
  }
}

/// Downloader backed by `reqwest`, with `file://` URLs read from disk.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
  client: reqwest::Client,
}

impl HttpDownloader {
  pub fn new() -> Self {
    let client = reqwest::Client::builder()
      .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
      .build()
      .unwrap_or_default();
    Self { client }
  }
}

impl Downloader for HttpDownloader {
  async fn download(&self, url: &str) -> Result<Vec<u8>, String> {
    if let Some(path) = url.strip_prefix("file://") {
      return fs::read(path).await.map_err(|e| format!("{}: {}", path, e));
    }

    let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
      return Err(format!("HTTP {}", response.status()));
    }

    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    Ok(bytes.to_vec())
  }
}

/// A verified archive on disk.
#[derive(Debug, Clone)]
pub struct FetchedArchive {
  pub path: PathBuf,
  /// URL the bytes came from, or `None` for a cache hit.
  pub url: Option<String>,
  pub sha256: String,
}

/// Downloads sources and keeps verified copies.
#[derive(Debug)]
pub struct Fetcher<D> {
  downloader: D,
  cache_dir: Option<PathBuf>,
}

impl<D: Downloader> Fetcher<D> {
  pub fn new(downloader: D, cache_dir: Option<PathBuf>) -> Self {
    Self { downloader, cache_dir }
  }

  /// Fetch and verify `source`.
  ///
  /// The archive is stored in the download cache when one is configured,
  /// otherwise under `work_dir/downloads`.
  pub async fn fetch(&self, source: &SourceLocation, work_dir: &Path) -> Result<FetchedArchive, FetchError> {
    let expected = normalize_checksum(&source.sha256);
    let dir = match &self.cache_dir {
      Some(dir) => dir.clone(),
      None => work_dir.join("downloads"),
    };
    fs::create_dir_all(&dir).await?;

    let dest = dir.join(cache_name(&expected, &source.url));

    if fs::try_exists(&dest).await? {
      debug!(path = %dest.display(), "checking cached archive");
      let actual = hash_file(&dest).await?;
      if actual == expected {
        info!(path = %dest.display(), "using cached archive");
        return Ok(FetchedArchive {
          path: dest,
          url: None,
          sha256: actual,
        });
      }
      warn!(path = %dest.display(), expected = %expected, actual = %actual, "cached archive is corrupt, re-downloading");
      fs::remove_file(&dest).await?;
    }

    let (url, bytes) = self.download_with_fallback(source).await?;

    let actual = hash_bytes(&bytes);
    if actual != expected {
      return Err(FetchError::Integrity {
        url,
        expected,
        actual,
      });
    }

    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    drop(file);
    fs::rename(&partial, &dest).await?;

    info!(path = %dest.display(), size = bytes.len(), "download verified");
    Ok(FetchedArchive {
      path: dest,
      url: Some(url),
      sha256: actual,
    })
  }

  async fn download_with_fallback(&self, source: &SourceLocation) -> Result<(String, Vec<u8>), FetchError> {
    let mut failures = Vec::new();

    for url in source.urls() {
      info!(url = %url, "fetching source");
      match self.downloader.download(url).await {
        Ok(bytes) => return Ok((url.to_string(), bytes)),
        Err(message) => {
          warn!(url = %url, error = %message, "download failed");
          failures.push(format!("{}: {}", url, message));
        }
      }
    }

    Err(FetchError::Download {
      url: source.url.clone(),
      message: failures.join("; "),
    })
  }
}

/// Cache file name for a checksum and URL.
///
/// Prefixing with the checksum keeps two archives with the same file name
/// from colliding in the shared cache.
fn cache_name(sha256: &str, url: &str) -> String {
  let prefix: String = sha256.chars().take(16).collect();
  format!("{}-{}", prefix, url_to_filename(url))
}

/// Convert a URL to a safe filename.
///
/// Uses the last path component with the query string removed, falling back
/// to a hash of the URL when nothing usable remains.
pub fn url_to_filename(url: &str) -> String {
  let without_query = url.split(['?', '#']).next().unwrap_or(url);
  // Redirect scripts carry the real name in the query: closer.cgi?path=a/b.tar.gz
  let last = match url.split_once("?path=") {
    Some((_, path)) => path.rsplit('/').next().unwrap_or(path),
    None => without_query.rsplit('/').next().unwrap_or(without_query),
  };

  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();

  if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
    return sanitized;
  }

  format!("download_{}", &hash_bytes(url.as_bytes())[..16])
}
