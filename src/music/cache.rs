//! Content-addressed on-disk cache for downloaded tracks.
//!
//! Entries are named by the SHA-256 of the URL plus the URL's file
//! extension, so the decoder can still probe by extension. Writes go to a
//! temporary file first and are renamed into place, so a crashed download
//! never leaves a truncated entry behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::ResolutionError;

/// Downloads remote tracks.
///
/// The engine performs no networking itself; the collaborator supplies the
/// HTTP client through this hook.
///
/// # Example
///
/// ```ignore
/// struct HttpFetcher(reqwest::Client);
///
/// #[async_trait::async_trait]
/// impl RemoteFetcher for HttpFetcher {
///     async fn fetch(&self, url: &str) -> Result<Vec<u8>, ResolutionError> {
///         let resp = self.0.get(url).send().await
///             .map_err(|e| ResolutionError::download(url, e.to_string()))?;
///         Ok(resp.bytes().await
///             .map_err(|e| ResolutionError::download(url, e.to_string()))?
///             .to_vec())
///     }
/// }
/// ```
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Returns the full body at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ResolutionError>;
}

/// Directory of cached downloads.
#[derive(Debug, Clone)]
pub struct TrackCache {
    dir: PathBuf,
}

impl TrackCache {
    /// Creates a cache rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A cache under the system temporary directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("duplex-audio-cache"))
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `url` is (or would be) cached.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let mut name = cache_key(url);
        if let Some(ext) = url_extension(url) {
            name.push('.');
            name.push_str(&ext);
        }
        self.dir.join(name)
    }

    /// Returns the cached file for `url`, if present.
    pub async fn lookup(&self, url: &str) -> Option<PathBuf> {
        let path = self.path_for(url);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// Writes `bytes` as the entry for `url` and returns its path.
    pub async fn store(&self, url: &str, bytes: &[u8]) -> Result<PathBuf, ResolutionError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ResolutionError::io(&self.dir, e))?;

        let target = self.path_for(url);
        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| ResolutionError::io(&partial, e))?;
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(ResolutionError::io(&target, e));
        }

        Ok(target)
    }
}

/// Hex SHA-256 of the URL.
pub fn cache_key(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Lower-cased file extension of the URL path, ignoring query and fragment.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    let valid = !stem.is_empty()
        && !ext.is_empty()
        && ext.len() <= 5
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
