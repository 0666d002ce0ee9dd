//! Music source references and their resolution to local files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::cache::{RemoteFetcher, TrackCache};
use crate::error::ResolutionError;

/// Where a track comes from.
///
/// Strings starting with `http://` or `https://` are remote; everything else
/// is a local path, resolved against the asset root when relative.
///
/// # Example
///
/// ```
/// use duplex_audio::music::MusicSource;
///
/// assert!(MusicSource::from("https://cdn.example.com/a.mp3").is_remote());
/// assert!(!MusicSource::from("music/intro.mp3").is_remote());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MusicSource {
    /// A file on disk.
    Local(PathBuf),
    /// An `http(s)` URL, downloaded once into the cache.
    Remote(String),
}

impl MusicSource {
    /// Classifies a source string.
    pub fn parse(source: &str) -> Self {
        let lower = source.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Remote(source.trim().to_string())
        } else {
            Self::Local(PathBuf::from(source))
        }
    }

    /// `true` for `http(s)` sources.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl From<&str> for MusicSource {
    fn from(source: &str) -> Self {
        Self::parse(source)
    }
}

impl From<String> for MusicSource {
    fn from(source: String) -> Self {
        Self::parse(&source)
    }
}

impl From<PathBuf> for MusicSource {
    fn from(path: PathBuf) -> Self {
        Self::Local(path)
    }
}

impl fmt::Display for MusicSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Turns a [`MusicSource`] into a readable local file.
pub(crate) struct SourceResolver {
    asset_root: Option<PathBuf>,
    cache: TrackCache,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
}

impl SourceResolver {
    pub fn new(
        asset_root: Option<PathBuf>,
        cache: TrackCache,
        fetcher: Option<Arc<dyn RemoteFetcher>>,
    ) -> Self {
        Self {
            asset_root,
            cache,
            fetcher,
        }
    }

    /// Resolves a source to a path. Remote sources are downloaded into the
    /// cache on first use; later requests for the same URL hit the cache.
    pub async fn resolve(&self, source: &MusicSource) -> Result<PathBuf, ResolutionError> {
        match source {
            MusicSource::Local(path) => self.resolve_local(path).await,
            MusicSource::Remote(url) => self.resolve_remote(url).await,
        }
    }

    async fn resolve_local(&self, path: &Path) -> Result<PathBuf, ResolutionError> {
        let full = match &self.asset_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        };

        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(full),
            _ => Err(ResolutionError::NotFound { path: full }),
        }
    }

    async fn resolve_remote(&self, url: &str) -> Result<PathBuf, ResolutionError> {
        if let Some(path) = self.cache.lookup(url).await {
            tracing::debug!(url, path = %path.display(), "music cache hit");
            return Ok(path);
        }

        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| ResolutionError::NoFetcher {
                url: url.to_string(),
            })?;

        tracing::info!(url, "downloading music");
        let bytes = fetcher.fetch(url).await?;
        let path = self.cache.store(url, &bytes).await?;
        tracing::debug!(url, bytes = bytes.len(), path = %path.display(), "music cached");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classifies_sources() {
        assert_eq!(
            MusicSource::parse("https://cdn.example.com/a.mp3"),
            MusicSource::Remote("https://cdn.example.com/a.mp3".to_string())
        );
        assert!(MusicSource::parse("HTTP://example.com/a.mp3").is_remote());
        assert_eq!(
            MusicSource::parse("/music/a.mp3"),
            MusicSource::Local(PathBuf::from("/music/a.mp3"))
        );
        assert!(!MusicSource::parse("ftp://example.com/a.mp3").is_remote());
    }

    #[test]
    fn test_display() {
        assert_eq!(MusicSource::parse("a/b.mp3").to_string(), "a/b.mp3");
        assert_eq!(
            MusicSource::parse("https://x.y/z.mp3").to_string(),
            "https://x.y/z.mp3"
        );
    }

    #[tokio::test]
    async fn test_resolve_local_relative_to_asset_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("intro.wav"), b"RIFF").unwrap();

        let resolver = SourceResolver::new(
            Some(dir.path().to_path_buf()),
            TrackCache::new(dir.path().join("cache")),
            None,
        );
        let path = resolver
            .resolve(&MusicSource::parse("intro.wav"))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("intro.wav"));
    }

    #[tokio::test]
    async fn test_resolve_missing_local() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SourceResolver::new(None, TrackCache::new(dir.path().to_path_buf()), None);
        let err = resolver
            .resolve(&MusicSource::Local(dir.path().join("missing.mp3")))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_remote_without_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SourceResolver::new(None, TrackCache::new(dir.path().to_path_buf()), None);
        let err = resolver
            .resolve(&MusicSource::parse("https://example.com/a.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NoFetcher { .. }));
    }
}
