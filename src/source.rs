//! Asset sources: where preset JSON, zone audio and impulse responses come from.

use std::collections::HashMap;
use std::future::Future;

use crate::error::LoadError;

/// Fetch the raw bytes behind a location (URL or path).
pub trait AssetSource {
    fn fetch(&self, location: &str) -> impl Future<Output = Result<Vec<u8>, LoadError>>;
}

/// Bytes registered up front, for hosts that do their own fetching.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    assets: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, bytes: Vec<u8>) -> &mut Self {
        self.assets.insert(location.into(), bytes);
        self
    }

    pub fn with(mut self, location: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(location, bytes);
        self
    }
}

impl AssetSource for MemorySource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, LoadError> {
        self.assets
            .get(location)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(location.to_string()))
    }
}

/// Assets served over HTTP(S), resolved against `base_url`.
#[cfg(feature = "catalog")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "catalog")]
impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpSource {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, location: &str) -> String {
        if location.contains("://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }
}

#[cfg(feature = "catalog")]
impl AssetSource for HttpSource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, LoadError> {
        let url = self.url_for(location);
        let fetch_error = |e: reqwest::Error| LoadError::Fetch {
            location: url.clone(),
            message: e.to_string(),
        };
        let response = self.client.get(&url).send().await.map_err(fetch_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LoadError::NotFound(url));
        }
        let response = response.error_for_status().map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;
        Ok(bytes.to_vec())
    }
}

/// Assets on the local filesystem, relative to `root`.
#[cfg(feature = "catalog")]
#[derive(Debug, Clone)]
pub struct FsSource {
    root: std::path::PathBuf,
}

#[cfg(feature = "catalog")]
impl FsSource {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        FsSource { root: root.into() }
    }
}

#[cfg(feature = "catalog")]
impl AssetSource for FsSource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.root.join(location.trim_start_matches('/'));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(LoadError::Fetch {
                location: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_serves_registered_bytes() {
        let source = MemorySource::new().with("a.wav", vec![1, 2, 3]);
        assert_eq!(source.fetch("a.wav").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(source.fetch("b.wav").await, Err(LoadError::NotFound(loc)) if loc == "b.wav"));
    }

    #[cfg(feature = "catalog")]
    #[test]
    fn http_source_joins_relative_locations() {
        let source = HttpSource::new("https://cdn.example.org/presets/");
        assert_eq!(source.url_for("/marimba/preset.json"), "https://cdn.example.org/presets/marimba/preset.json");
        assert_eq!(source.url_for("https://other.host/x.wav"), "https://other.host/x.wav");
    }

    #[cfg(feature = "catalog")]
    #[tokio::test]
    async fn fs_source_reports_missing_files() {
        let source = FsSource::new(std::env::temp_dir());
        let result = source.fetch("stepseq-core-missing-asset.wav").await;
        assert!(matches!(result, Err(LoadError::NotFound(_))));
    }
}
