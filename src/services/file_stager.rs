use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Source file not found: {0}")]
    NotFound(String),

    #[error("Unsupported source location: {0}")]
    UnsupportedSource(String),

    #[error("I/O error staging {source_path}: {error}")]
    Io {
        source_path: String,
        #[source]
        error: std::io::Error,
    },
}

impl StagingError {
    /// Missing or unsupported sources will not appear by retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            StagingError::NotFound(_) | StagingError::UnsupportedSource(_)
        )
    }
}

/// Copies job resource files (setup scripts, configs, dependencies) to the
/// local job directory.
#[async_trait]
pub trait FileStager: Send + Sync {
    /// Fetch `source` into the directory `destination_dir`, keeping its file
    /// name, and return the local path.
    async fn fetch(&self, source: &str, destination_dir: &Path) -> Result<PathBuf, StagingError>;
}

/// Stages files reachable on the local filesystem, given as absolute paths or
/// `file://` URIs.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStager;

impl LocalFileStager {
    pub fn new() -> Self {
        Self
    }

    fn local_path(source: &str) -> Result<PathBuf, StagingError> {
        let path = source.strip_prefix("file://").unwrap_or(source);
        if source.contains("://") && !source.starts_with("file://") {
            return Err(StagingError::UnsupportedSource(source.to_string()));
        }
        let path = PathBuf::from(path);
        if !path.is_absolute() {
            return Err(StagingError::UnsupportedSource(source.to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl FileStager for LocalFileStager {
    async fn fetch(&self, source: &str, destination_dir: &Path) -> Result<PathBuf, StagingError> {
        let source_path = Self::local_path(source)?;
        let file_name = source_path
            .file_name()
            .ok_or_else(|| StagingError::UnsupportedSource(source.to_string()))?;

        let io_error = |error: std::io::Error| StagingError::Io {
            source_path: source.to_string(),
            error,
        };

        if !tokio::fs::try_exists(&source_path).await.map_err(io_error)? {
            return Err(StagingError::NotFound(source.to_string()));
        }

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(io_error)?;
        let destination = destination_dir.join(file_name);
        tokio::fs::copy(&source_path, &destination)
            .await
            .map_err(io_error)?;

        tracing::debug!(source, destination = %destination.display(), "Staged file");
        Ok(destination)
    }
}
