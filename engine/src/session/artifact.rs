//! Dataset artifacts
//!
//! An [`Artifact`] is the dataset a session is bound to, held in memory
//! until it is uploaded. It can come from a path on disk (a user-chosen or
//! bundled file) or from bytes already in memory.

use sdk::errors::EngineError;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ArtifactConfig;

/// Upload limits applied before any remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLimits {
    pub max_bytes: u64,
    /// Lowercase extensions without the dot; empty accepts anything
    pub allowed_extensions: Vec<String>,
}

impl ArtifactLimits {
    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }
}

impl Default for ArtifactLimits {
    fn default() -> Self {
        Self::from_config(&ArtifactConfig::default())
    }
}

/// A dataset ready to upload
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    file_name: String,
    data: Vec<u8>,
    origin: Option<PathBuf>,
}

impl Artifact {
    /// Wrap in-memory bytes, e.g. an upload received from another process
    pub fn from_bytes(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
            origin: None,
        }
    }

    /// Read a dataset from disk
    ///
    /// The size limit is checked against file metadata first so oversized
    /// files are never read into memory.
    pub async fn from_path(path: &Path, limits: &ArtifactLimits) -> Result<Self, EngineError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(EngineError::UnsupportedArtifact(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if metadata.len() > limits.max_bytes {
            return Err(EngineError::ArtifactTooLarge {
                size: metadata.len(),
                limit: limits.max_bytes,
            });
        }

        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::UnsupportedArtifact(format!("{} has no file name", path.display()))
            })?;

        Ok(Self {
            file_name,
            data,
            origin: Some(path.to_path_buf()),
        })
    }

    /// Check the artifact against upload limits
    pub fn validate(&self, limits: &ArtifactLimits) -> Result<(), EngineError> {
        if self.data.iter().all(u8::is_ascii_whitespace) {
            return Err(EngineError::EmptyArtifact(self.file_name.clone()));
        }

        let size = self.data.len() as u64;
        if size > limits.max_bytes {
            return Err(EngineError::ArtifactTooLarge {
                size,
                limit: limits.max_bytes,
            });
        }

        if !limits.allowed_extensions.is_empty() {
            let ext = self.extension().unwrap_or_default();
            if !limits.allowed_extensions.iter().any(|allowed| *allowed == ext) {
                return Err(EngineError::UnsupportedArtifact(format!(
                    "'{}' (allowed: {})",
                    self.file_name,
                    limits.allowed_extensions.join(", ")
                )));
            }
        }

        Ok(())
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Path the artifact was read from, if any
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }

    pub(crate) fn into_parts(self) -> (String, Vec<u8>) {
        (self.file_name, self.data)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("file_name", &self.file_name)
            .field("len", &self.data.len())
            .field("origin", &self.origin)
            .finish()
    }
}
