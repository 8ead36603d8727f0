//! Handler source discovery from the filesystem.
//!
//! Scans the configured handlers directory for `*.toml` and `*.md` files and
//! returns their raw text in file-name order. Parsing happens in the registry.

use std::path::PathBuf;

use {async_trait::async_trait, tracing::debug};

use crate::{
    definition::DefinitionDefaults,
    error::{LoadError, LoadErrorKind},
    source::{HandlerSource, SourceFormat},
};

/// What one discovery pass found.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub sources: Vec<HandlerSource>,
    /// Files that matched but could not be read.
    pub errors: Vec<LoadError>,
    /// Files skipped because of the reserved prefix.
    pub skipped: Vec<String>,
}

#[async_trait]
pub trait HandlerDiscoverer: Send + Sync {
    async fn discover(&self) -> crate::Result<Discovery>;
}

pub struct FsHandlerDiscoverer {
    dir: PathBuf,
    reserved_prefix: String,
}

impl FsHandlerDiscoverer {
    pub fn new(dir: impl Into<PathBuf>, defaults: &DefinitionDefaults) -> Self {
        Self {
            dir: dir.into(),
            reserved_prefix: defaults.reserved_prefix.clone(),
        }
    }

    pub fn from_config(config: &patchbay_config::HandlersConfig) -> Self {
        Self::new(&config.dir, &DefinitionDefaults::from_config(config))
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl HandlerDiscoverer for FsHandlerDiscoverer {
    async fn discover(&self) -> crate::Result<Discovery> {
        let mut discovery = Discovery::default();
        if !self.dir.is_dir() {
            debug!(dir = %self.dir.display(), "handlers directory does not exist");
            return Ok(discovery);
        }

        let mut entries =
            tokio::fs::read_dir(&self.dir)
                .await
                .map_err(|source| crate::Error::HandlersDir {
                    path: self.dir.clone(),
                    source,
                })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(format) = SourceFormat::from_path(&path) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            files.push((file_name.to_string(), path, format));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        for (file_name, path, format) in files {
            if !self.reserved_prefix.is_empty() && file_name.starts_with(&self.reserved_prefix) {
                debug!(file = %file_name, "reserved handler file skipped");
                discovery.skipped.push(file_name);
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => discovery.sources.push(HandlerSource {
                    origin: file_name,
                    dir: Some(self.dir.clone()),
                    format,
                    text,
                }),
                Err(e) => discovery.errors.push(LoadError::new(file_name, LoadErrorKind::Read {
                    reason: e.to_string(),
                })),
            }
        }

        Ok(discovery)
    }
}
