//! Run configuration: endpoint resolution and tunable settings.
//!
//! [`SourceRoot`] and [`Destination`] are decided once from the shape of the
//! given path. [`open_source`] and [`open_sink`] turn them into the trait
//! objects the pipeline runs on.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::contract::{ContentSource, Sink};
use crate::error::{DiscoveryError, SinkError};
use crate::render::{PdfRenderer, RenderOptions};
use crate::sink::{ArchiveSink, DirectorySink};
use crate::source::{ArchiveSource, DirectorySource};

/// File suffix that marks a path as an archive rather than a directory.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Default text placed between consecutive lines of a record before rendering.
pub const DEFAULT_SEPARATOR: &str = ", ";

fn has_archive_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// Where the input members come from. Resolved once from the path's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRoot {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl SourceRoot {
    /// An existing directory, or an existing file with the archive extension.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(SourceRoot::Directory(path.to_path_buf()));
        }
        if has_archive_extension(path) {
            if path.is_file() {
                return Ok(SourceRoot::Archive(path.to_path_buf()));
            }
            return Err(DiscoveryError::root_unavailable(
                path,
                "archive does not exist",
            ));
        }
        Err(DiscoveryError::root_unavailable(
            path,
            "neither a directory nor a .zip archive",
        ))
    }

    pub fn path(&self) -> &Path {
        match self {
            SourceRoot::Directory(p) | SourceRoot::Archive(p) => p,
        }
    }
}

/// Where rendered documents go. Resolved once from the path's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl Destination {
    /// An existing directory, or an archive path whose parent directory exists.
    /// The archive itself is created if missing.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(Destination::Directory(path.to_path_buf()));
        }
        if has_archive_extension(path) {
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            if parent.is_dir() {
                return Ok(Destination::Archive(path.to_path_buf()));
            }
            return Err(DiscoveryError::root_unavailable(
                path,
                "parent directory of archive does not exist",
            ));
        }
        Err(DiscoveryError::root_unavailable(
            path,
            "neither an existing directory nor a .zip archive path",
        ))
    }

    pub fn path(&self) -> &Path {
        match self {
            Destination::Directory(p) | Destination::Archive(p) => p,
        }
    }
}

/// Tunables of a run. Every field has a default, so an empty settings file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Regex over member file names; unmatched names are ignored.
    pub member_filter: Option<String>,
    /// Cap on concurrently running producers. Unset means one task per group.
    pub max_parallel: Option<usize>,
    pub separator: String,
    pub render: RenderOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            member_filter: None,
            max_parallel: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            render: RenderOptions::default(),
        }
    }
}

impl Settings {
    pub fn trace_loaded(&self) {
        info!(
            member_filter = ?self.member_filter,
            max_parallel = ?self.max_parallel,
            separator = %self.separator,
            "Loaded Settings"
        );
        debug!(?self, "Settings loaded (full debug)");
    }
}

/// Build the content source matching `root`.
pub fn open_source(root: &SourceRoot) -> Result<Arc<dyn ContentSource>, DiscoveryError> {
    let source: Arc<dyn ContentSource> = match root {
        SourceRoot::Directory(dir) => Arc::new(DirectorySource::new(dir)?),
        SourceRoot::Archive(path) => Arc::new(ArchiveSource::new(path)?),
    };
    Ok(source)
}

/// Build the sink matching `destination`, rendering with `settings.render`.
pub fn open_sink(destination: &Destination, settings: &Settings) -> Result<Box<dyn Sink>, SinkError> {
    let renderer = Box::new(PdfRenderer::new(settings.render.clone()));
    let sink: Box<dyn Sink> = match destination {
        Destination::Directory(dir) => Box::new(DirectorySink::new(
            dir,
            renderer,
            settings.separator.clone(),
        )),
        Destination::Archive(path) => Box::new(ArchiveSink::create(
            path,
            renderer,
            settings.separator.clone(),
        )?),
    };
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn existing_directory_resolves_as_directory_even_with_zip_suffix() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("looks_like.zip");
        std::fs::create_dir(&dir).unwrap();
        assert_eq!(
            SourceRoot::resolve(&dir).unwrap(),
            SourceRoot::Directory(dir.clone())
        );
        assert_eq!(
            Destination::resolve(&dir).unwrap(),
            Destination::Directory(dir)
        );
    }

    #[test]
    fn archive_suffix_is_case_insensitive() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("OUT.ZIP");
        assert_eq!(
            Destination::resolve(&path).unwrap(),
            Destination::Archive(path)
        );
    }

    #[test]
    fn missing_source_archive_is_unavailable() {
        let tmp = tempdir().unwrap();
        assert!(SourceRoot::resolve(tmp.path().join("missing.zip")).is_err());
    }

    #[test]
    fn destination_archive_needs_existing_parent() {
        let tmp = tempdir().unwrap();
        assert!(Destination::resolve(tmp.path().join("nope/out.zip")).is_err());
    }

    #[test]
    fn plain_missing_path_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("not-there");
        assert!(SourceRoot::resolve(&path).is_err());
        assert!(Destination::resolve(&path).is_err());
    }

    #[test]
    fn relative_archive_without_parent_resolves() {
        assert!(matches!(
            Destination::resolve("relative-output.zip"),
            Ok(Destination::Archive(_))
        ));
    }

    #[test]
    fn settings_defaults_fill_missing_fields() {
        let settings: Settings = serde_json::from_str(r#"{"max_parallel": 4}"#).unwrap();
        assert_eq!(settings.max_parallel, Some(4));
        assert_eq!(settings.separator, DEFAULT_SEPARATOR);
        assert_eq!(settings.render, RenderOptions::default());
    }
}
