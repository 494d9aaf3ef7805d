//! Content sources: assemble a group's lines from a directory or an archive.
//!
//! Both sources order members first and then read them one after another,
//! so a later member's lines never precede an earlier member's. Different
//! groups may be processed concurrently; every call works on its own handles.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::contract::{ContentSource, Record};
use crate::error::{DiscoveryError, SourceError};
use crate::ordering::order_members;

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_ENTRY_PREALLOC: u64 = 1 << 20;

/// Split member text into lines, accepting `\n` and `\r\n` endings.
fn split_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines().map(str::to_owned)
}

/// Members are plain files directly under a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(DiscoveryError::root_unavailable(
                root,
                "directory does not exist",
            ));
        }
        let root = root
            .canonicalize()
            .map_err(|e| DiscoveryError::root_unavailable(root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ContentSource for DirectorySource {
    async fn process(&self, key: &str, members: &[String]) -> Result<Record, SourceError> {
        let ordered = order_members(members)?;
        let mut lines = Vec::new();
        for member in &ordered {
            let path = self.root.join(member);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| SourceError::unreadable(member.as_str(), e))?;
            let before = lines.len();
            lines.extend(split_lines(&String::from_utf8_lossy(&bytes)));
            debug!(member = %member, lines = lines.len() - before, "Read member");
        }
        info!(key = %key, members = ordered.len(), lines = lines.len(), "Assembled record");
        Ok(Record::new(key, lines))
    }
}

/// Members are entries of a zip archive.
///
/// Each `process` call opens its own read handle on a blocking thread, so
/// concurrent producers never share archive state.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
}

impl ArchiveSource {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DiscoveryError::root_unavailable(
                path,
                "archive does not exist",
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_archive_members(archive_path: &Path, ordered: &[String]) -> Result<Vec<String>, SourceError> {
    let file = File::open(archive_path).map_err(|e| SourceError::Archive {
        path: archive_path.to_path_buf(),
        source: e.into(),
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| SourceError::Archive {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let mut lines = Vec::new();
    for member in ordered {
        let mut entry = archive
            .by_name(member)
            .map_err(|e| SourceError::unreadable(member.as_str(), e.into()))?;
        // The declared size is unverified; the buffer grows as data arrives.
        let mut bytes = Vec::with_capacity(entry.size().min(MAX_ENTRY_PREALLOC) as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| SourceError::unreadable(member.as_str(), e))?;
        lines.extend(split_lines(&String::from_utf8_lossy(&bytes)));
    }
    Ok(lines)
}

#[async_trait]
impl ContentSource for ArchiveSource {
    async fn process(&self, key: &str, members: &[String]) -> Result<Record, SourceError> {
        let ordered = order_members(members)?;
        let archive_path = self.path.clone();
        let member_count = ordered.len();
        let lines = tokio::task::spawn_blocking(move || read_archive_members(&archive_path, &ordered))
            .await
            .map_err(|e| SourceError::Join(e.to_string()))??;
        info!(key = %key, members = member_count, lines = lines.len(), "Assembled record from archive");
        Ok(Record::new(key, lines))
    }
}
