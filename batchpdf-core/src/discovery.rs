//! Group discovery: enumerate member identifiers under a root and partition
//! them by base name. No member content is opened here.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::Path;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::SourceRoot;
use crate::contract::Group;
use crate::error::DiscoveryError;
use crate::ordering::{base_name, file_name, numeric_extension};

/// Restricts which names under a root are treated as members.
#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    pattern: Option<Regex>,
}

impl MemberFilter {
    /// Accept every name.
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only names whose final component matches `pattern`.
    pub fn pattern(pattern: &str) -> Result<Self, DiscoveryError> {
        let re = Regex::new(pattern).map_err(|source| DiscoveryError::InvalidFilter {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { pattern: Some(re) })
    }

    pub fn from_option(pattern: Option<&str>) -> Result<Self, DiscoveryError> {
        match pattern {
            Some(p) => Self::pattern(p),
            None => Ok(Self::all()),
        }
    }

    pub fn accepts(&self, file_name: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(file_name),
            None => true,
        }
    }
}

/// Enumerate and group every member available under `root`.
///
/// Groups come back sorted by key, each group's members sorted by name.
pub fn discover(root: &SourceRoot, filter: &MemberFilter) -> Result<Vec<Group>, DiscoveryError> {
    let names = match root {
        SourceRoot::Directory(dir) => list_directory(dir, filter)?,
        SourceRoot::Archive(path) => list_archive(path, filter)?,
    };
    let groups = group_by_base_name(names);
    info!(
        root = %root.path().display(),
        groups = groups.len(),
        members = groups.iter().map(|g| g.members.len()).sum::<usize>(),
        "Discovered member groups"
    );
    Ok(groups)
}

fn list_directory(dir: &Path, filter: &MemberFilter) -> Result<Vec<String>, DiscoveryError> {
    let entries = fs::read_dir(dir).map_err(|e| DiscoveryError::root_unavailable(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DiscoveryError::root_unavailable(dir, e))?;
        // Follows symlinks, so a link to a regular file is a member.
        let is_file = fs::metadata(entry.path())
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            debug!(path = %entry.path().display(), "Skipping non-file entry");
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
            continue;
        };
        if filter.accepts(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

fn list_archive(path: &Path, filter: &MemberFilter) -> Result<Vec<String>, DiscoveryError> {
    let file = File::open(path).map_err(|e| DiscoveryError::root_unavailable(path, e))?;
    // Reads the central directory only.
    let archive =
        zip::ZipArchive::new(file).map_err(|e| DiscoveryError::root_unavailable(path, e))?;
    let names = archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .filter(|name| filter.accepts(file_name(name)))
        .map(str::to_owned)
        .collect();
    Ok(names)
}

/// Partition names by base name. A second member with an already seen
/// numeric suffix is dropped so suffixes stay unique within each group.
pub fn group_by_base_name<I>(names: I) -> Vec<Group>
where
    I: IntoIterator<Item = String>,
{
    let mut sorted: Vec<String> = names.into_iter().collect();
    sorted.sort();

    let mut groups: BTreeMap<String, (Vec<String>, HashSet<i64>)> = BTreeMap::new();
    for name in sorted {
        let key = base_name(&name).to_string();
        let (members, seen) = groups.entry(key).or_default();
        // Malformed names are kept; ordering rejects the whole group later.
        if let Ok(n) = numeric_extension(&name) {
            if !seen.insert(n) {
                warn!(member = %name, suffix = n, "Dropping member with duplicate suffix");
                continue;
            }
        }
        members.push(name);
    }

    groups
        .into_iter()
        .map(|(key, (members, _))| Group { key, members })
        .collect()
}
