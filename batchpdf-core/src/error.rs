//! Error types for every stage of a run.
//!
//! Only [`DiscoveryError::RootUnavailable`] and [`PipelineError`] are fatal to
//! a whole run. Everything else is confined to the group that raised it.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderingError {
    #[error("member `{member}` has no integer extension")]
    MalformedMemberName { member: String },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("root `{path}` is unavailable: {reason}")]
    RootUnavailable { path: PathBuf, reason: String },
    #[error("invalid member filter `{pattern}`: {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl DiscoveryError {
    pub fn root_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DiscoveryError::RootUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Malformed(#[from] OrderingError),
    #[error("member `{member}` is unreadable: {source}")]
    MemberUnreadable {
        member: String,
        #[source]
        source: io::Error,
    },
    #[error("archive `{path}` could not be opened: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("reader task failed: {0}")]
    Join(String),
}

impl SourceError {
    pub fn unreadable(member: impl Into<String>, source: io::Error) -> Self {
        SourceError::MemberUnreadable {
            member: member.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("document layout failed: {0}")]
    Layout(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("render failed for `{key}`: {source}")]
    Render {
        key: String,
        #[source]
        source: RenderError,
    },
    #[error("i/o failure on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive `{path}`: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("entry `{name}` was already written in this run")]
    DuplicateEntry { name: String },
    #[error("sink already finished")]
    Finished,
}

impl SinkError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        SinkError::Archive {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("consumer task panicked: {0}")]
    ConsumerPanicked(String),
    #[error("failed to finalize destination: {0}")]
    Finalize(#[source] SinkError),
}
