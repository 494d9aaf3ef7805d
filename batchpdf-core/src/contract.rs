#![allow(unused)]

//! # contract: data model and seams of the conversion pipeline
//!
//! This module defines the plain data flowing through a run ([`Group`],
//! [`Record`], [`PipelineResult`]) and the two traits the pipeline is built
//! around:
//!
//! - [`ContentSource`] materializes a group's content from a directory or an archive.
//! - [`Sink`] persists one rendered record, either as a loose file or as an archive entry.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`, so pipeline tests can script
//!   sources and sinks without touching the filesystem.
//!
//! ## Adding New Origins or Destinations
//! - Implement the trait for the new backend.
//! - Map backend failures into [`SourceError`] / [`SinkError`] so the pipeline
//!   can isolate them per group.

use async_trait::async_trait;

use mockall::{automock, predicate::*};

pub use crate::error::{SinkError, SourceError};

/// A set of members sharing one base name. One group becomes one output document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Shared base name of all members; also the output document name.
    pub key: String,
    /// Member identifiers (file names or archive entry names). Content is not loaded.
    pub members: Vec<String>,
}

/// The assembled content of one group, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    /// Every member's lines, concatenated in numeric-suffix order.
    pub lines: Vec<String>,
}

impl Record {
    pub fn new(key: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            key: key.into(),
            lines,
        }
    }
}

/// Where a group was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Reading or ordering the group's members.
    Assemble,
    /// Rendering or persisting the record.
    Write,
}

/// Diagnostic for one abandoned group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub key: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineResult {
    /// Records the consumer successfully wrote.
    pub count: usize,
    /// Groups handed to producers.
    pub discovered: usize,
    pub failures: Vec<GroupFailure>,
}

/// Trait for materializing a group's content.
///
/// Implementations must read the members of one group strictly in
/// numeric-suffix order, but independent groups are processed concurrently,
/// so the implementor must be safe to call from many producers at once.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Order `members`, read each one, and return the concatenated record for `key`.
    async fn process(&self, key: &str, members: &[String]) -> Result<Record, SourceError>;
}

/// Trait for persisting rendered records.
///
/// Only the single consumer ever holds a sink, so calls are never concurrent.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Sink: Send {
    /// Render and persist one record. The record is consumed.
    fn write(&mut self, record: Record) -> Result<(), SinkError>;

    /// Flush and close the destination. Called once, after the last write.
    fn finish(&mut self) -> Result<(), SinkError>;
}
