#![doc = "batchpdf-core: core pipeline library for batchpdf."]

//! This crate contains the data model, sources, sinks and the
//! producer/consumer pipeline that turns groups of numbered text fragments
//! into PDF documents. CLI parsing and presentation live in the `batchpdf` crate.
//!
//! # Usage
//! Resolve the endpoints with [`config::SourceRoot`] and [`config::Destination`],
//! discover groups with [`discovery::discover`], then build and run a
//! [`pipeline::Pipeline`].

pub mod config;
pub mod contract;
pub mod discovery;
pub mod error;
pub mod ordering;
pub mod pipeline;
pub mod render;
pub mod sink;
pub mod source;
