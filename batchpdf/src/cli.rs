///
/// This module implements the CLI interface for batchpdf: argument parsing,
/// endpoint validation, the async entrypoint and user-visible output.
///
/// All pipeline logic (discovery, sources, sinks, rendering) lives in the
/// [`batchpdf-core`] crate. This module is strictly CLI glue.
///
/// ## How To Use
/// - For command-line users: `batchpdf <source> <destination>`, see `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`batchpdf-core`]: ../../batchpdf-core/
use crate::load_config::load_config;
use anyhow::{Context, Result};
use batchpdf_core::config::{open_sink, open_source, Destination, Settings, SourceRoot};
use batchpdf_core::contract::PipelineResult;
use batchpdf_core::discovery::{discover, MemberFilter};
use batchpdf_core::pipeline::Pipeline;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;

/// CLI for batchpdf: render groups of numbered text fragments as PDF documents.
#[derive(Parser, Debug)]
#[clap(
    name = "batchpdf",
    version,
    about = "Convert groups of numbered text files (name.1, name.2, ...) into one PDF per group"
)]
pub struct Cli {
    /// Source directory of text files, or a .zip archive of text files
    pub source: PathBuf,

    /// Destination directory for PDF files, or a .zip archive to create or update
    pub destination: PathBuf,

    /// Path to an optional YAML settings file
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Maximum number of groups assembled concurrently
    #[clap(long)]
    pub max_parallel: Option<usize>,

    /// Regex a member file name must match to be picked up
    #[clap(long)]
    pub filter: Option<String>,
}

impl Cli {
    /// Settings file (if any) with command-line overrides applied.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => load_config(path)?,
            None => Settings::default(),
        };
        if let Some(n) = self.max_parallel {
            settings.max_parallel = Some(n);
        }
        if let Some(filter) = &self.filter {
            settings.member_filter = Some(filter.clone());
        }
        Ok(settings)
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<PipelineResult> {
    tracing::info!(
        source = %cli.source.display(),
        destination = %cli.destination.display(),
        "run_started"
    );

    let source_root = SourceRoot::resolve(&cli.source).context("invalid source argument")?;
    let destination =
        Destination::resolve(&cli.destination).context("invalid destination argument")?;
    let settings = cli.settings()?;
    settings.trace_loaded();

    println!(
        "Converting text files in {} and will place PDF versions in {}",
        source_root.path().display(),
        destination.path().display()
    );

    let filter = MemberFilter::from_option(settings.member_filter.as_deref())?;
    let groups = discover(&source_root, &filter).context("failed to enumerate source")?;
    let source = open_source(&source_root)?;
    let sink = open_sink(&destination, &settings).context("failed to open destination")?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling outstanding groups");
            let _ = cancel_tx.send(true);
        }
    });

    let mut pipeline = Pipeline::new(source, sink, groups).with_cancellation(cancel_rx);
    if let Some(n) = settings.max_parallel {
        pipeline = pipeline.with_max_parallel(n);
    }
    let result = pipeline.run().await;
    interrupt.abort();
    let result = result.context("conversion run failed")?;

    for failure in &result.failures {
        eprintln!(
            "[ERROR] group {} failed during {:?}: {}",
            failure.key, failure.stage, failure.message
        );
    }
    println!(
        "added {} entries to {}",
        result.count,
        destination.path().display()
    );
    tracing::info!(
        count = result.count,
        discovered = result.discovered,
        failed = result.failures.len(),
        "run_finished"
    );
    Ok(result)
}
