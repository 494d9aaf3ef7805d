//! Producer/consumer pipeline: assemble groups concurrently, write records serially.
//!
//! A run moves through [`Stage::Init`] → [`Stage::Dispatching`] →
//! [`Stage::Draining`] → [`Stage::Done`]:
//!   - Init: the bounded channel is created and exactly one consumer is
//!     started on a blocking thread, owning the [`Sink`].
//!   - Dispatching: one producer task per group calls
//!     [`ContentSource::process`] and sends the record. A full channel
//!     suspends the producer until the consumer frees a slot, so records
//!     are never dropped and never pile up unbounded.
//!   - Draining: every producer holds its own sender clone and the
//!     original is dropped after dispatch, so the channel closes exactly
//!     once, after the last producer finishes. The consumer reads until
//!     the channel is empty and closed, then finalizes the sink.
//!   - Done: the [`PipelineResult`] is returned. `run` consumes the
//!     pipeline; a new run needs a new instance.
//!
//! # Error Handling
//! A failure while assembling or writing one group is recorded as a
//! [`GroupFailure`] and never stops sibling groups. Only a consumer panic or
//! a failure to finalize the sink fails the run.
//!
//! # Cancellation
//! An optional `watch` flag is observed by producers while assembling and
//! while blocked on a full channel. Cancelled producers emit nothing; the
//! consumer still drains what was queued and finalizes the sink.
//!
//! # Ordering
//! The consumer sees records in producer completion order, not discovery order.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::contract::{
    ContentSource, FailureStage, Group, GroupFailure, PipelineResult, Record, Sink,
};
use crate::error::{PipelineError, SinkError};

/// Records that may wait between producers and the consumer.
pub const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Dispatching,
    Draining,
    Done,
}

#[derive(Debug)]
enum ProducerOutcome {
    Sent,
    Failed(String),
    Cancelled,
}

struct ConsumerOutcome {
    count: usize,
    failures: Vec<GroupFailure>,
    finalized: Result<(), SinkError>,
}

pub struct Pipeline {
    source: Arc<dyn ContentSource>,
    sink: Box<dyn Sink>,
    groups: Vec<Group>,
    max_parallel: Option<usize>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    pub fn new(source: Arc<dyn ContentSource>, sink: Box<dyn Sink>, groups: Vec<Group>) -> Self {
        Self {
            source,
            sink,
            groups,
            max_parallel: None,
            cancel: None,
        }
    }

    /// Cap the number of producers assembling at the same time.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel.max(1));
        self
    }

    /// Stop producers once the flag behind `cancel` turns `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn run(self) -> Result<PipelineResult, PipelineError> {
        let Pipeline {
            source,
            sink,
            groups,
            max_parallel,
            cancel,
        } = self;
        let discovered = groups.len();

        info!(
            stage = ?Stage::Init,
            groups = discovered,
            capacity = CHANNEL_CAPACITY,
            max_parallel = ?max_parallel,
            "[PIPELINE] Starting run"
        );
        let (tx, rx) = mpsc::channel::<Record>(CHANNEL_CAPACITY);
        let consumer = tokio::task::spawn_blocking(move || consume(rx, sink));

        info!(stage = ?Stage::Dispatching, "[PIPELINE] Dispatching producers");
        let limiter = max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        let mut keys = Vec::with_capacity(discovered);
        let mut handles = Vec::with_capacity(discovered);
        for group in groups {
            keys.push(group.key.clone());
            handles.push(tokio::spawn(produce(
                group,
                Arc::clone(&source),
                tx.clone(),
                limiter.clone(),
                cancel.clone(),
            )));
        }
        // Producers now hold the only senders.
        drop(tx);

        let mut failures = Vec::new();
        for (key, joined) in keys.into_iter().zip(join_all(handles).await) {
            let message = match joined {
                Ok(ProducerOutcome::Sent) => continue,
                Ok(ProducerOutcome::Failed(message)) => message,
                Ok(ProducerOutcome::Cancelled) => "cancelled before completion".to_string(),
                Err(join_err) => {
                    error!(key = %key, error = %join_err, "[PIPELINE][ERROR] Producer task aborted");
                    format!("producer task aborted: {join_err}")
                }
            };
            failures.push(GroupFailure {
                key,
                stage: FailureStage::Assemble,
                message,
            });
        }

        info!(
            stage = ?Stage::Draining,
            abandoned = failures.len(),
            "[PIPELINE] All producers finished, draining"
        );
        let outcome = consumer
            .await
            .map_err(|e| PipelineError::ConsumerPanicked(e.to_string()))?;
        outcome.finalized.map_err(|e| {
            error!(error = %e, "[PIPELINE][ERROR] Failed to finalize destination");
            PipelineError::Finalize(e)
        })?;
        failures.extend(outcome.failures);

        info!(
            stage = ?Stage::Done,
            count = outcome.count,
            discovered,
            failed = failures.len(),
            "[PIPELINE] Run complete"
        );
        Ok(PipelineResult {
            count: outcome.count,
            discovered,
            failures,
        })
    }
}

/// Resolves once the cancellation flag is set. Never resolves without a flag,
/// or when the flag's sender is gone without ever cancelling.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
    std::future::pending::<()>().await
}

async fn produce(
    group: Group,
    source: Arc<dyn ContentSource>,
    tx: mpsc::Sender<Record>,
    limiter: Option<Arc<Semaphore>>,
    mut cancel: Option<watch::Receiver<bool>>,
) -> ProducerOutcome {
    let _permit = match limiter {
        Some(sem) => tokio::select! {
            _ = cancelled(&mut cancel) => return ProducerOutcome::Cancelled,
            permit = sem.acquire_owned() => match permit {
                Ok(p) => Some(p),
                Err(_) => return ProducerOutcome::Failed("producer limiter closed".into()),
            },
        },
        None => None,
    };

    let assembled = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => {
            debug!(key = %group.key, "Producer cancelled while assembling");
            return ProducerOutcome::Cancelled;
        }
        res = source.process(&group.key, &group.members) => res,
    };
    let record = match assembled {
        Ok(record) => record,
        Err(e) => {
            warn!(key = %group.key, error = %e, "[PIPELINE] Group abandoned");
            return ProducerOutcome::Failed(e.to_string());
        }
    };

    // Suspends while the channel is full.
    tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => {
            debug!(key = %group.key, "Producer cancelled while waiting for channel capacity");
            ProducerOutcome::Cancelled
        }
        sent = tx.send(record) => match sent {
            Ok(()) => {
                debug!(key = %group.key, "Record queued");
                ProducerOutcome::Sent
            }
            Err(_) => {
                error!(key = %group.key, "[PIPELINE][ERROR] Consumer is gone, record lost");
                ProducerOutcome::Failed("consumer stopped before the record was queued".into())
            }
        },
    }
}

/// Runs on a blocking thread: the sink is only ever touched here.
fn consume(mut rx: mpsc::Receiver<Record>, mut sink: Box<dyn Sink>) -> ConsumerOutcome {
    let mut count = 0usize;
    let mut failures = Vec::new();
    while let Some(record) = rx.blocking_recv() {
        let key = record.key.clone();
        match sink.write(record) {
            Ok(()) => {
                count += 1;
                debug!(key = %key, written = count, "[CONSUMER] Record written");
            }
            Err(e) => {
                error!(key = %key, error = %e, "[CONSUMER][ERROR] Record could not be written");
                failures.push(GroupFailure {
                    key,
                    stage: FailureStage::Write,
                    message: e.to_string(),
                });
            }
        }
    }
    debug!(written = count, "[CONSUMER] Channel closed and empty, finalizing sink");
    let finalized = sink.finish();
    ConsumerOutcome {
        count,
        failures,
        finalized,
    }
}
