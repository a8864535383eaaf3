//! Progress reporting
//!
//! Reporters are sinks for drain events. They return nothing, so whatever
//! happens inside one cannot change the outcome of a move.

use chunkshift_core::Namespace;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::executor::{MigrationOutcome, NamespaceSummary};
use crate::planner::MigrationTask;

/// Event emitted while draining
#[derive(Debug, Clone)]
pub enum MigrationEvent {
    /// A precondition failed; no chunk was touched
    RunAborted { reason: String },
    /// Nothing to move for this namespace
    NamespaceConverged { namespace: Namespace },
    /// Planning could not read the namespace's chunks
    NamespacePlanFailed { namespace: Namespace, reason: String },
    /// About to issue a move (`index` counts from 1)
    ChunkMoveAttempted {
        task: MigrationTask,
        index: usize,
        total: usize,
    },
    /// A move returned
    ChunkMoveResult {
        task: MigrationTask,
        index: usize,
        outcome: MigrationOutcome,
    },
    /// A namespace's plan has been exhausted, stopped or cancelled
    NamespaceCompleted { summary: NamespaceSummary },
}

/// Sink for drain events
pub trait Reporter: Send + Sync {
    fn report(&self, event: &MigrationEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::RunAborted { reason } => {
                error!(reason = %reason, "Drain aborted");
            }
            MigrationEvent::NamespaceConverged { namespace } => {
                info!(
                    namespace = %namespace,
                    "No eligible chunks, either none exist or all are already on the target shard"
                );
            }
            MigrationEvent::NamespacePlanFailed { namespace, reason } => {
                error!(namespace = %namespace, reason = %reason, "Could not plan namespace");
            }
            MigrationEvent::ChunkMoveAttempted { task, index, total } => {
                info!(
                    index,
                    total,
                    chunk_id = %task.chunk_id(),
                    from = %task.source,
                    to = %task.target,
                    "Moving chunk"
                );
            }
            MigrationEvent::ChunkMoveResult {
                task,
                index,
                outcome,
            } => match outcome {
                MigrationOutcome::Succeeded => {
                    info!(index, chunk_id = %task.chunk_id(), "Moved chunk");
                }
                MigrationOutcome::Failed(err) => {
                    warn!(
                        index,
                        chunk_id = %task.chunk_id(),
                        code = %err.code,
                        message = %err.message,
                        "Error moving chunk"
                    );
                }
            },
            MigrationEvent::NamespaceCompleted { summary } => {
                info!(summary = %summary.summary(), "Namespace finished");
            }
        }
    }
}

/// Forwards events to a channel, dropping them when it is full or closed
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<MigrationEvent>,
}

impl ChannelReporter {
    /// Create reporter with its receiving end
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MigrationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, event: &MigrationEvent) {
        let _ = self.tx.try_send(event.clone());
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<MigrationEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events reported so far
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().clone()
    }

    /// Number of move attempts reported
    pub fn attempts(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, MigrationEvent::ChunkMoveAttempted { .. }))
            .count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: &MigrationEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Sends every event to each inner reporter in turn
#[derive(Clone, Default)]
pub struct FanoutReporter {
    reporters: Vec<Arc<dyn Reporter>>,
}

impl FanoutReporter {
    pub fn new(reporters: Vec<Arc<dyn Reporter>>) -> Self {
        Self { reporters }
    }

    pub fn push(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporters.push(reporter);
    }
}

impl Reporter for FanoutReporter {
    fn report(&self, event: &MigrationEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converged(name: &str) -> MigrationEvent {
        MigrationEvent::NamespaceConverged {
            namespace: Namespace::new("db", name),
        }
    }

    #[test]
    fn test_memory_reporter_records_in_order() {
        let reporter = MemoryReporter::new();
        reporter.report(&converged("a"));
        reporter.report(&converged("b"));

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            MigrationEvent::NamespaceConverged { namespace } if namespace.collection() == "b"
        ));
        assert_eq!(reporter.attempts(), 0);
    }

    #[tokio::test]
    async fn test_channel_reporter_delivers() {
        let (reporter, mut rx) = ChannelReporter::new(4);
        reporter.report(&converged("a"));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, MigrationEvent::NamespaceConverged { .. }));
    }

    #[test]
    fn test_channel_reporter_drops_when_full_or_closed() {
        let (reporter, rx) = ChannelReporter::new(1);
        reporter.report(&converged("a"));
        reporter.report(&converged("b"));

        drop(rx);
        reporter.report(&converged("c"));
    }

    #[test]
    fn test_fanout_reaches_every_reporter() {
        let first = Arc::new(MemoryReporter::new());
        let second = Arc::new(MemoryReporter::new());
        let mut fanout = FanoutReporter::new(vec![first.clone() as Arc<dyn Reporter>]);
        fanout.push(second.clone());

        fanout.report(&converged("a"));

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }
}
