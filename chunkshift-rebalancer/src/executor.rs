//! Drain Executor
//!
//! Drives drain plans through the admin interface:
//! - Run preconditions checked once, before any chunk is touched
//! - Strictly sequential moves, one chunk at a time
//! - Cooldown between consecutive moves
//! - Per-chunk failure policy
//! - Cancellation between moves, never during one

use chrono::{DateTime, Utc};
use chunkshift_core::{AdminError, AuthError, ChunkId, Namespace, ShardId, TopologyError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::admin::AdminClient;
use crate::config::{ConfigError, DrainConfig, FailurePolicy};
use crate::planner::{MigrationPlan, Planner, PlannerConfig};
use crate::reporter::{MigrationEvent, Reporter};
use crate::topology::TopologyReader;

/// Errors that abort a run before any chunk is moved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Balancer is enabled, turn it off before draining chunks")]
    BalancerEnabled,

    #[error("Could not determine balancer state: {0}")]
    BalancerState(AdminError),

    #[error("No database found with name {0}")]
    DatabaseNotFound(String),

    #[error("No partitioned database found with name {0}")]
    DatabaseNotPartitioned(String),

    #[error("Could not read cluster metadata: {0}")]
    Topology(TopologyError),
}

pub type Result<T> = std::result::Result<T, RunError>;

/// Result of attempting one move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Succeeded,
    Failed(AdminError),
}

impl MigrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MigrationOutcome::Succeeded)
    }
}

/// How a namespace's drain ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceStatus {
    /// Nothing was eligible to move
    Converged,
    /// Every planned move was attempted
    Completed,
    /// Dry run: moves were planned, none issued
    DryRun,
    /// The chunk listing could not be read
    PlanningFailed(String),
    /// A failed move ended the run
    Stopped,
    /// Cancelled between moves
    Cancelled,
}

/// A chunk that could not be moved, with the server's error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub chunk_id: ChunkId,
    pub source: ShardId,
    pub error: AdminError,
}

/// Counts for one namespace
#[derive(Debug, Clone)]
pub struct NamespaceSummary {
    pub namespace: Namespace,
    pub target: ShardId,
    pub status: NamespaceStatus,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Planned moves never issued (dry run, stop or cancellation)
    pub skipped: usize,
    /// Eligible chunks beyond the per-namespace cap
    pub deferred: usize,
    pub failures: Vec<ChunkFailure>,
    pub duration: Duration,
}

impl NamespaceSummary {
    fn new(namespace: Namespace, target: ShardId, status: NamespaceStatus) -> Self {
        Self {
            namespace,
            target,
            status,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            deferred: 0,
            failures: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Summary string
    pub fn summary(&self) -> String {
        format!(
            "{}: {} attempted, {} succeeded, {} failed, {} skipped, {} deferred ({:?}) in {:?}",
            self.namespace,
            self.attempted,
            self.succeeded,
            self.failed,
            self.skipped,
            self.deferred,
            self.status,
            self.duration
        )
    }
}

/// Overall run result
#[derive(Debug, Clone)]
pub struct RunReport {
    pub target: ShardId,
    /// Per-namespace summaries in processing order
    pub namespaces: Vec<NamespaceSummary>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub stopped_on_error: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RunReport {
    fn new(target: ShardId, dry_run: bool) -> Self {
        Self {
            target,
            namespaces: Vec::new(),
            dry_run,
            cancelled: false,
            stopped_on_error: false,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    pub fn attempted(&self) -> usize {
        self.namespaces.iter().map(|n| n.attempted).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.namespaces.iter().map(|n| n.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.namespaces.iter().map(|n| n.failed).sum()
    }

    /// Whether any move or planning step failed
    pub fn has_failures(&self) -> bool {
        self.namespaces
            .iter()
            .any(|n| n.failed > 0 || matches!(n.status, NamespaceStatus::PlanningFailed(_)))
    }

    pub fn namespace(&self, namespace: &Namespace) -> Option<&NamespaceSummary> {
        self.namespaces.iter().find(|n| &n.namespace == namespace)
    }

    /// Summary string
    pub fn summary(&self) -> String {
        format!(
            "{} namespaces onto {}: {} attempted, {} succeeded, {} failed in {:?}{}{}",
            self.namespaces.len(),
            self.target,
            self.attempted(),
            self.succeeded(),
            self.failed(),
            self.duration,
            if self.cancelled { " (cancelled)" } else { "" },
            if self.stopped_on_error {
                " (stopped on error)"
            } else {
                ""
            }
        )
    }
}

/// What the run loop should do after a namespace
enum Flow {
    Continue,
    Halt,
}

/// Drain executor
pub struct Executor {
    config: DrainConfig,
    planner: Planner,
    reporter: Arc<dyn Reporter>,
}

impl Executor {
    /// Create a new executor
    pub fn new(config: DrainConfig, reporter: Arc<dyn Reporter>) -> Self {
        let planner = Planner::new(PlannerConfig {
            max_tasks: config.max_moves_per_namespace,
        });

        Self {
            config,
            planner,
            reporter,
        }
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Drain every configured namespace onto the target shard
    ///
    /// Returns `Err` only for conditions detected before the first move.
    /// Per-chunk failures are reported in the returned [`RunReport`].
    #[instrument(skip_all, fields(database = %self.config.database))]
    pub async fn run<A, T>(
        &self,
        admin: &A,
        topology: &T,
        cancel: &CancellationToken,
    ) -> Result<RunReport>
    where
        A: AdminClient + ?Sized,
        T: TopologyReader + ?Sized,
    {
        let start = Instant::now();

        let target = match self.check_preconditions(admin, topology).await {
            Ok(target) => target,
            Err(e) => {
                self.reporter.report(&MigrationEvent::RunAborted {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        info!(
            target = %target,
            collections = self.config.collections.len(),
            cooldown = ?self.config.cooldown(),
            dry_run = self.config.dry_run,
            "Starting drain"
        );

        let mut report = RunReport::new(target.clone(), self.config.dry_run);

        for namespace in self.config.namespaces() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let (summary, flow) = self
                .drain_namespace(admin, topology, &namespace, &target, cancel, &mut report)
                .await;

            self.reporter
                .report(&MigrationEvent::NamespaceCompleted {
                    summary: summary.clone(),
                });
            report.namespaces.push(summary);

            if let Flow::Halt = flow {
                break;
            }
        }

        report.duration = start.elapsed();
        info!(summary = %report.summary(), "Drain finished");

        Ok(report)
    }

    /// Validate config, authenticate, require a stopped balancer and resolve the target
    async fn check_preconditions<A, T>(&self, admin: &A, topology: &T) -> Result<ShardId>
    where
        A: AdminClient + ?Sized,
        T: TopologyReader + ?Sized,
    {
        self.config.validate()?;

        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("credentials".to_string()))?;
        admin.authenticate(credentials).await?;

        let balancer_enabled = admin
            .is_balancer_enabled()
            .await
            .map_err(RunError::BalancerState)?;
        if balancer_enabled {
            return Err(RunError::BalancerEnabled);
        }

        let database = topology
            .find_database(&self.config.database)
            .await
            .map_err(|e| match e {
                TopologyError::DatabaseNotFound(name) => RunError::DatabaseNotFound(name),
                other => RunError::Topology(other),
            })?;
        if !database.partitioned {
            return Err(RunError::DatabaseNotPartitioned(database.name));
        }

        let target = match self.config.target_override() {
            Some(shard) => shard,
            None => database
                .primary
                .ok_or_else(|| RunError::DatabaseNotPartitioned(database.name.clone()))?,
        };

        info!(target = %target, "Target shard resolved");
        Ok(target)
    }

    /// Plan and drain one namespace
    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn drain_namespace<A, T>(
        &self,
        admin: &A,
        topology: &T,
        namespace: &Namespace,
        target: &ShardId,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> (NamespaceSummary, Flow)
    where
        A: AdminClient + ?Sized,
        T: TopologyReader + ?Sized,
    {
        let start = Instant::now();

        let plan = match self.planner.plan(topology, namespace, target).await {
            Ok(plan) => plan,
            Err(e) => {
                self.reporter.report(&MigrationEvent::NamespacePlanFailed {
                    namespace: namespace.clone(),
                    reason: e.to_string(),
                });
                let summary = NamespaceSummary::new(
                    namespace.clone(),
                    target.clone(),
                    NamespaceStatus::PlanningFailed(e.to_string()),
                );
                return (summary, Flow::Continue);
            }
        };

        if plan.is_empty() {
            self.reporter.report(&MigrationEvent::NamespaceConverged {
                namespace: namespace.clone(),
            });
            let summary =
                NamespaceSummary::new(namespace.clone(), target.clone(), NamespaceStatus::Converged);
            return (summary, Flow::Continue);
        }

        let mut summary =
            NamespaceSummary::new(namespace.clone(), target.clone(), NamespaceStatus::Completed);
        summary.deferred = plan.deferred;

        let flow = if self.config.dry_run {
            self.preview(&plan, &mut summary);
            Flow::Continue
        } else {
            self.execute_plan(admin, plan, cancel, &mut summary, report)
                .await
        };

        summary.duration = start.elapsed();
        (summary, flow)
    }

    fn preview(&self, plan: &MigrationPlan, summary: &mut NamespaceSummary) {
        for (i, task) in plan.tasks.iter().enumerate() {
            info!(
                index = i + 1,
                total = plan.len(),
                chunk_id = %task.chunk_id(),
                from = %task.source,
                to = %task.target,
                "Dry run, would move chunk"
            );
        }
        summary.skipped = plan.len();
        summary.status = NamespaceStatus::DryRun;
    }

    /// Issue the plan's moves one at a time
    async fn execute_plan<A>(
        &self,
        admin: &A,
        plan: MigrationPlan,
        cancel: &CancellationToken,
        summary: &mut NamespaceSummary,
        report: &mut RunReport,
    ) -> Flow
    where
        A: AdminClient + ?Sized,
    {
        let total = plan.len();
        let cooldown = self.config.cooldown();

        for (i, task) in plan.tasks.into_iter().enumerate() {
            let index = i + 1;
            let remaining = total - index;

            self.reporter.report(&MigrationEvent::ChunkMoveAttempted {
                task: task.clone(),
                index,
                total,
            });
            summary.attempted += 1;

            let outcome = match admin
                .move_chunk(&plan.namespace, &task.chunk.min, &task.chunk.max, &task.target)
                .await
            {
                Ok(_) => MigrationOutcome::Succeeded,
                Err(e) => MigrationOutcome::Failed(e),
            };

            let failed = match &outcome {
                MigrationOutcome::Succeeded => {
                    summary.succeeded += 1;
                    false
                }
                MigrationOutcome::Failed(error) => {
                    summary.failed += 1;
                    summary.failures.push(ChunkFailure {
                        chunk_id: task.chunk_id().clone(),
                        source: task.source.clone(),
                        error: error.clone(),
                    });
                    true
                }
            };

            self.reporter.report(&MigrationEvent::ChunkMoveResult {
                task,
                index,
                outcome,
            });

            if failed && self.config.failure_policy == FailurePolicy::StopOnFirstError {
                warn!(remaining, "Stopping after failed move");
                summary.skipped = remaining;
                summary.status = NamespaceStatus::Stopped;
                report.stopped_on_error = true;
                return Flow::Halt;
            }

            if remaining == 0 {
                break;
            }

            if cancel.is_cancelled() || !self.cooldown(cooldown, cancel).await {
                info!(remaining, "Drain cancelled");
                summary.skipped = remaining;
                summary.status = NamespaceStatus::Cancelled;
                report.cancelled = true;
                return Flow::Halt;
            }
        }

        Flow::Continue
    }

    /// Sleep for the cooldown; `false` if cancelled before it elapsed
    async fn cooldown(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if duration.is_zero() {
            return true;
        }

        info!(cooldown = ?duration, "Sleeping before next move");
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
