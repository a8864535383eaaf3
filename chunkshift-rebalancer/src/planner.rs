//! Drain Planner
//!
//! Turns a fresh topology snapshot into the ordered list of chunk moves that
//! brings a namespace onto the target shard. Plans are never persisted; a
//! restarted run plans again from current metadata, so chunks already moved
//! simply stop showing up.

use chunkshift_core::{ChunkId, ChunkRange, Namespace, ShardId, TopologyError};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

use crate::topology::TopologyReader;

/// One chunk move
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationTask {
    pub chunk: ChunkRange,
    /// Shard owning the chunk when the plan was made
    pub source: ShardId,
    pub target: ShardId,
}

impl MigrationTask {
    pub fn new(chunk: ChunkRange, target: ShardId) -> Self {
        Self {
            source: chunk.shard.clone(),
            chunk,
            target,
        }
    }

    pub fn chunk_id(&self) -> &ChunkId {
        &self.chunk.id
    }
}

/// Ordered moves for one namespace
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub namespace: Namespace,
    pub target: ShardId,
    /// Moves in execution order
    pub tasks: Vec<MigrationTask>,
    /// Eligible chunks left out because of the per-namespace cap
    pub deferred: usize,
}

impl MigrationPlan {
    pub fn new(namespace: Namespace, target: ShardId) -> Self {
        Self {
            namespace,
            target,
            tasks: Vec::new(),
            deferred: 0,
        }
    }

    /// Nothing left to move: the namespace has converged
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.deferred == 0
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Shards that give up chunks under this plan
    pub fn source_shards(&self) -> BTreeSet<&ShardId> {
        self.tasks.iter().map(|t| &t.source).collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> String {
        format!(
            "{}: {} moves onto {} from {} source shards, {} deferred",
            self.namespace,
            self.tasks.len(),
            self.target,
            self.source_shards().len(),
            self.deferred
        )
    }
}

/// Planner configuration
#[derive(Debug, Clone, Default)]
pub struct PlannerConfig {
    /// Maximum moves planned per namespace; `None` plans every eligible chunk
    pub max_tasks: Option<usize>,
}

/// Drain planner
#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Create a new planner
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Plan every move needed to bring `namespace` onto `target`
    #[instrument(skip_all, fields(namespace = %namespace, target = %target))]
    pub async fn plan<T>(
        &self,
        topology: &T,
        namespace: &Namespace,
        target: &ShardId,
    ) -> Result<MigrationPlan, TopologyError>
    where
        T: TopologyReader + ?Sized,
    {
        let chunks = topology.list_chunks_not_on_shard(namespace, target).await?;
        let mut plan = MigrationPlan::new(namespace.clone(), target.clone());

        for chunk in chunks {
            if chunk.is_on(target) {
                debug!(chunk_id = %chunk.id, "Chunk already on target, skipping");
                continue;
            }

            if let Some(max) = self.config.max_tasks {
                if plan.tasks.len() >= max {
                    plan.deferred += 1;
                    continue;
                }
            }

            plan.tasks.push(MigrationTask::new(chunk, target.clone()));
        }

        info!(summary = %plan.summary(), "Drain plan created");

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCluster;
    use bson::doc;

    fn cluster() -> InMemoryCluster {
        InMemoryCluster::new()
            .with_database("database", true, Some("shardA"))
            .with_chunk("database.collection1", "c1", doc! { "x": 0 }, doc! { "x": 10 }, "shardB")
            .with_chunk("database.collection1", "c2", doc! { "x": 10 }, doc! { "x": 20 }, "shardA")
            .with_chunk("database.collection1", "c3", doc! { "x": 20 }, doc! { "x": 30 }, "shardC")
            .with_chunk("database.collection2", "d1", doc! { "y": 0 }, doc! { "y": 5 }, "shardB")
    }

    fn ns() -> Namespace {
        Namespace::new("database", "collection1")
    }

    #[tokio::test]
    async fn test_plan_excludes_chunks_on_target() {
        let planner = Planner::default();
        let plan = planner
            .plan(&cluster(), &ns(), &ShardId::from("shardA"))
            .await
            .unwrap();

        let ids: Vec<&str> = plan.tasks.iter().map(|t| t.chunk_id().as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
        assert_eq!(plan.tasks[0].source, ShardId::from("shardB"));
        assert_eq!(plan.tasks[1].source, ShardId::from("shardC"));
        assert!(plan
            .tasks
            .iter()
            .all(|t| t.target == ShardId::from("shardA")));
    }

    #[tokio::test]
    async fn test_plan_only_covers_requested_namespace() {
        let plan = Planner::default()
            .plan(&cluster(), &ns(), &ShardId::from("shardA"))
            .await
            .unwrap();
        assert!(plan.tasks.iter().all(|t| t.chunk.namespace == ns()));
    }

    #[tokio::test]
    async fn test_converged_namespace_gives_empty_plan() {
        let plan = Planner::default()
            .plan(
                &cluster(),
                &Namespace::new("database", "collection2"),
                &ShardId::from("shardB"),
            )
            .await
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }

    #[tokio::test]
    async fn test_max_tasks_defers_the_rest() {
        let planner = Planner::new(PlannerConfig { max_tasks: Some(1) });
        let plan = planner
            .plan(&cluster(), &ns(), &ShardId::from("shardA"))
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.deferred, 1);
        assert!(!plan.is_empty());
    }

    #[tokio::test]
    async fn test_plan_summary_and_sources() {
        let plan = Planner::default()
            .plan(&cluster(), &ns(), &ShardId::from("shardA"))
            .await
            .unwrap();

        assert_eq!(plan.source_shards().len(), 2);
        assert!(plan.source_shards().contains(&ShardId::from("shardC")));
        let summary = plan.summary();
        assert!(summary.contains("database.collection1"));
        assert!(summary.contains("2 moves onto shardA"));
    }

    #[tokio::test]
    async fn test_plan_propagates_read_failure() {
        let cluster = cluster().fail_listing("database.collection1");
        let result = Planner::default()
            .plan(&cluster, &ns(), &ShardId::from("shardA"))
            .await;
        assert!(matches!(result, Err(TopologyError::Store(_))));
    }
}
