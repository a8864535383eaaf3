//! Drain scenarios against an in-memory cluster
//!
//! Run with: cargo test --test drain_scenarios

use bson::doc;
use chunkshift_core::{AdminError, ChunkId, Credentials, Namespace, SecretRef, ShardId};
use chunkshift_rebalancer::{
    DrainConfig, Executor, FailurePolicy, InMemoryCluster, MemoryReporter, MigrationEvent, MigrationOutcome,
    MigrationPlan, NamespaceStatus, Planner, PlannerConfig, RunError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config(collections: &[&str], cooldown_ms: u64) -> DrainConfig {
    DrainConfig {
        database: "database".to_string(),
        collections: collections.iter().map(|c| c.to_string()).collect(),
        credentials: Some(Credentials::new(
            "clusteradmin",
            SecretRef::Env("CHUNKSHIFT_ADMIN_PASSWORD".to_string()),
        )),
        cooldown_ms,
        ..Default::default()
    }
}

/// `database` with primary shardA; collection1 holds c1 (shardB), c2 (shardA), c3 (shardC)
fn scenario_cluster() -> InMemoryCluster {
    InMemoryCluster::new()
        .with_database("database", true, Some("shardA"))
        .with_chunk("database.collection1", "c1", doc! { "x": 0 }, doc! { "x": 10 }, "shardB")
        .with_chunk("database.collection1", "c2", doc! { "x": 10 }, doc! { "x": 20 }, "shardA")
        .with_chunk("database.collection1", "c3", doc! { "x": 20 }, doc! { "x": 30 }, "shardC")
}

/// `count` chunks of `namespace`, none on shardA
fn spread_cluster(namespace: &str, count: i32) -> InMemoryCluster {
    let mut cluster = InMemoryCluster::new().with_database("database", true, Some("shardA"));
    for i in 0..count {
        let shard = if i % 2 == 0 { "shardB" } else { "shardC" };
        cluster = cluster.with_chunk(
            namespace,
            &format!("k{}", i),
            doc! { "x": i * 100 },
            doc! { "x": (i + 1) * 100 },
            shard,
        );
    }
    cluster
}

fn executor(config: DrainConfig) -> (Executor, Arc<MemoryReporter>) {
    let reporter = Arc::new(MemoryReporter::new());
    (Executor::new(config, reporter.clone()), reporter)
}

fn collection1() -> Namespace {
    Namespace::new("database", "collection1")
}

#[tokio::test]
async fn test_repeated_planning_is_stable() {
    let cluster = scenario_cluster();
    let planner = Planner::new(PlannerConfig::default());
    let target = ShardId::from("shardA");

    let first = planner.plan(&cluster, &collection1(), &target).await.unwrap();
    let second = planner.plan(&cluster, &collection1(), &target).await.unwrap();

    let ids = |plan: &MigrationPlan| {
        let mut ids: Vec<ChunkId> = plan.tasks.iter().map(|t| t.chunk_id().clone()).collect();
        ids.sort();
        ids
    };

    assert_eq!(ids(&first), ids(&second));
    assert_eq!(ids(&first), vec![ChunkId::from("c1"), ChunkId::from("c3")]);
}

#[tokio::test]
async fn test_successful_run_converges() {
    let cluster = spread_cluster("database.collection1", 5);
    let (first_run, _) = executor(config(&["collection1"], 0));

    let report = first_run
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded(), 5);

    let replan = Planner::default()
        .plan(&cluster, &collection1(), &ShardId::from("shardA"))
        .await
        .unwrap();
    assert!(replan.is_empty());

    let (again, _) = executor(config(&["collection1"], 0));
    let second = again
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.attempted(), 0);
    assert_eq!(second.namespaces[0].status, NamespaceStatus::Converged);
    assert_eq!(cluster.move_calls().len(), 5);
}

#[tokio::test]
async fn test_enabled_balancer_blocks_every_move() {
    let cluster = spread_cluster("database.collection1", 50).with_balancer_enabled(true);
    let (executor, reporter) = executor(config(&["collection1"], 0));

    let result = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap_err(), RunError::BalancerEnabled);
    assert!(cluster.move_calls().is_empty());
    assert_eq!(reporter.attempts(), 0);
    assert!(matches!(
        reporter.events().as_slice(),
        [MigrationEvent::RunAborted { .. }]
    ));
}

#[tokio::test]
async fn test_failed_move_does_not_stop_namespace() {
    let cluster = spread_cluster("database.collection1", 3)
        .fail_move("k1", AdminError::new("ChunkTooBig", "chunk too big to move"));
    let (executor, reporter) = executor(config(&["collection1"], 0));

    let report = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    let summary = report.namespace(&collection1()).unwrap();
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].chunk_id, ChunkId::from("k1"));

    let attempted: Vec<Option<ChunkId>> =
        cluster.move_calls().into_iter().map(|c| c.chunk_id).collect();
    assert_eq!(
        attempted,
        vec![
            Some(ChunkId::from("k0")),
            Some(ChunkId::from("k1")),
            Some(ChunkId::from("k2"))
        ]
    );
    assert_eq!(reporter.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_spaces_moves() {
    let cooldown = Duration::from_secs(60);
    let cluster = spread_cluster("database.collection1", 4);
    let (executor, _) = executor(config(&["collection1"], 60_000));

    let start = Instant::now();
    let report = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.succeeded(), 4);

    let calls = cluster.move_calls();
    assert_eq!(calls.len(), 4);
    for pair in calls.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= cooldown);
    }

    // Three waits, none after the last move
    assert!(elapsed >= cooldown * 3);
    assert!(elapsed < cooldown * 4);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_follows_failed_move() {
    let cooldown = Duration::from_secs(60);
    let cluster = spread_cluster("database.collection1", 2)
        .fail_move("k0", AdminError::new("ChunkTooBig", "chunk too big to move"));
    let (executor, _) = executor(config(&["collection1"], 60_000));

    let report = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 1);

    let calls = cluster.move_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].at.duration_since(calls[0].at) >= cooldown);
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_first_error_skips_cooldown() {
    let cluster = spread_cluster("database.collection1", 3)
        .fail_move("k0", AdminError::new("ChunkTooBig", "chunk too big to move"));
    let mut config = config(&["collection1"], 60_000);
    config.failure_policy = FailurePolicy::StopOnFirstError;
    let (executor, _) = executor(config);

    let start = Instant::now();
    let report = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.stopped_on_error);
    assert_eq!(report.namespaces[0].skipped, 2);
    assert_eq!(cluster.move_calls().len(), 1);
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_no_cooldown_between_namespaces() {
    let cluster = spread_cluster("database.collection1", 1).with_chunk(
        "database.collection2",
        "d1",
        doc! { "y": 0 },
        doc! { "y": 5 },
        "shardB",
    );
    let (executor, _) = executor(config(&["collection1", "collection2"], 60_000));

    let start = Instant::now();
    let report = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn test_one_success_one_failure() {
    let cluster = scenario_cluster().fail_move(
        "c3",
        AdminError::new("ChunkTooBig", "chunk too big to move"),
    );
    let (executor, reporter) = executor(config(&["collection1"], 0));

    let report = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.target, ShardId::from("shardA"));
    let summary = report.namespace(&collection1()).unwrap();
    assert_eq!(
        (summary.attempted, summary.succeeded, summary.failed),
        (2, 1, 1)
    );
    assert!(summary.failures[0].error.to_string().contains("ChunkTooBig"));

    let shards: Vec<(String, String)> = cluster
        .chunks_of(&collection1())
        .into_iter()
        .map(|c| (c.id.to_string(), c.shard.to_string()))
        .collect();
    assert!(shards.contains(&("c1".to_string(), "shardA".to_string())));
    assert!(shards.contains(&("c2".to_string(), "shardA".to_string())));
    assert!(shards.contains(&("c3".to_string(), "shardC".to_string())));

    let results: Vec<bool> = reporter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MigrationEvent::ChunkMoveResult { outcome, .. } => Some(outcome.is_success()),
            _ => None,
        })
        .collect();
    assert_eq!(results, vec![true, false]);
}

#[tokio::test]
async fn test_attempt_precedes_result() {
    let cluster = scenario_cluster();
    let (executor, reporter) = executor(config(&["collection1"], 0));

    executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    let sequence: Vec<(char, usize)> = reporter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MigrationEvent::ChunkMoveAttempted { index, .. } => Some(('a', index)),
            MigrationEvent::ChunkMoveResult { index, .. } => Some(('r', index)),
            _ => None,
        })
        .collect();
    assert_eq!(sequence, vec![('a', 1), ('r', 1), ('a', 2), ('r', 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_returns_partial_report() {
    let cancel = CancellationToken::new();
    let cluster = spread_cluster("database.collection1", 5).cancel_after_moves(2, cancel.clone());
    let (executor, _) = executor(config(&["collection1", "collection2"], 60_000));

    let start = Instant::now();
    let report = executor.run(&cluster, &cluster, &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.namespaces.len(), 1);
    let summary = &report.namespaces[0];
    assert_eq!(summary.status, NamespaceStatus::Cancelled);
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.skipped, 3);
    assert_eq!(cluster.move_calls().len(), 2);

    // One full cooldown after the first move, none after the second
    assert!(start.elapsed() < Duration::from_secs(120));
}

#[tokio::test]
async fn test_failures_in_one_namespace_do_not_block_the_next() {
    let cluster = scenario_cluster()
        .with_chunk("database.collection2", "d1", doc! { "y": 0 }, doc! { "y": 5 }, "shardB")
        .fail_move("c1", AdminError::no_acknowledgement("no reply from server"))
        .fail_move("c3", AdminError::new("ChunkTooBig", "chunk too big to move"));
    let (executor, _) = executor(config(&["collection1", "collection2"], 0));

    let report = executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.namespaces.len(), 2);
    assert_eq!(report.namespaces[0].failed, 2);
    assert!(report.namespaces[0].failures[0].error.is_no_acknowledgement());
    assert_eq!(report.namespaces[1].succeeded, 1);
    assert_eq!(report.failed(), 2);
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_outcome_carries_server_error() {
    let error = AdminError::new("ChunkTooBig", "chunk too big to move");
    let cluster = scenario_cluster().fail_move("c1", error.clone());
    let (executor, reporter) = executor(config(&["collection1"], 0));

    executor
        .run(&cluster, &cluster, &CancellationToken::new())
        .await
        .unwrap();

    let failed = reporter.events().into_iter().find_map(|e| match e {
        MigrationEvent::ChunkMoveResult {
            outcome: MigrationOutcome::Failed(err),
            ..
        } => Some(err),
        _ => None,
    });
    assert_eq!(failed, Some(error));
}
