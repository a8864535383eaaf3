//! Chunkshift
//!
//! Drains every chunk of the configured collections onto one shard:
//! - Refuses to run while the balancer is enabled
//! - Moves one chunk at a time with a cooldown between moves
//! - Keeps going when a single chunk fails to move
//!
//! Also prints a read-only inventory of the cluster's databases.

use anyhow::Context;
use chunkshift_core::{Credentials, SecretRef};
use chunkshift_rebalancer::{
    collect_inventory, AdminClient, ChannelReporter, DrainConfig, Executor, FailurePolicy,
    FanoutReporter, MigrationEvent, MongoCluster, TracingReporter,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chunkshift")]
#[command(about = "Drain sharded collection chunks onto a single shard")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Move every chunk not on the target shard onto it
    Drain {
        /// Configuration file path
        #[arg(short, long, default_value = "chunkshift.toml")]
        config: PathBuf,

        /// Plan and report without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Target shard (defaults to the database's primary shard)
        #[arg(long)]
        target_shard: Option<String>,

        /// Pause between chunk moves in milliseconds
        #[arg(long)]
        cooldown_ms: Option<u64>,

        /// End the run at the first chunk that fails to move
        #[arg(long)]
        stop_on_first_error: bool,

        /// Log a cluster inventory before draining
        #[arg(long)]
        snapshot: bool,
    },

    /// Print every database and collection with counts and latest document
    Report {
        /// Connection string of a mongos router
        #[arg(long, env = "CHUNKSHIFT_URI", default_value = "mongodb://localhost:27017")]
        uri: String,

        /// Admin user
        #[arg(long, env = "CHUNKSHIFT_USERNAME")]
        username: String,

        /// Environment variable holding the admin password
        #[arg(long, default_value = "CHUNKSHIFT_ADMIN_PASSWORD")]
        password_env: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Drain {
            config,
            dry_run,
            target_shard,
            cooldown_ms,
            stop_on_first_error,
            snapshot,
        } => {
            let mut config = DrainConfig::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            config.apply_env_overrides()?;

            if dry_run {
                config.dry_run = true;
            }
            if let Some(target) = target_shard {
                config.target_shard = Some(target);
            }
            if let Some(cooldown) = cooldown_ms {
                config.cooldown_ms = cooldown;
            }
            if stop_on_first_error {
                config.failure_policy = FailurePolicy::StopOnFirstError;
            }
            if snapshot {
                config.snapshot_before_run = true;
            }

            drain(config).await
        }
        Command::Report {
            uri,
            username,
            password_env,
            json,
        } => report(&uri, Credentials::new(username, SecretRef::Env(password_env)), json).await,
    }
}

async fn drain(config: DrainConfig) -> anyhow::Result<()> {
    config.validate()?;

    info!(
        database = %config.database,
        collections = ?config.collections,
        cooldown_ms = config.cooldown_ms,
        dry_run = config.dry_run,
        "Starting chunkshift drain"
    );

    let cluster = MongoCluster::connect(&config.uri)
        .await
        .context("parsing connection string")?;

    if config.snapshot_before_run {
        log_snapshot(&cluster, &config).await;
    }

    let (channel, mut progress_rx) = ChannelReporter::new(100);
    let mut reporter = FanoutReporter::default();
    reporter.push(Arc::new(TracingReporter));
    reporter.push(Arc::new(channel));

    // Spawn progress reporter
    tokio::spawn(async move {
        let mut moved = 0usize;
        let mut failed = 0usize;
        while let Some(event) = progress_rx.recv().await {
            if let MigrationEvent::ChunkMoveResult { outcome, index, .. } = event {
                if outcome.is_success() {
                    moved += 1;
                } else {
                    failed += 1;
                }
                info!(index, moved, failed, "Drain progress");
            }
        }
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            shutdown.cancel();
        }
    });

    let executor = Executor::new(config, Arc::new(reporter));
    let report = executor.run(&cluster, &cluster, &cancel).await?;

    for summary in &report.namespaces {
        info!(summary = %summary.summary(), "Namespace result");
        for failure in &summary.failures {
            error!(
                chunk_id = %failure.chunk_id,
                source = %failure.source,
                error = %failure.error,
                "Chunk left in place"
            );
        }
    }
    info!(summary = %report.summary(), "Drain complete");

    if report.has_failures() {
        warn!("Some chunks were not moved; run again to retry them");
    }

    Ok(())
}

/// Log an inventory of the cluster; failures only produce a warning
async fn log_snapshot(cluster: &MongoCluster, config: &DrainConfig) {
    let Some(credentials) = config.credentials.as_ref() else {
        return;
    };

    if let Err(e) = cluster.authenticate(credentials).await {
        warn!(error = %e, "Skipping pre-run snapshot");
        return;
    }

    match collect_inventory(cluster).await {
        Ok(inventory) => info!(
            databases = inventory.databases.len(),
            documents = inventory.total_documents(),
            "Pre-run snapshot\n{}",
            inventory
        ),
        Err(e) => warn!(error = %e, "Pre-run snapshot failed"),
    }
}

async fn report(uri: &str, credentials: Credentials, json: bool) -> anyhow::Result<()> {
    let cluster = MongoCluster::connect(uri)
        .await
        .context("parsing connection string")?;
    cluster.authenticate(&credentials).await?;

    let inventory = collect_inventory(&cluster).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
    } else {
        print!("{}", inventory);
    }

    Ok(())
}
