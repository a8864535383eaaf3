//! Chunkshift Rebalancer Library
//!
//! Drains every chunk of one or more sharded collections onto a single
//! designated shard, one chunk at a time:
//! - Precondition checks (authentication, balancer stopped, database sharded)
//! - Planning (chunks not yet on the target shard)
//! - Paced, sequential execution with a per-chunk failure policy
//! - Progress events and a per-namespace run summary
//!
//! A read-only inventory report of the cluster's databases is also provided.

pub mod admin;
pub mod config;
pub mod executor;
pub mod inventory;
pub mod memory;
pub mod mongo_client;
pub mod planner;
pub mod reporter;
pub mod topology;

// Re-export main types
pub use admin::{AdminClient, MoveAck};
pub use config::{ConfigError, DrainConfig, FailurePolicy};
pub use executor::{
    ChunkFailure, Executor, MigrationOutcome, NamespaceStatus, NamespaceSummary, RunError,
    RunReport,
};
pub use inventory::{collect_inventory, InventoryReport, InventorySource};
pub use memory::InMemoryCluster;
pub use mongo_client::MongoCluster;
pub use planner::{MigrationPlan, MigrationTask, Planner, PlannerConfig};
pub use reporter::{
    ChannelReporter, FanoutReporter, MemoryReporter, MigrationEvent, Reporter, TracingReporter,
};
pub use topology::TopologyReader;
