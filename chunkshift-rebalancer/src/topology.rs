//! Partition metadata interface
//!
//! Read access to the cluster's sharding metadata. Every call reflects the
//! store at call time; nothing is cached between calls.

use chunkshift_core::{ChunkRange, DatabaseInfo, Namespace, ShardId, TopologyError};

/// Topology reader trait for dependency injection
#[async_trait::async_trait]
pub trait TopologyReader: Send + Sync {
    /// Sharding metadata of a database
    ///
    /// Fails with [`TopologyError::DatabaseNotFound`] when the cluster has no
    /// record of it; a database that exists but is not sharded is returned
    /// with `partitioned == false`.
    async fn find_database(&self, name: &str) -> Result<DatabaseInfo, TopologyError>;

    /// Every chunk of `namespace` not currently owned by `excluded`
    ///
    /// The order is whatever the store returns; it is stable within one call
    /// but not across calls.
    async fn list_chunks_not_on_shard(
        &self,
        namespace: &Namespace,
        excluded: &ShardId,
    ) -> Result<Vec<ChunkRange>, TopologyError>;
}
