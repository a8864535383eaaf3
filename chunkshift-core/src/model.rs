//! Partition model
//!
//! Types describing how a sharded collection is split into chunk ranges and
//! which shard owns each range. The cluster's config servers own this state;
//! these types are read-only snapshots of it.

use bson::Document;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TopologyError;

/// Fully qualified collection name: `database.collection`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Create a namespace from its two parts
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parse `database.collection`
    ///
    /// The database name ends at the first dot; collection names may contain dots.
    pub fn parse(s: &str) -> Result<Self, TopologyError> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(TopologyError::InvalidNamespace(s.to_string())),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Identifier of a shard (replica set name as registered with the cluster)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a chunk document in the metadata store
///
/// Depending on the server version this is an ObjectId or a
/// `namespace-minKey` string; it is kept as its display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Shard key boundary value
///
/// Opaque: the document is passed back to the cluster exactly as it was
/// read, its fields are never interpreted here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(Document);

impl ShardKey {
    pub fn new(doc: Document) -> Self {
        Self(doc)
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }
}

impl From<Document> for ShardKey {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous range `[min, max)` of a namespace's key space and its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub id: ChunkId,
    pub namespace: Namespace,
    pub min: ShardKey,
    pub max: ShardKey,
    /// Shard currently owning the range
    pub shard: ShardId,
}

impl ChunkRange {
    /// Whether this range already lives on `shard`
    pub fn is_on(&self, shard: &ShardId) -> bool {
        &self.shard == shard
    }
}

/// Sharding metadata of one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    /// Sharding has been enabled for the database
    pub partitioned: bool,
    /// Primary shard, absent if the cluster never assigned one
    pub primary: Option<ShardId>,
}
