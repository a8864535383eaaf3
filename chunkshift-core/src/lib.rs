//! Chunkshift Core Library
//!
//! Core abstractions shared by the chunkshift crates:
//! - Partition model of a sharded cluster (namespaces, shards, chunk ranges)
//! - Opaque admin credentials
//! - Error types for the admin and topology interfaces

pub mod credentials;
pub mod error;
pub mod model;

pub use credentials::{Credentials, SecretRef};
pub use error::{AdminError, AuthError, TopologyError};
pub use model::{ChunkId, ChunkRange, DatabaseInfo, Namespace, ShardId, ShardKey};

/// Database that holds cluster administration commands
pub const ADMIN_DATABASE: &str = "admin";

/// Database that holds the sharding metadata (`databases`, `chunks`, ...)
pub const CONFIG_DATABASE: &str = "config";
