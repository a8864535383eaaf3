//! In-memory cluster
//!
//! A self-contained stand-in for a sharded cluster: a chunk table, database
//! metadata and balancer state behind a mutex. Moves mutate the table the
//! way the real config servers would. Failures can be scripted per chunk.

use bson::Document;
use chunkshift_core::{
    AdminError, AuthError, ChunkId, ChunkRange, Credentials, DatabaseInfo, Namespace, ShardId,
    ShardKey, TopologyError,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::admin::{AdminClient, MoveAck};
use crate::inventory::InventorySource;
use crate::topology::TopologyReader;

/// A recorded `move_chunk` call
#[derive(Debug, Clone)]
pub struct MoveCall {
    pub namespace: Namespace,
    /// Chunk matched by the bounds, if any
    pub chunk_id: Option<ChunkId>,
    pub target: ShardId,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    databases: HashMap<String, DatabaseInfo>,
    chunks: Vec<ChunkRange>,
    balancer_enabled: bool,
    balancer_error: Option<AdminError>,
    accepted_user: Option<String>,
    move_failures: HashMap<ChunkId, AdminError>,
    listing_failures: HashSet<Namespace>,
    documents: BTreeMap<String, BTreeMap<String, Vec<Document>>>,
    cancel_after: Option<(usize, CancellationToken)>,
    auth_calls: usize,
    balancer_queries: usize,
    move_calls: Vec<MoveCall>,
}

/// In-memory cluster implementing every client interface
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database
    pub fn with_database(self, name: &str, partitioned: bool, primary: Option<&str>) -> Self {
        self.state.lock().databases.insert(
            name.to_string(),
            DatabaseInfo {
                name: name.to_string(),
                partitioned,
                primary: primary.map(ShardId::from),
            },
        );
        self
    }

    /// Add a chunk `[min, max)` of `namespace` owned by `shard`
    ///
    /// # Panics
    ///
    /// Panics if `namespace` is not `database.collection`.
    pub fn with_chunk(
        self,
        namespace: &str,
        id: &str,
        min: Document,
        max: Document,
        shard: &str,
    ) -> Self {
        let namespace = Namespace::parse(namespace).expect("namespace must be db.collection");
        self.state.lock().chunks.push(ChunkRange {
            id: ChunkId::from(id),
            namespace,
            min: ShardKey::new(min),
            max: ShardKey::new(max),
            shard: ShardId::from(shard),
        });
        self
    }

    /// Documents of a collection, oldest first, for inventory reads
    pub fn with_documents(self, database: &str, collection: &str, docs: Vec<Document>) -> Self {
        self.state
            .lock()
            .documents
            .entry(database.to_string())
            .or_default()
            .insert(collection.to_string(), docs);
        self
    }

    pub fn with_balancer_enabled(self, enabled: bool) -> Self {
        self.set_balancer_enabled(enabled);
        self
    }

    /// Reject every user except `user`
    pub fn accept_only_user(self, user: &str) -> Self {
        self.state.lock().accepted_user = Some(user.to_string());
        self
    }

    /// Make balancer state queries fail
    pub fn fail_balancer_query(self, error: AdminError) -> Self {
        self.state.lock().balancer_error = Some(error);
        self
    }

    /// Make every move of chunk `id` fail with `error`
    pub fn fail_move(self, id: &str, error: AdminError) -> Self {
        self.state
            .lock()
            .move_failures
            .insert(ChunkId::from(id), error);
        self
    }

    /// Make chunk listing for `namespace` fail
    ///
    /// # Panics
    ///
    /// Panics if `namespace` is not `database.collection`.
    pub fn fail_listing(self, namespace: &str) -> Self {
        let namespace = Namespace::parse(namespace).expect("namespace must be db.collection");
        self.state.lock().listing_failures.insert(namespace);
        self
    }

    /// Cancel `token` once `moves` move calls have returned
    pub fn cancel_after_moves(self, moves: usize, token: CancellationToken) -> Self {
        self.state.lock().cancel_after = Some((moves, token));
        self
    }

    pub fn set_balancer_enabled(&self, enabled: bool) {
        self.state.lock().balancer_enabled = enabled;
    }

    /// Every move call so far, in order
    pub fn move_calls(&self) -> Vec<MoveCall> {
        self.state.lock().move_calls.clone()
    }

    pub fn auth_calls(&self) -> usize {
        self.state.lock().auth_calls
    }

    pub fn balancer_queries(&self) -> usize {
        self.state.lock().balancer_queries
    }

    /// Current chunks of a namespace
    pub fn chunks_of(&self, namespace: &Namespace) -> Vec<ChunkRange> {
        self.state
            .lock()
            .chunks
            .iter()
            .filter(|c| &c.namespace == namespace)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl AdminClient for InMemoryCluster {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let mut state = self.state.lock();
        state.auth_calls += 1;

        match &state.accepted_user {
            Some(user) if user != &credentials.username => Err(AuthError::Rejected {
                user: credentials.username.clone(),
                message: "Authentication failed.".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn is_balancer_enabled(&self) -> Result<bool, AdminError> {
        let mut state = self.state.lock();
        state.balancer_queries += 1;

        match &state.balancer_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.balancer_enabled),
        }
    }

    async fn move_chunk(
        &self,
        namespace: &Namespace,
        min: &ShardKey,
        max: &ShardKey,
        to: &ShardId,
    ) -> Result<MoveAck, AdminError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let position = state
            .chunks
            .iter()
            .position(|c| &c.namespace == namespace && &c.min == min && &c.max == max);
        let chunk_id = position.map(|i| state.chunks[i].id.clone());

        state.move_calls.push(MoveCall {
            namespace: namespace.clone(),
            chunk_id: chunk_id.clone(),
            target: to.clone(),
            at: Instant::now(),
        });

        let result = match (position, chunk_id) {
            (Some(i), Some(id)) => match state.move_failures.get(&id) {
                Some(error) => Err(error.clone()),
                None => {
                    state.chunks[i].shard = to.clone();
                    Ok(MoveAck { millis: Some(0) })
                }
            },
            _ => Err(AdminError::new(
                "ChunkRangeNotFound",
                format!("no chunk of {} with bounds [{}, {})", namespace, min, max),
            )),
        };

        if let Some((moves, token)) = &state.cancel_after {
            if state.move_calls.len() >= *moves {
                token.cancel();
            }
        }

        result
    }
}

#[async_trait::async_trait]
impl TopologyReader for InMemoryCluster {
    async fn find_database(&self, name: &str) -> Result<DatabaseInfo, TopologyError> {
        self.state
            .lock()
            .databases
            .get(name)
            .cloned()
            .ok_or_else(|| TopologyError::DatabaseNotFound(name.to_string()))
    }

    async fn list_chunks_not_on_shard(
        &self,
        namespace: &Namespace,
        excluded: &ShardId,
    ) -> Result<Vec<ChunkRange>, TopologyError> {
        let state = self.state.lock();

        if state.listing_failures.contains(namespace) {
            return Err(TopologyError::Store(format!(
                "chunk listing for {} unavailable",
                namespace
            )));
        }

        Ok(state
            .chunks
            .iter()
            .filter(|c| &c.namespace == namespace && !c.is_on(excluded))
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl InventorySource for InMemoryCluster {
    async fn list_database_names(&self) -> Result<Vec<String>, TopologyError> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .databases
            .keys()
            .chain(state.documents.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, TopologyError> {
        let state = self.state.lock();
        let mut names: HashSet<String> = state
            .documents
            .get(database)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default();
        names.extend(
            state
                .chunks
                .iter()
                .filter(|c| c.namespace.database() == database)
                .map(|c| c.namespace.collection().to_string()),
        );
        Ok(names.into_iter().collect())
    }

    async fn count_documents(&self, database: &str, collection: &str) -> Result<u64, TopologyError> {
        Ok(self
            .state
            .lock()
            .documents
            .get(database)
            .and_then(|colls| colls.get(collection))
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn latest_document(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Option<Document>, TopologyError> {
        Ok(self
            .state
            .lock()
            .documents
            .get(database)
            .and_then(|colls| colls.get(collection))
            .and_then(|docs| docs.last().cloned()))
    }
}
