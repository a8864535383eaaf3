//! MongoDB-backed cluster client
//!
//! Implements the admin, topology and inventory traits against a mongos
//! router using the official driver. Sharding metadata is read from the
//! `config` database; commands run against `admin`.

use bson::{doc, Bson, Document};
use chunkshift_core::{
    AdminError, AuthError, ChunkId, ChunkRange, Credentials, DatabaseInfo, Namespace, ShardId,
    ShardKey, TopologyError, ADMIN_DATABASE, CONFIG_DATABASE,
};
use futures::TryStreamExt;
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, Credential, FindOneOptions};
use mongodb::Client;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::admin::{ack_from_reply, AdminClient, MoveAck};
use crate::inventory::InventorySource;
use crate::topology::TopologyReader;

const APP_NAME: &str = "chunkshift";

/// Server error code for an unknown command
const COMMAND_NOT_FOUND: i32 = 59;

/// Server error code for rejected credentials
const AUTHENTICATION_FAILED: i32 = 18;

/// Cluster client over a mongos connection
pub struct MongoCluster {
    options: ClientOptions,
    /// Set once authentication succeeded
    client: RwLock<Option<Client>>,
}

impl MongoCluster {
    /// Parse the connection string; no connection is made until authentication
    pub async fn connect(uri: &str) -> Result<Self, MongoError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.app_name = Some(APP_NAME.to_string());

        Ok(Self {
            options,
            client: RwLock::new(None),
        })
    }

    fn client(&self) -> Option<Client> {
        self.client.read().clone()
    }

    fn topology_client(&self) -> Result<Client, TopologyError> {
        self.client().ok_or(TopologyError::NotAuthenticated)
    }

    fn admin_client(&self) -> Result<Client, AdminError> {
        self.client()
            .ok_or_else(|| AdminError::new("Unauthorized", "not authenticated"))
    }

    async fn balancer_enabled_from_config(&self, client: &Client) -> Result<bool, AdminError> {
        let settings = client
            .database(CONFIG_DATABASE)
            .collection::<Document>("settings")
            .find_one(doc! { "_id": "balancer" }, None)
            .await
            .map_err(admin_error)?;

        Ok(balancer_enabled_from_settings(settings.as_ref()))
    }
}

#[async_trait::async_trait]
impl AdminClient for MongoCluster {
    #[instrument(skip_all, fields(user = %credentials.username))]
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let password = credentials.password.resolve()?;

        let mut credential = Credential::default();
        credential.username = Some(credentials.username.clone());
        credential.password = Some(password);
        credential.source = Some(credentials.source.clone());

        let mut options = self.options.clone();
        options.credential = Some(credential);

        let client =
            Client::with_options(options).map_err(|e| AuthError::Connection(e.to_string()))?;

        // The handshake authenticates; ping forces one
        client
            .database(ADMIN_DATABASE)
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| auth_error(&credentials.username, e))?;

        info!("Authenticated against admin database");
        *self.client.write() = Some(client);

        Ok(())
    }

    #[instrument(skip_all)]
    async fn is_balancer_enabled(&self) -> Result<bool, AdminError> {
        let client = self.admin_client()?;

        match client
            .database(ADMIN_DATABASE)
            .run_command(doc! { "balancerStatus": 1 }, None)
            .await
        {
            Ok(reply) => balancer_enabled_from_status(&reply),
            Err(e) if command_code(&e) == Some(COMMAND_NOT_FOUND) => {
                debug!("balancerStatus unavailable, reading config.settings");
                self.balancer_enabled_from_config(&client).await
            }
            Err(e) => Err(admin_error(e)),
        }
    }

    #[instrument(skip_all, fields(namespace = %namespace, to = %to))]
    async fn move_chunk(
        &self,
        namespace: &Namespace,
        min: &ShardKey,
        max: &ShardKey,
        to: &ShardId,
    ) -> Result<MoveAck, AdminError> {
        let client = self.admin_client()?;
        let command = move_chunk_command(namespace, min, max, to);

        match client
            .database(ADMIN_DATABASE)
            .run_command(command, None)
            .await
        {
            Ok(reply) => ack_from_reply(Some(&reply)),
            Err(e) => {
                warn!(error = %e, "moveChunk returned an error");
                Err(admin_error(e))
            }
        }
    }
}

#[async_trait::async_trait]
impl TopologyReader for MongoCluster {
    #[instrument(skip(self))]
    async fn find_database(&self, name: &str) -> Result<DatabaseInfo, TopologyError> {
        let client = self.topology_client()?;

        let doc = client
            .database(CONFIG_DATABASE)
            .collection::<Document>("databases")
            .find_one(doc! { "_id": name }, None)
            .await
            .map_err(store_error)?
            .ok_or_else(|| TopologyError::DatabaseNotFound(name.to_string()))?;

        database_from_document(name, &doc)
    }

    #[instrument(skip_all, fields(namespace = %namespace, excluded = %excluded))]
    async fn list_chunks_not_on_shard(
        &self,
        namespace: &Namespace,
        excluded: &ShardId,
    ) -> Result<Vec<ChunkRange>, TopologyError> {
        let client = self.topology_client()?;
        let config = client.database(CONFIG_DATABASE);

        let uuid = config
            .collection::<Document>("collections")
            .find_one(doc! { "_id": namespace.to_string() }, None)
            .await
            .map_err(store_error)?
            .and_then(|coll| coll.get("uuid").cloned());

        let docs: Vec<Document> = config
            .collection::<Document>("chunks")
            .find(chunk_filter(namespace, excluded, uuid), None)
            .await
            .map_err(store_error)?
            .try_collect()
            .await
            .map_err(store_error)?;

        debug!(count = docs.len(), "Read eligible chunks");

        docs.iter()
            .map(|doc| chunk_from_document(namespace, doc))
            .collect()
    }
}

#[async_trait::async_trait]
impl InventorySource for MongoCluster {
    async fn list_database_names(&self) -> Result<Vec<String>, TopologyError> {
        self.topology_client()?
            .list_database_names(None, None)
            .await
            .map_err(store_error)
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, TopologyError> {
        self.topology_client()?
            .database(database)
            .list_collection_names(None)
            .await
            .map_err(store_error)
    }

    async fn count_documents(&self, database: &str, collection: &str) -> Result<u64, TopologyError> {
        self.topology_client()?
            .database(database)
            .collection::<Document>(collection)
            .estimated_document_count(None)
            .await
            .map_err(store_error)
    }

    async fn latest_document(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Option<Document>, TopologyError> {
        let mut options = FindOneOptions::default();
        options.sort = Some(doc! { "$natural": -1 });

        self.topology_client()?
            .database(database)
            .collection::<Document>(collection)
            .find_one(None, options)
            .await
            .map_err(store_error)
    }
}

/// `moveChunk` admin command for one range
pub fn move_chunk_command(
    namespace: &Namespace,
    min: &ShardKey,
    max: &ShardKey,
    to: &ShardId,
) -> Document {
    let bounds = vec![
        Bson::Document(min.as_document().clone()),
        Bson::Document(max.as_document().clone()),
    ];

    doc! {
        "moveChunk": namespace.to_string(),
        "bounds": bounds,
        "to": to.as_str(),
    }
}

/// Filter selecting a namespace's chunks not owned by `excluded`
///
/// Newer servers key chunk documents by collection uuid instead of `ns`.
pub fn chunk_filter(namespace: &Namespace, excluded: &ShardId, uuid: Option<Bson>) -> Document {
    let owner = doc! { "$ne": excluded.as_str() };

    match uuid {
        Some(uuid) => doc! {
            "$or": [
                { "ns": namespace.to_string() },
                { "uuid": uuid },
            ],
            "shard": owner,
        },
        None => doc! {
            "ns": namespace.to_string(),
            "shard": owner,
        },
    }
}

/// Parse a `config.chunks` document
pub fn chunk_from_document(namespace: &Namespace, doc: &Document) -> Result<ChunkRange, TopologyError> {
    let id = match doc.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => return Err(TopologyError::Malformed("chunk without _id".to_string())),
    };

    let field = |name: &str| {
        doc.get_document(name)
            .map(|d| ShardKey::new(d.clone()))
            .map_err(|_| TopologyError::Malformed(format!("chunk {} has no {} bound", id, name)))
    };
    let min = field("min")?;
    let max = field("max")?;

    let shard = doc
        .get_str("shard")
        .map_err(|_| TopologyError::Malformed(format!("chunk {} has no shard", id)))?;

    Ok(ChunkRange {
        id: ChunkId::new(id),
        namespace: namespace.clone(),
        min,
        max,
        shard: ShardId::from(shard),
    })
}

/// Parse a `config.databases` document
///
/// Servers that no longer record `partitioned` treat every database as
/// shardable, so a missing flag counts as partitioned.
pub fn database_from_document(name: &str, doc: &Document) -> Result<DatabaseInfo, TopologyError> {
    let partitioned = match doc.get("partitioned") {
        None => true,
        Some(Bson::Boolean(flag)) => *flag,
        Some(other) => {
            return Err(TopologyError::Malformed(format!(
                "database {} has non-boolean partitioned flag {}",
                name, other
            )))
        }
    };

    let primary = doc
        .get_str("primary")
        .ok()
        .filter(|p| !p.is_empty())
        .map(ShardId::from);

    Ok(DatabaseInfo {
        name: name.to_string(),
        partitioned,
        primary,
    })
}

/// Read `mode` from a `balancerStatus` reply
pub fn balancer_enabled_from_status(reply: &Document) -> Result<bool, AdminError> {
    reply
        .get_str("mode")
        .map(|mode| mode != "off")
        .map_err(|_| AdminError::new("UnexpectedReply", format!("balancerStatus: {}", reply)))
}

/// Read the legacy `config.settings` balancer document
///
/// The balancer runs unless it has been explicitly stopped.
pub fn balancer_enabled_from_settings(settings: Option<&Document>) -> bool {
    match settings {
        None => true,
        Some(doc) => !matches!(doc.get("stopped"), Some(Bson::Boolean(true))),
    }
}

fn command_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) => Some(cmd.code),
        _ => None,
    }
}

fn admin_error(err: MongoError) -> AdminError {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) => {
            let code = if cmd.code_name.is_empty() {
                cmd.code.to_string()
            } else {
                cmd.code_name.clone()
            };
            AdminError::new(code, cmd.message.clone())
        }
        _ => AdminError::no_acknowledgement(err.to_string()),
    }
}

fn auth_error(user: &str, err: MongoError) -> AuthError {
    match err.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => AuthError::Rejected {
            user: user.to_string(),
            message: message.clone(),
        },
        ErrorKind::Command(cmd) if cmd.code == AUTHENTICATION_FAILED => AuthError::Rejected {
            user: user.to_string(),
            message: cmd.message.clone(),
        },
        _ => AuthError::Connection(err.to_string()),
    }
}

fn store_error(err: MongoError) -> TopologyError {
    TopologyError::Store(err.to_string())
}
