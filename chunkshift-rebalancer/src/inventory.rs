//! Cluster inventory report
//!
//! Read-only listing of every database and collection with its document
//! count and most recently inserted document. Used as an optional snapshot
//! before a drain and by the `report` command.

use bson::Document;
use chunkshift_core::TopologyError;
use serde::Serialize;
use std::fmt;
use tracing::{debug, instrument};

/// Databases left out of the report
const SKIPPED_DATABASES: &[&str] = &["local"];

/// Collections listed but not counted
const SKIPPED_COLLECTIONS: &[&str] = &["system.indexes", "system.profile"];

/// Read access needed to build an inventory
#[async_trait::async_trait]
pub trait InventorySource: Send + Sync {
    async fn list_database_names(&self) -> Result<Vec<String>, TopologyError>;

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, TopologyError>;

    async fn count_documents(&self, database: &str, collection: &str) -> Result<u64, TopologyError>;

    /// Last document in natural (insertion) order
    async fn latest_document(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Option<Document>, TopologyError>;
}

/// One collection's entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInventory {
    pub name: String,
    pub count: u64,
    pub latest: Option<Document>,
}

/// One database's entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseInventory {
    pub name: String,
    /// Every collection name, including skipped system collections
    pub collection_names: Vec<String>,
    pub collections: Vec<CollectionInventory>,
}

/// Inventory of the whole cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InventoryReport {
    pub databases: Vec<DatabaseInventory>,
}

impl InventoryReport {
    pub fn database(&self, name: &str) -> Option<&DatabaseInventory> {
        self.databases.iter().find(|d| d.name == name)
    }

    /// Total documents across every counted collection
    pub fn total_documents(&self) -> u64 {
        self.databases
            .iter()
            .flat_map(|d| d.collections.iter())
            .map(|c| c.count)
            .sum()
    }
}

impl fmt::Display for InventoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.databases.iter().map(|d| d.name.as_str()).collect();
        writeln!(f, "Databases: {:?}", names)?;

        for db in &self.databases {
            writeln!(f)?;
            writeln!(f, "Database: {}", db.name)?;
            writeln!(f, "Collections: {:?}", db.collection_names)?;
            for coll in &db.collections {
                writeln!(f, "Collection: {}", coll.name)?;
                writeln!(f, "Record count: {}", coll.count)?;
                if let Some(latest) = &coll.latest {
                    writeln!(f, "{}", latest)?;
                }
            }
        }

        Ok(())
    }
}

/// Build an inventory of every database except `local`
#[instrument(skip_all)]
pub async fn collect_inventory<S>(source: &S) -> Result<InventoryReport, TopologyError>
where
    S: InventorySource + ?Sized,
{
    let mut names: Vec<String> = source
        .list_database_names()
        .await?
        .into_iter()
        .filter(|name| !SKIPPED_DATABASES.contains(&name.as_str()))
        .collect();
    names.sort();

    let mut report = InventoryReport::default();

    for name in names {
        let mut collection_names = source.list_collection_names(&name).await?;
        collection_names.sort();

        let mut collections = Vec::new();
        for coll in &collection_names {
            if SKIPPED_COLLECTIONS.contains(&coll.as_str()) {
                continue;
            }

            let count = source.count_documents(&name, coll).await?;
            let latest = if count > 0 {
                source.latest_document(&name, coll).await?
            } else {
                None
            };

            debug!(database = %name, collection = %coll, count, "Collection counted");
            collections.push(CollectionInventory {
                name: coll.clone(),
                count,
                latest,
            });
        }

        report.databases.push(DatabaseInventory {
            name,
            collection_names,
            collections,
        });
    }

    Ok(report)
}
