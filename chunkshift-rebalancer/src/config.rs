//! Drain configuration
//!
//! Loaded from a TOML file, then overridden from `CHUNKSHIFT_*` environment
//! variables and finally from the command line. Every setting except
//! `credentials` has an environment override named after it, e.g.
//! `CHUNKSHIFT_MAX_MOVES_PER_NAMESPACE`.
//!
//! Config file format:
//! ```toml
//! uri = "mongodb://mongos.example.com:27017"
//! database = "database"
//! collections = ["collection1", "collection2"]
//! cooldown_ms = 60000
//!
//! [credentials]
//! username = "clusteradmin"
//! password = { env = "CHUNKSHIFT_ADMIN_PASSWORD" }
//! ```

use chunkshift_core::{Credentials, Namespace, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Invalid config file: {0}")]
    Parse(String),

    #[error("Missing required setting: {0}")]
    MissingField(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// What to do after a chunk move fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure and keep draining
    #[default]
    Continue,
    /// End the run after the first failed move
    StopOnFirstError,
}

/// Drain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Connection string of a mongos router
    pub uri: String,

    /// Database whose collections are drained
    pub database: String,

    /// Collections to drain, processed in this order
    pub collections: Vec<String>,

    /// User with the clusterAdmin role
    pub credentials: Option<Credentials>,

    /// Pause between two consecutive chunk moves in milliseconds
    pub cooldown_ms: u64,

    /// Shard to drain onto; defaults to the database's primary shard
    pub target_shard: Option<String>,

    pub failure_policy: FailurePolicy,

    /// Plan and report without moving anything
    pub dry_run: bool,

    /// Upper bound on moves per collection in one run
    pub max_moves_per_namespace: Option<usize>,

    /// Log a read-only inventory of the cluster before draining
    pub snapshot_before_run: bool,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: String::new(),
            collections: Vec::new(),
            credentials: None,
            cooldown_ms: 60_000,
            target_shard: None,
            failure_policy: FailurePolicy::Continue,
            dry_run: false,
            max_moves_per_namespace: None,
            snapshot_before_run: false,
        }
    }
}

impl DrainConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from `CHUNKSHIFT_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("CHUNKSHIFT_URI") {
            self.uri = uri;
        }

        if let Some(database) = lookup("CHUNKSHIFT_DATABASE") {
            self.database = database;
        }

        if let Some(collections) = lookup("CHUNKSHIFT_COLLECTIONS") {
            self.collections = collections
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }

        if let Some(cooldown) = lookup("CHUNKSHIFT_COOLDOWN_MS") {
            self.cooldown_ms = cooldown.parse().map_err(|_| {
                ConfigError::InvalidValue("CHUNKSHIFT_COOLDOWN_MS".to_string(), cooldown.clone())
            })?;
        }

        if let Some(target) = lookup("CHUNKSHIFT_TARGET_SHARD") {
            self.target_shard = Some(target);
        }

        if let Some(dry_run) = lookup("CHUNKSHIFT_DRY_RUN") {
            self.dry_run = parse_flag(&dry_run);
        }

        if let Some(policy) = lookup("CHUNKSHIFT_FAILURE_POLICY") {
            self.failure_policy = match policy.as_str() {
                "continue" => FailurePolicy::Continue,
                "stop-on-first-error" => FailurePolicy::StopOnFirstError,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "CHUNKSHIFT_FAILURE_POLICY".to_string(),
                        policy,
                    ))
                }
            };
        }

        if let Some(max_moves) = lookup("CHUNKSHIFT_MAX_MOVES_PER_NAMESPACE") {
            let parsed = max_moves.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "CHUNKSHIFT_MAX_MOVES_PER_NAMESPACE".to_string(),
                    max_moves.clone(),
                )
            })?;
            self.max_moves_per_namespace = Some(parsed);
        }

        if let Some(snapshot) = lookup("CHUNKSHIFT_SNAPSHOT_BEFORE_RUN") {
            self.snapshot_before_run = parse_flag(&snapshot);
        }

        Ok(())
    }

    /// Check that every required setting is present and well formed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uri.trim().is_empty() {
            return Err(ConfigError::MissingField("uri".to_string()));
        }

        if self.database.is_empty() {
            return Err(ConfigError::MissingField("database".to_string()));
        }
        if let Some(c) = self
            .database
            .chars()
            .find(|c| matches!(c, '/' | '\\' | '.' | '"' | '$' | ' ' | '\0'))
        {
            return Err(ConfigError::InvalidValue(
                "database".to_string(),
                format!("'{}' contains forbidden character {:?}", self.database, c),
            ));
        }

        if self.collections.is_empty() {
            return Err(ConfigError::MissingField("collections".to_string()));
        }
        let mut seen = HashSet::new();
        for collection in &self.collections {
            if collection.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "collections".to_string(),
                    "empty collection name".to_string(),
                ));
            }
            if !seen.insert(collection.as_str()) {
                return Err(ConfigError::InvalidValue(
                    "collections".to_string(),
                    format!("'{}' listed twice", collection),
                ));
            }
        }

        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("credentials".to_string()))?;
        if credentials.username.trim().is_empty() {
            return Err(ConfigError::MissingField("credentials.username".to_string()));
        }
        if credentials.password.is_empty() {
            return Err(ConfigError::MissingField("credentials.password".to_string()));
        }

        if let Some(target) = &self.target_shard {
            if target.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "target_shard".to_string(),
                    "empty shard id".to_string(),
                ));
            }
        }

        if self.max_moves_per_namespace == Some(0) {
            return Err(ConfigError::InvalidValue(
                "max_moves_per_namespace".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Namespaces to drain, in configured order
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.collections
            .iter()
            .map(|c| Namespace::new(self.database.clone(), c.clone()))
            .collect()
    }

    /// Get cooldown as Duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Explicit target shard, if configured
    pub fn target_override(&self) -> Option<ShardId> {
        self.target_shard.as_deref().map(ShardId::from)
    }
}

fn parse_flag(value: &str) -> bool {
    value == "true" || value == "1"
}
