//! Connection Manager
//!
//! Opens the shared session and bootstraps the system collections. Opening
//! the session is fatal on failure; bootstrap is best-effort, and every step
//! runs even if an earlier one failed.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::db::schemas::IntoIndexes;
use crate::db::{CollectionSpec, CreateOutcome, KeyValueRecord, MongoBackend, Session};
use crate::types::{Result, StoreError};

/// Outcome of one bootstrap step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// What bootstrap did to each system structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub queue_collection: StepOutcome,
    pub kv_collection: StepOutcome,
    pub kv_indexes: Vec<StepOutcome>,
}

impl BootstrapReport {
    /// True when no step failed
    pub fn is_clean(&self) -> bool {
        !self.queue_collection.is_failed()
            && !self.kv_collection.is_failed()
            && !self.kv_indexes.iter().any(StepOutcome::is_failed)
    }
}

pub struct ConnectionManager {
    config: StoreConfig,
}

impl ConnectionManager {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Connect to MongoDB
    pub async fn open_session(&self) -> Result<Session> {
        self.config.validate().map_err(StoreError::Validation)?;
        let backend = MongoBackend::connect(&self.config).await?;
        info!(db = %backend.db_name(), "MongoDB session established");
        Ok(Arc::new(backend))
    }

    /// Create the bounded queue log, the KV collection and its index
    pub async fn bootstrap(&self, session: &Session) -> BootstrapReport {
        let queue_collection = step(
            &self.config.queue_collection,
            session
                .create_collection(
                    &self.config.queue_collection,
                    CollectionSpec::capped(self.config.queue_max_bytes),
                )
                .await,
        );

        let kv_collection = step(
            &self.config.kv_collection,
            session
                .create_collection(&self.config.kv_collection, CollectionSpec::unbounded())
                .await,
        );

        let mut kv_indexes = Vec::new();
        for index in KeyValueRecord::into_indices() {
            let label = format!("{}.{}", self.config.kv_collection, index.name);
            let outcome = session.create_index(&self.config.kv_collection, index).await;
            kv_indexes.push(step(&label, outcome));
        }

        let report = BootstrapReport {
            queue_collection,
            kv_collection,
            kv_indexes,
        };
        if report.is_clean() {
            info!(backend = session.name(), "Datastore bootstrap complete");
        } else {
            warn!(backend = session.name(), "Datastore bootstrap finished with failures");
        }
        report
    }
}

fn step(structure: &str, result: Result<CreateOutcome>) -> StepOutcome {
    match result {
        Ok(CreateOutcome::Created) => {
            debug!(structure, "created");
            StepOutcome::Created
        }
        Ok(CreateOutcome::AlreadyExists) => {
            debug!(structure, "already exists");
            StepOutcome::AlreadyExists
        }
        Err(e) => {
            warn!(structure, "Bootstrap step failed: {}", e);
            StepOutcome::Failed(e.to_string())
        }
    }
}
