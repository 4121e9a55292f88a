//! # Persistence
//!
//! Durable storage for the engine state, built on sled's embedded
//! key-value store. The whole state value — config, tables, indexes — is
//! encoded with bincode and written as one snapshot per committed
//! operation, so a crash can never expose a half-applied operation: the
//! last snapshot on disk is always the state after some complete
//! operation.

use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::lifecycle::EngineState;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Key under which the state snapshot lives.
const STATE_KEY: &[u8] = b"state";

/// Handle to the engine's on-disk keyspace.
#[derive(Debug, Clone)]
pub struct EngineDb {
    #[allow(dead_code)]
    db: Db,
    tree: Tree,
}

impl EngineDb {
    /// Opens (or creates) a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Opens a temporary database that vanishes on drop. For tests.
    pub fn open_temporary() -> Result<Self, DbError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, DbError> {
        let tree = db.open_tree("engine")?;
        Ok(Self { db, tree })
    }

    /// Loads the last persisted state snapshot, if one exists.
    pub fn load(&self) -> Result<Option<EngineState>, DbError> {
        match self.tree.get(STATE_KEY)? {
            Some(bytes) => {
                let state = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Encoding(e.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Persists a state snapshot, flushing it to disk before returning.
    pub fn save(&self, state: &EngineState) -> Result<(), DbError> {
        let bytes =
            bincode::serialize(state).map_err(|e| DbError::Encoding(e.to_string()))?;
        debug!(bytes = bytes.len(), "persisting engine state");
        self.tree.insert(STATE_KEY, bytes)?;
        self.tree.flush()?;
        Ok(())
    }
}
