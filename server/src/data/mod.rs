//! Data storage layer
//!
//! - `sqlite` - Default persistent backend
//! - `memory` - Ephemeral backend for tests and throwaway runs
//! - `types` - Shared data types across backends
//! - `traits` - `TraceRepository`, the backend-agnostic interface
//! - `error` - Unified error type for all backends

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use error::DataError;
pub use memory::MemoryStore;
pub use sqlite::SqliteService;
pub use traits::TraceRepository;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::StorageBackendType;
use crate::core::storage::AppStorage;

/// Storage service enum
///
/// Wraps the backend selected by configuration. Services are stored as Arc
/// so repository handles can be cloned out cheaply.
pub enum StorageService {
    /// SQLite backend (default, embedded)
    Sqlite(Arc<SqliteService>),
    /// In-memory backend
    Memory(Arc<MemoryStore>),
}

impl StorageService {
    /// Initialize the storage service based on configuration
    pub async fn init(backend: StorageBackendType, storage: &AppStorage) -> Result<Self, DataError> {
        match backend {
            StorageBackendType::Sqlite => {
                let service = SqliteService::init(storage).await?;
                Ok(Self::Sqlite(Arc::new(service)))
            }
            StorageBackendType::Memory => {
                tracing::debug!("Using in-memory storage, data will not survive a restart");
                Ok(Self::memory())
            }
        }
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(MemoryStore::new()))
    }

    pub fn backend(&self) -> StorageBackendType {
        match self {
            Self::Sqlite(_) => StorageBackendType::Sqlite,
            Self::Memory(_) => StorageBackendType::Memory,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Memory(_) => "memory",
        }
    }

    /// Get the repository trait object for data operations
    pub fn repository(&self) -> Arc<dyn TraceRepository> {
        match self {
            Self::Sqlite(s) => Arc::new(Arc::clone(s)),
            Self::Memory(m) => Arc::new(Arc::clone(m)),
        }
    }

    /// Run a WAL checkpoint (SQLite); nothing to do in memory
    pub async fn checkpoint(&self) -> Result<(), DataError> {
        match self {
            Self::Sqlite(s) => s.checkpoint().await.map_err(Into::into),
            Self::Memory(_) => Ok(()),
        }
    }

    /// Close the backend gracefully
    pub async fn close(&self) {
        match self {
            Self::Sqlite(s) => s.close().await,
            Self::Memory(_) => {}
        }
    }

    /// Start the background checkpoint task (SQLite only)
    pub fn start_checkpoint_task(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        match self {
            Self::Sqlite(s) => Some(s.start_checkpoint_task(shutdown_rx)),
            Self::Memory(_) => None,
        }
    }
}
