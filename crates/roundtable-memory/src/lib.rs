pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use roundtable_core::config::{StoreBackend, StoreConfig};
use roundtable_core::error::Result;
use roundtable_core::traits::SessionStore;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

/// Open the session store selected by `[store]`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn SessionStore>> {
    match config.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteSessionStore::open(&config.resolved_path())?)),
        StoreBackend::Memory => Ok(Arc::new(MemorySessionStore::new())),
    }
}
