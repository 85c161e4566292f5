//! Process-wide table registry.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{Result, StrataError};

use super::table::Table;

static STORAGE_MANAGER: Lazy<StorageManager> = Lazy::new(StorageManager::new);

/// Get the global storage manager
pub fn storage_manager() -> &'static StorageManager {
    &STORAGE_MANAGER
}

/// Name → table registry.
///
/// Registration takes the exclusive lock; lookups share a read lock and
/// hand out `Arc`s, so a dropped table is deallocated only once the last
/// reader releases it.
pub struct StorageManager {
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl StorageManager {
    /// Create a standalone registry (tests; the process normally uses
    /// [`storage_manager`]).
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_table(&self, name: impl Into<String>, table: Arc<Table>) -> Result<()> {
        let name = name.into();
        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            return Err(StrataError::DuplicateTable(name));
        }
        log::debug!("registering table '{}'", name);
        tables.insert(name, table);
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.remove(name).is_none() {
            return Err(StrataError::TableNotFound(name.to_string()));
        }
        log::debug!("dropped table '{}'", name);
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove every registered table (test support).
    pub fn reset(&self) {
        self.tables.write().clear();
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}
