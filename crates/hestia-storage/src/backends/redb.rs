//! Redb storage backend implementation.
//!
//! Provides persistent storage using the redb embedded database. All logical
//! tables share a single redb table; keys are namespaced as `table:key` so
//! prefix scans stay range queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use super::{make_key, StorageBackend};
use crate::error::{Error, Result};

const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hestia_storage");

/// Configuration for [`RedbBackend`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RedbBackendConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl RedbBackendConfig {
    /// Create a new config with the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    /// Create a config backed by a temporary file that is removed on drop.
    pub fn memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
        }
    }
}

/// redb-based persistent storage backend.
pub struct RedbBackend {
    db: Arc<Database>,
    /// Temp file path for `:memory:` databases, removed on drop.
    temp_path: Option<PathBuf>,
}

impl RedbBackend {
    /// Create a new RedbBackend with the given configuration.
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let path = &config.path;
        tracing::debug!(path = %path, "opening storage backend");

        let (db, temp_path) = if path == ":memory:" {
            // redb doesn't support true in-memory databases; use a temp file.
            let temp_path =
                std::env::temp_dir().join(format!("hestia_redb_{}", uuid::Uuid::new_v4()));
            let db = Database::create(&temp_path).map_err(|e| Error::Backend(e.to_string()))?;
            (db, Some(temp_path))
        } else {
            let path_ref = Path::new(path);
            if config.create_dirs {
                if let Some(parent) = path_ref.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let db = if path_ref.exists() {
                Database::open(path_ref).map_err(|e| Error::Backend(e.to_string()))?
            } else {
                Database::create(path_ref).map_err(|e| Error::Backend(e.to_string()))?
            };
            (db, None)
        };

        // Make sure the unified table exists so first reads don't fail.
        let txn = db.begin_write().map_err(|e| Error::Backend(e.to_string()))?;
        {
            txn.open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| Error::Backend(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            temp_path,
        })
    }

    /// Open a backend at the given path with default options.
    pub fn open(path: impl Into<String>) -> Result<Self> {
        Self::new(RedbBackendConfig::new(path))
    }
}

impl Drop for RedbBackend {
    fn drop(&mut self) {
        if let Some(path) = self.temp_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Backend(e.to_string()))?;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Backend(e.to_string()))?;
            t.insert(make_key(table, key).as_str(), value)
                .map_err(|e| Error::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Backend(e.to_string()))?;
        let t = txn
            .open_table(UNIFIED_TABLE)
            .map_err(|e| Error::Backend(e.to_string()))?;
        let value = t
            .get(make_key(table, key).as_str())
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Backend(e.to_string()))?;
        let existed;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Backend(e.to_string()))?;
            existed = t
                .remove(make_key(table, key).as_str())
                .map_err(|e| Error::Backend(e.to_string()))?
                .is_some();
        }
        txn.commit().map_err(|e| Error::Backend(e.to_string()))?;
        Ok(existed)
    }

    fn delete_prefix(&self, table: &str, prefix: &str) -> Result<usize> {
        let full_prefix = make_key(table, prefix);
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Backend(e.to_string()))?;
        let removed;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Backend(e.to_string()))?;
            let keys: Vec<String> = t
                .range(full_prefix.as_str()..)
                .map_err(|e| Error::Backend(e.to_string()))?
                .filter_map(|entry| entry.ok())
                .map(|(k, _)| k.value().to_string())
                .take_while(|k| k.starts_with(&full_prefix))
                .collect();
            removed = keys.len();
            for key in keys {
                t.remove(key.as_str())
                    .map_err(|e| Error::Backend(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| Error::Backend(e.to_string()))?;
        Ok(removed)
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let full_prefix = make_key(table, prefix);
        let namespace_len = table.len() + 1;
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Backend(e.to_string()))?;
        let t = txn
            .open_table(UNIFIED_TABLE)
            .map_err(|e| Error::Backend(e.to_string()))?;
        let entries = t
            .range(full_prefix.as_str()..)
            .map_err(|e| Error::Backend(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|(k, v)| (k.value().to_string(), v.value().to_vec()))
            .take_while(|(k, _)| k.starts_with(&full_prefix))
            .map(|(k, v)| (k[namespace_len..].to_string(), v))
            .collect();
        Ok(entries)
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Backend(e.to_string()))?;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Backend(e.to_string()))?;
            for (key, value) in items {
                t.insert(make_key(table, &key).as_str(), value.as_slice())
                    .map_err(|e| Error::Backend(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        self.temp_path.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redb_round_trip() {
        let backend = RedbBackend::new(RedbBackendConfig::memory()).unwrap();
        backend.write("DeviceConfig", "dev/name", b"lamp").unwrap();
        assert_eq!(
            backend.read("DeviceConfig", "dev/name").unwrap(),
            Some(b"lamp".to_vec())
        );
    }

    #[test]
    fn test_redb_batch_and_prefix_delete() {
        let backend = RedbBackend::new(RedbBackendConfig::memory()).unwrap();
        backend
            .write_batch(
                "DeviceConfig",
                vec![
                    ("a/name".to_string(), b"one".to_vec()),
                    ("a/Params/x".to_string(), b"1".to_vec()),
                    ("b/name".to_string(), b"two".to_vec()),
                ],
            )
            .unwrap();

        assert_eq!(backend.scan("DeviceConfig", "a/").unwrap().len(), 2);
        assert_eq!(backend.delete_prefix("DeviceConfig", "a/").unwrap(), 2);
        assert!(backend.scan("DeviceConfig", "a/").unwrap().is_empty());
        assert_eq!(backend.scan("DeviceConfig", "").unwrap().len(), 1);
    }

    #[test]
    fn test_redb_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        {
            let backend = RedbBackend::open(path.to_str().unwrap()).unwrap();
            backend.write("PluginConfig", "p/key", b"42").unwrap();
        }
        let backend = RedbBackend::open(path.to_str().unwrap()).unwrap();
        assert_eq!(
            backend.read("PluginConfig", "p/key").unwrap(),
            Some(b"42".to_vec())
        );
        assert!(backend.is_persistent());
    }
}
