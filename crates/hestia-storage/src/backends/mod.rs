//! Storage backend trait and the in-memory implementation.

pub mod redb;

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::Result;

/// Core storage backend trait.
///
/// Backends store raw bytes under `(table, key)` pairs. Keys may contain `/`
/// separators to form hierarchical paths; [`scan`](StorageBackend::scan) and
/// [`delete_prefix`](StorageBackend::delete_prefix) operate on such prefixes.
///
/// `write_batch` and `delete_prefix` must be transactional: either every
/// entry is applied or none is. The hub relies on this for per-device
/// atomicity of persisted configuration.
pub trait StorageBackend: Send + Sync {
    /// Write a value to a key in the specified table.
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Read a value by key from the specified table.
    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key from the specified table. Returns whether the key existed.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// Delete every key with the given prefix. Returns the number of keys removed.
    fn delete_prefix(&self, table: &str, prefix: &str) -> Result<usize>;

    /// Scan keys with a given prefix in the specified table.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Write multiple values to the specified table in one transaction.
    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Check if this backend survives a process restart.
    fn is_persistent(&self) -> bool;
}

/// Create a namespaced key for backends that share a single physical table.
pub(crate) fn make_key(table: &str, key: &str) -> String {
    let mut result = String::with_capacity(table.len() + key.len() + 1);
    result.push_str(table);
    result.push(':');
    result.push_str(key);
    result
}

/// In-memory storage backend.
///
/// Keeps everything in a `BTreeMap` so prefix scans come out sorted, the
/// same order the persistent backend produces.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().expect("storage lock poisoned");
        entries.insert(make_key(table, key), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().expect("storage lock poisoned");
        Ok(entries.get(&make_key(table, key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().expect("storage lock poisoned");
        Ok(entries.remove(&make_key(table, key)).is_some())
    }

    fn delete_prefix(&self, table: &str, prefix: &str) -> Result<usize> {
        let full_prefix = make_key(table, prefix);
        let mut entries = self.entries.write().expect("storage lock poisoned");
        let keys: Vec<String> = entries
            .range(full_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&full_prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        Ok(keys.len())
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let full_prefix = make_key(table, prefix);
        let namespace_len = table.len() + 1;
        let entries = self.entries.read().expect("storage lock poisoned");
        Ok(entries
            .range(full_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&full_prefix))
            .map(|(k, v)| (k[namespace_len..].to_string(), v.clone()))
            .collect())
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut entries = self.entries.write().expect("storage lock poisoned");
        for (key, value) in items {
            entries.insert(make_key(table, &key), value);
        }
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_write_read_delete() {
        let backend = MemoryBackend::new();
        backend.write("t", "a", b"1").unwrap();
        assert_eq!(backend.read("t", "a").unwrap(), Some(b"1".to_vec()));
        assert!(backend.delete("t", "a").unwrap());
        assert!(!backend.delete("t", "a").unwrap());
        assert_eq!(backend.read("t", "a").unwrap(), None);
    }

    #[test]
    fn test_memory_scan_is_table_scoped() {
        let backend = MemoryBackend::new();
        backend.write("t1", "dev/a", b"1").unwrap();
        backend.write("t1", "dev/b", b"2").unwrap();
        backend.write("t2", "dev/c", b"3").unwrap();

        let hits = backend.scan("t1", "dev/").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "dev/a");
        assert_eq!(hits[1].0, "dev/b");
    }

    #[test]
    fn test_memory_delete_prefix() {
        let backend = MemoryBackend::new();
        backend.write("t", "x/1", b"1").unwrap();
        backend.write("t", "x/2", b"2").unwrap();
        backend.write("t", "y/1", b"3").unwrap();

        assert_eq!(backend.delete_prefix("t", "x/").unwrap(), 2);
        assert!(backend.scan("t", "x/").unwrap().is_empty());
        assert_eq!(backend.scan("t", "y/").unwrap().len(), 1);
    }
}
