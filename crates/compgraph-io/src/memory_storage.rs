//! In-memory storage backend for testing.
//!
//! Provides a HashMap-based storage that implements the Storage trait, so
//! spill paths can be exercised without touching the filesystem.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use compgraph_mem::error::{Error as MemError, Result as MemResult};
use compgraph_mem::Storage;

/// Thread-safe in-memory storage using a HashMap.
///
/// Clones share the same map, so a test can keep one clone to inspect what a
/// spill manager wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the bytes stored at `path`.
    pub fn insert(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.data().insert(path.into(), bytes);
    }

    /// Copy of the bytes stored at `path`.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.data().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.data().contains_key(path)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        self.data().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn open(&self, path: &str) -> MemResult<Box<dyn Read + Send>> {
        let bytes = self
            .get(path)
            .ok_or_else(|| MemError::Storage(format!("path not found: {path}")))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        self.data().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use compgraph_core::id::SpillId;
    use compgraph_core::row;
    use compgraph_mem::spill::HEADER_LEN;
    use compgraph_mem::{Codec, SpillManager};

    use super::*;

    #[test]
    fn test_memory_storage_write_open() {
        let storage = MemoryStorage::new();
        storage.write("test/file.txt", b"hello world").unwrap();

        let mut out = Vec::new();
        storage
            .open("test/file.txt")
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_memory_storage_delete() {
        let storage = MemoryStorage::new();
        storage.write("test/file.txt", b"data").unwrap();
        assert!(storage.contains("test/file.txt"));

        storage.delete("test/file.txt").unwrap();
        assert!(!storage.contains("test/file.txt"));
        assert!(storage.open("test/file.txt").is_err());
    }

    #[test]
    fn test_flipped_payload_byte_fails_checksum() {
        let storage = MemoryStorage::new();
        let mgr = SpillManager::new(Box::new(storage.clone()), Codec::None, "mem://spill");
        let rows = vec![row! { "n" => 7 }, row! { "n" => 8 }];
        let meta = mgr.write_rows(&rows, SpillId::next(), 0).unwrap();

        let mut bytes = storage.get(&meta.path).unwrap();
        let at = HEADER_LEN
            + bytes[HEADER_LEN..]
                .iter()
                .position(|b| *b == b'7')
                .unwrap();
        bytes[at] = b'9';
        storage.insert(meta.path.clone(), bytes);

        let read: Vec<_> = mgr.read_rows(&meta).unwrap().collect();
        assert_eq!(read.len(), 3);
        assert_eq!(read[0].as_ref().unwrap().get_f64("n").unwrap(), 9.0);
        assert!(matches!(&read[2], Err(MemError::ChecksumMismatch(name)) if *name == meta.name.0));
    }
}
