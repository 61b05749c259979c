use std::collections::BTreeMap;

use crate::error::Result;

use super::{is_under, Storage};

/// A [`Storage`] that never touches the disk; used for tests and scratch repositories.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    files: BTreeMap<String, Vec<u8>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    type Guard = ();

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.get(key).cloned())
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        self.files.insert(key.to_string(), Vec::from(bytes));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.files.remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .keys()
            .filter(|key| is_under(key, prefix))
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<Self::Guard> {
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.files.contains_key(key))
    }
}

#[test]
fn test_in_memory_storage() {
    let mut storage = InMemoryStorage::new();
    storage.write("a/b.txt", b"hello, world").unwrap();
    storage.write("a/c.txt", b"").unwrap();
    storage.write("ab.txt", b"x").unwrap();
    assert!(storage.exists("a/b.txt").unwrap());
    assert_eq!(storage.read("a/b.txt").unwrap(), Some(b"hello, world".to_vec()));
    assert_eq!(storage.list("a").unwrap(), vec!["a/b.txt", "a/c.txt"]);
    assert!(storage.remove("a/c.txt").unwrap());
    assert!(!storage.remove("a/c.txt").unwrap());
    assert_eq!(storage.list("").unwrap(), vec!["a/b.txt", "ab.txt"]);
}
