use crate::{
    error::{Error, Result},
    object_id::{ObjectId, ObjectKind},
    storage::Storage,
};

pub const OBJECTS_DIR: &str = "objects";

/// Content-addressed, append-only object storage.
///
/// Implemented for every [`Storage`]: objects live under `objects/<digest>`,
/// where the digest is the [`ObjectId`] of the typed content.
pub trait ObjectStore {
    /// Stores `content`, returning its id. Storing the same content again is a no-op.
    fn put(&mut self, kind: ObjectKind, content: &[u8]) -> Result<ObjectId>;

    /// Fails with [`Error::ObjectNotFound`] if nothing is stored under `id`.
    fn get(&self, id: ObjectId) -> Result<Vec<u8>>;

    fn has(&self, id: ObjectId) -> Result<bool>;

    /// Every stored object id, in order.
    fn object_ids(&self) -> Result<Vec<ObjectId>>;
}

pub fn object_key(id: ObjectId) -> String {
    format!("{}/{}", OBJECTS_DIR, id)
}

impl<S: Storage + ?Sized> ObjectStore for S {
    fn put(&mut self, kind: ObjectKind, content: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::hash(kind, content);
        let key = object_key(id);
        if let Some(existing) = self.read(&key)? {
            if existing != content {
                log::error!("{} {} is stored with different content", kind, id);
                return Err(Error::IntegrityViolation(id));
            }
            log::debug!("{} {} already stored", kind, id);
            return Ok(id);
        }
        log::info!("inserting {} {}", kind, id);
        self.write(&key, content)?;
        Ok(id)
    }

    fn get(&self, id: ObjectId) -> Result<Vec<u8>> {
        log::debug!("reading object {}", id);
        self.read(&object_key(id))?
            .ok_or(Error::ObjectNotFound(id))
    }

    fn has(&self, id: ObjectId) -> Result<bool> {
        self.exists(&object_key(id))
    }

    fn object_ids(&self) -> Result<Vec<ObjectId>> {
        let prefix = format!("{}/", OBJECTS_DIR);
        let mut ids = Vec::new();
        for key in self.list(OBJECTS_DIR)? {
            match key.strip_prefix(&prefix).map(str::parse::<ObjectId>) {
                Some(Ok(id)) => ids.push(id),
                _ => log::warn!("ignoring stray file {} in object store", key),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{directory::DirectoryStorage, in_memory::InMemoryStorage};

    #[test]
    fn round_trip() {
        let mut store = InMemoryStorage::new();
        let id = store.put(ObjectKind::Blob, b"hello, world").unwrap();
        assert!(store.has(id).unwrap());
        assert_eq!(store.get(id).unwrap(), b"hello, world".to_vec());
    }

    #[test]
    fn put_is_idempotent() {
        let mut store = InMemoryStorage::new();
        let a = store.put(ObjectKind::Blob, b"same").unwrap();
        let b = store.put(ObjectKind::Blob, b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.object_ids().unwrap(), vec![a]);
    }

    #[test]
    fn distinct_content_distinct_ids() {
        let mut store = InMemoryStorage::new();
        let a = store.put(ObjectKind::Blob, b"content 1").unwrap();
        let b = store.put(ObjectKind::Blob, b"content 2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_object() {
        let store = InMemoryStorage::new();
        let id = ObjectId::hash(ObjectKind::Blob, b"never stored");
        assert!(!store.has(id).unwrap());
        assert!(matches!(store.get(id), Err(Error::ObjectNotFound(missing)) if missing == id));
    }

    #[test]
    fn refuses_to_overwrite_with_different_content() {
        let mut store = InMemoryStorage::new();
        let id = ObjectId::hash(ObjectKind::Blob, b"original");
        store.write(&object_key(id), b"tampered").unwrap();
        assert!(matches!(
            store.put(ObjectKind::Blob, b"original"),
            Err(Error::IntegrityViolation(bad)) if bad == id
        ));
        assert_eq!(store.get(id).unwrap(), b"tampered".to_vec());
    }

    #[test]
    fn directory_object_store() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut store = DirectoryStorage::new(tempdir.path().into()).unwrap();
        let id = store.put(ObjectKind::Blob, b"hello, world").unwrap();
        assert!(tempdir.path().join(OBJECTS_DIR).join(id.to_string()).exists());
        assert_eq!(store.get(id).unwrap(), b"hello, world".to_vec());
        store.write("objects/README", b"not an object").unwrap();
        assert_eq!(store.object_ids().unwrap(), vec![id]);
    }
}
