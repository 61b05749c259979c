use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    object_id::ObjectId,
    snapshot::{parse_entry, Snapshot},
    storage::Storage,
};

pub const INDEX_FILE: &str = "index";
const DELETED_PREFIX: &str = "deleted ";

/// A pending change to one path.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Staged {
    /// The path will hold this blob.
    Content(ObjectId),
    /// The path will stop being tracked.
    Removed,
}

/// Pending, uncommitted changes keyed by path.
///
/// Serialized one line per entry: `<digest> <path>` for new content,
/// `deleted <path>` for a removal.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct StagingIndex {
    entries: BTreeMap<String, Staged>,
}

impl StagingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, path: String, staged: Staged) {
        self.entries.insert(path, staged);
    }

    pub fn unstage(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<Staged> {
        self.entries.get(path).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Staged)> {
        self.entries.iter().map(|(path, staged)| (path.as_str(), *staged))
    }

    /// Folds `other` into this index; entries in `other` win.
    pub fn extend(&mut self, other: StagingIndex) {
        self.entries.extend(other.entries);
    }

    /// The snapshot that results from applying these changes on top of `base`.
    pub fn apply(&self, base: &Snapshot) -> Snapshot {
        let mut snapshot = base.clone();
        for (path, staged) in &self.entries {
            match staged {
                Staged::Content(id) => {
                    snapshot.insert(path.clone(), *id);
                }
                Staged::Removed => {
                    snapshot.remove(path);
                }
            }
        }
        snapshot
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (path, staged) in &self.entries {
            match staged {
                Staged::Content(id) => out.push_str(&format!("{} {}\n", id, path)),
                Staged::Removed => out.push_str(&format!("{}{}\n", DELETED_PREFIX, path)),
            }
        }
        out
    }

    pub fn decode(name: &str, bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|_| Error::corrupt(name, "not utf-8"))?;
        let mut index = StagingIndex::new();
        for line in text.lines().filter(|line| !line.is_empty()) {
            if let Some(path) = line.strip_prefix(DELETED_PREFIX) {
                index.stage(path.to_string(), Staged::Removed);
            } else {
                let (id, path) = parse_entry(line)
                    .ok_or_else(|| Error::corrupt(name, format!("bad index line {:?}", line)))?;
                index.stage(path.to_string(), Staged::Content(id));
            }
        }
        Ok(index)
    }

    /// Reads the index stored under `key`; a missing file is an empty index.
    pub fn load<S: Storage + ?Sized>(meta: &S, key: &str) -> Result<Self> {
        match meta.read(key)? {
            Some(bytes) => StagingIndex::decode(key, &bytes),
            None => Ok(StagingIndex::new()),
        }
    }

    pub fn save<S: Storage + ?Sized>(&self, meta: &mut S, key: &str) -> Result<()> {
        meta.write(key, self.encode().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{object_id::ObjectKind, storage::in_memory::InMemoryStorage};

    fn blob(content: &[u8]) -> ObjectId {
        ObjectId::hash(ObjectKind::Blob, content)
    }

    #[test]
    fn encode_layout() {
        let mut index = StagingIndex::new();
        index.stage("b.txt".into(), Staged::Removed);
        index.stage("a.txt".into(), Staged::Content(blob(b"a")));
        assert_eq!(
            index.encode(),
            format!("{} a.txt\ndeleted b.txt\n", blob(b"a"))
        );
    }

    #[test]
    fn persists_in_storage() {
        let mut meta = InMemoryStorage::new();
        assert!(StagingIndex::load(&meta, INDEX_FILE).unwrap().is_empty());

        let mut index = StagingIndex::new();
        index.stage("dir/a b.txt".into(), Staged::Content(blob(b"x")));
        index.stage("gone.txt".into(), Staged::Removed);
        index.save(&mut meta, INDEX_FILE).unwrap();
        assert_eq!(StagingIndex::load(&meta, INDEX_FILE).unwrap(), index);
    }

    #[test]
    fn apply_overlays_base() {
        let base: Snapshot = vec![
            ("keep.txt".to_string(), blob(b"keep")),
            ("edit.txt".to_string(), blob(b"old")),
            ("drop.txt".to_string(), blob(b"drop")),
        ]
        .into_iter()
        .collect();
        let mut index = StagingIndex::new();
        index.stage("edit.txt".into(), Staged::Content(blob(b"new")));
        index.stage("drop.txt".into(), Staged::Removed);
        index.stage("add.txt".into(), Staged::Content(blob(b"add")));

        let result = index.apply(&base);
        assert_eq!(result.get("keep.txt"), Some(blob(b"keep")));
        assert_eq!(result.get("edit.txt"), Some(blob(b"new")));
        assert_eq!(result.get("add.txt"), Some(blob(b"add")));
        assert!(!result.contains("drop.txt"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            StagingIndex::decode(INDEX_FILE, b"nonsense\n"),
            Err(Error::CorruptObject { .. })
        ));
    }
}
