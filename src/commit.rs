use serde::Serialize;

use crate::{
    error::{Error, Result},
    object_id::{ObjectId, ObjectKind},
    object_store::ObjectStore,
    snapshot::{is_canonical_path, parse_entry, Snapshot},
};

const MESSAGE_PREFIX: &str = "Commit message: ";
const PARENT_PREFIX: &str = "parent ";
const MERGE_PREFIX: &str = "merge ";

/// A particular version of the tracked files.
///
/// Stored as a text record:
///
/// ```text
/// Commit message: <message>
/// parent <digest>
/// merge <digest>
/// <digest> <path>
/// ...
/// ```
///
/// where the `parent` and `merge` lines are present only when set.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Commit {
    /// The message added with the commit, always a single line.
    pub message: String,
    pub snapshot: Snapshot,
    /// The commit this one was made on top of, if there was one.
    pub parent: Option<ObjectId>,
    /// The tip of the branch merged into this commit, if it concluded a merge.
    pub merge: Option<ObjectId>,
}

impl Commit {
    pub fn new(message: &str, snapshot: Snapshot, parent: Option<ObjectId>) -> Self {
        Commit {
            message: fold_lines(message),
            snapshot,
            parent,
            merge: None,
        }
    }

    /// Every commit this one links back to, the first parent first.
    pub fn parents(&self) -> impl Iterator<Item = ObjectId> {
        self.parent.into_iter().chain(self.merge)
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{}{}\n", MESSAGE_PREFIX, fold_lines(&self.message));
        if let Some(parent) = self.parent {
            out.push_str(&format!("{}{}\n", PARENT_PREFIX, parent));
        }
        if let Some(merge) = self.merge {
            out.push_str(&format!("{}{}\n", MERGE_PREFIX, merge));
        }
        self.snapshot.write_lines(&mut out);
        out
    }

    pub fn decode(id: ObjectId, bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|_| Error::corrupt(id, "not utf-8"))?;
        let mut lines = text.lines();
        let message = lines
            .next()
            .and_then(|line| line.strip_prefix(MESSAGE_PREFIX))
            .ok_or_else(|| Error::corrupt(id, "missing commit message"))?
            .to_string();
        let mut commit = Commit {
            message,
            snapshot: Snapshot::new(),
            parent: None,
            merge: None,
        };
        for line in lines {
            if let Some(parent) = line.strip_prefix(PARENT_PREFIX) {
                commit.parent = Some(parse_link(id, parent)?);
            } else if let Some(merge) = line.strip_prefix(MERGE_PREFIX) {
                commit.merge = Some(parse_link(id, merge)?);
            } else {
                let (blob, path) = parse_entry(line)
                    .ok_or_else(|| Error::corrupt(id, format!("bad snapshot line {:?}", line)))?;
                if !is_canonical_path(path) {
                    return Err(Error::corrupt(id, format!("bad snapshot path {:?}", path)));
                }
                commit.snapshot.insert(path.to_string(), blob);
            }
        }
        Ok(commit)
    }

    /// Writes this commit into the store, returning its id.
    pub fn store<S: ObjectStore + ?Sized>(&self, store: &mut S) -> Result<ObjectId> {
        store.put(ObjectKind::Commit, self.encode().as_bytes())
    }

    pub fn load<S: ObjectStore + ?Sized>(store: &S, id: ObjectId) -> Result<Self> {
        Commit::decode(id, &store.get(id)?)
    }

    pub fn summary(&self, id: ObjectId) -> CommitSummary {
        CommitSummary {
            id,
            message: self.message.clone(),
            parent: self.parent,
            merge: self.merge,
        }
    }
}

/// What `history` reports for each commit.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct CommitSummary {
    pub id: ObjectId,
    pub message: String,
    pub parent: Option<ObjectId>,
    pub merge: Option<ObjectId>,
}

fn parse_link(id: ObjectId, text: &str) -> Result<ObjectId> {
    text.parse()
        .map_err(|_| Error::corrupt(id, format!("bad parent link {:?}", text)))
}

fn fold_lines(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::in_memory::InMemoryStorage;

    fn blob(content: &[u8]) -> ObjectId {
        ObjectId::hash(ObjectKind::Blob, content)
    }

    #[test]
    fn record_layout() {
        let snapshot: Snapshot = vec![("a.txt".to_string(), blob(b"hello"))].into_iter().collect();
        let root = Commit::new("c1", snapshot.clone(), None);
        assert_eq!(
            root.encode(),
            format!("Commit message: c1\n{} a.txt\n", blob(b"hello"))
        );

        let parent = ObjectId::hash(ObjectKind::Commit, root.encode().as_bytes());
        let mut merge = Commit::new("merge", snapshot, Some(parent));
        merge.merge = Some(parent);
        let text = merge.encode();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Commit message: merge"));
        assert_eq!(lines.next(), Some(format!("parent {}", parent).as_str()));
        assert_eq!(lines.next(), Some(format!("merge {}", parent).as_str()));
    }

    #[test]
    fn store_and_load() {
        let mut store = InMemoryStorage::new();
        let snapshot: Snapshot = vec![
            ("a.txt".to_string(), blob(b"a")),
            ("docs/read me.md".to_string(), blob(b"b")),
        ]
        .into_iter()
        .collect();
        let first = Commit::new("first", snapshot.clone(), None);
        let first_id = first.store(&mut store).unwrap();
        let second = Commit::new("second", snapshot, Some(first_id));
        let second_id = second.store(&mut store).unwrap();

        assert_eq!(Commit::load(&store, first_id).unwrap(), first);
        let loaded = Commit::load(&store, second_id).unwrap();
        assert_eq!(loaded, second);
        assert_eq!(loaded.parents().collect::<Vec<_>>(), vec![first_id]);
    }

    #[test]
    fn identity_depends_on_parent() {
        let mut store = InMemoryStorage::new();
        let base = Commit::new("same", Snapshot::new(), None).store(&mut store).unwrap();
        let child = Commit::new("same", Snapshot::new(), Some(base)).store(&mut store).unwrap();
        assert_ne!(base, child);
    }

    #[test]
    fn messages_are_single_line() {
        let commit = Commit::new("  fix the\nthing  ", Snapshot::new(), None);
        assert_eq!(commit.message, "fix the thing");
    }

    #[test]
    fn rejects_garbage() {
        let id = blob(b"garbage");
        assert!(matches!(
            Commit::decode(id, b"hello"),
            Err(Error::CorruptObject { .. })
        ));
        assert!(matches!(
            Commit::decode(id, b"Commit message: x\nnot a line\n"),
            Err(Error::CorruptObject { .. })
        ));
    }

    #[test]
    fn rejects_paths_outside_the_tree() {
        let id = blob(b"tampered");
        for path in ["../x", "/etc/passwd", "a/./b", ".rev/HEAD"] {
            let record = format!("Commit message: x\n{} {}\n", blob(b"x"), path);
            assert!(
                matches!(Commit::decode(id, record.as_bytes()), Err(Error::CorruptObject { .. })),
                "{} was accepted",
                path
            );
        }
    }
}
