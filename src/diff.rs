use std::{collections::BTreeMap, fmt::Display};

use serde::Serialize;

use crate::{
    error::Result,
    object_id::{ObjectId, ObjectKind},
    snapshot::Snapshot,
    storage::Storage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

/// Changed paths, sorted by path. A clean diff has no entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Diff {
    changes: Vec<Change>,
}

impl Diff {
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn get(&self, path: &str) -> Option<ChangeKind> {
        self.changes
            .binary_search_by(|change| change.path.as_str().cmp(path))
            .ok()
            .map(|i| self.changes[i].kind)
    }
}

impl FromIterator<(String, ChangeKind)> for Diff {
    fn from_iter<I: IntoIterator<Item = (String, ChangeKind)>>(iter: I) -> Self {
        let sorted: BTreeMap<String, ChangeKind> = iter.into_iter().collect();
        Diff {
            changes: sorted
                .into_iter()
                .map(|(path, kind)| Change { path, kind })
                .collect(),
        }
    }
}

impl IntoIterator for Diff {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// What changed going from `old` to `new`, judged by blob digest.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Diff {
    let removed = old
        .iter()
        .filter(|(path, _)| !new.contains(path))
        .map(|(path, _)| (path.to_string(), ChangeKind::Deleted));
    let changed = new.iter().filter_map(|(path, id)| match old.get(path) {
        None => Some((path.to_string(), ChangeKind::Added)),
        Some(old_id) if old_id != id => Some((path.to_string(), ChangeKind::Modified)),
        Some(_) => None,
    });
    removed.chain(changed).collect()
}

/// Compares `snapshot` against the live files in `tree`.
///
/// A tracked file counts as modified when its current bytes hash to a
/// different blob id than the one recorded in the snapshot.
pub fn diff_work_tree<W: Storage + ?Sized>(snapshot: &Snapshot, tree: &W) -> Result<Diff> {
    let live = tree.list("")?;
    let mut changes = Vec::new();
    for path in snapshot.paths() {
        if live.binary_search_by(|candidate| candidate.as_str().cmp(path)).is_err() {
            changes.push((path.to_string(), ChangeKind::Deleted));
        }
    }
    for path in live {
        match snapshot.get(&path) {
            None => changes.push((path, ChangeKind::Added)),
            Some(id) => {
                if blob_id(tree, &path)? != Some(id) {
                    changes.push((path, ChangeKind::Modified));
                }
            }
        }
    }
    log::debug!("{} paths differ from the working tree", changes.len());
    Ok(changes.into_iter().collect())
}

/// The blob id the file at `path` would be stored under, if it exists.
pub fn blob_id<W: Storage + ?Sized>(tree: &W, path: &str) -> Result<Option<ObjectId>> {
    Ok(tree
        .read(path)?
        .map(|bytes| ObjectId::hash(ObjectKind::Blob, &bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::in_memory::InMemoryStorage;

    fn blob(content: &[u8]) -> ObjectId {
        ObjectId::hash(ObjectKind::Blob, content)
    }

    fn tracked(files: &[(&str, &str)]) -> (Snapshot, InMemoryStorage) {
        let mut tree = InMemoryStorage::new();
        let mut snapshot = Snapshot::new();
        for &(path, content) in files {
            tree.write(path, content.as_bytes()).unwrap();
            snapshot.insert(path.to_string(), blob(content.as_bytes()));
        }
        (snapshot, tree)
    }

    #[test]
    fn unmodified_tree_is_clean() {
        let (snapshot, tree) = tracked(&[("a.txt", "hello"), ("dir/b.txt", "b")]);
        assert!(diff_work_tree(&snapshot, &tree).unwrap().is_clean());
    }

    #[test]
    fn classifies_each_change() {
        let (snapshot, mut tree) =
            tracked(&[("a.txt", "hello"), ("b.txt", "b"), ("c.txt", "c")]);
        tree.write("a.txt", b"hello world").unwrap();
        tree.remove("b.txt").unwrap();
        tree.write("new.txt", b"new").unwrap();

        let diff = diff_work_tree(&snapshot, &tree).unwrap();
        assert_eq!(
            diff.changes(),
            &[
                Change { path: "a.txt".into(), kind: ChangeKind::Modified },
                Change { path: "b.txt".into(), kind: ChangeKind::Deleted },
                Change { path: "new.txt".into(), kind: ChangeKind::Added },
            ]
        );
        assert_eq!(diff.get("c.txt"), None);
    }

    #[test]
    fn single_edit_single_entry() {
        let (snapshot, mut tree) = tracked(&[("a.txt", "hello"), ("b.txt", "b")]);
        tree.write("b.txt", b"bb").unwrap();
        let diff = diff_work_tree(&snapshot, &tree).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.get("b.txt"), Some(ChangeKind::Modified));
    }

    #[test]
    fn compares_snapshots() {
        let old: Snapshot = vec![
            ("same".to_string(), blob(b"1")),
            ("edit".to_string(), blob(b"1")),
            ("gone".to_string(), blob(b"1")),
        ]
        .into_iter()
        .collect();
        let new: Snapshot = vec![
            ("same".to_string(), blob(b"1")),
            ("edit".to_string(), blob(b"2")),
            ("born".to_string(), blob(b"1")),
        ]
        .into_iter()
        .collect();
        let diff = diff_snapshots(&old, &new);
        let paths: Vec<(&str, ChangeKind)> = diff
            .changes()
            .iter()
            .map(|change| (change.path.as_str(), change.kind))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("born", ChangeKind::Added),
                ("edit", ChangeKind::Modified),
                ("gone", ChangeKind::Deleted),
            ]
        );
        assert!(diff_snapshots(&old, &old).is_clean());
    }

    #[test]
    fn serializes_as_a_list() {
        let diff: Diff = vec![("a".to_string(), ChangeKind::Added)].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&diff).unwrap(),
            r#"[{"path":"a","kind":"added"}]"#
        );
    }
}
