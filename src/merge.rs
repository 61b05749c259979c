//! Common-ancestor search and three-way merging of snapshots.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::{
    commit::Commit,
    error::{Error, PathList, Result},
    object_id::ObjectId,
    object_store::ObjectStore,
    snapshot::Snapshot,
};

/// Path to file content.
pub type FileMap = BTreeMap<String, Vec<u8>>;

pub const OURS_MARKER: &str = "<<<<<<< HEAD";
pub const SEPARATOR_MARKER: &str = "=======";
pub const THEIRS_MARKER: &str = ">>>>>>>";

/// The outcome of [`three_way_merge`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutput {
    /// Every path that survives the merge. Conflicting paths hold both sides
    /// between conflict markers.
    pub merged: FileMap,
    pub conflicts: BTreeSet<String>,
}

/// What `merge_branch` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeResult {
    /// Nothing to merge; no commit was made.
    UpToDate,
    Merged { commit: ObjectId },
    /// No commit was made; the listed paths carry conflict markers in the working tree.
    Conflicted { conflicts: Vec<String> },
}

impl MergeResult {
    /// Treats a conflicted merge as [`Error::MergeConflict`].
    pub fn into_result(self) -> Result<MergeResult> {
        match self {
            MergeResult::Conflicted { conflicts } => Err(Error::MergeConflict(PathList(conflicts))),
            other => Ok(other),
        }
    }
}

/// Every commit reachable from `tip` through parent and merge links, `tip` included.
pub fn reachable<S: ObjectStore + ?Sized>(store: &S, tip: ObjectId) -> Result<BTreeSet<ObjectId>> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([tip]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        queue.extend(Commit::load(store, id)?.parents());
    }
    Ok(seen)
}

/// The nearest commit both `a` and `b` descend from.
///
/// Collects everything reachable from `a`, then searches breadth first
/// from `b`, returning the first commit also reachable from `a`. On a
/// history where every commit has one parent this is the walk down `b`'s
/// parent chain; across merge commits it picks the closest shared commit
/// to `b` by generation, which is a good base but not necessarily the
/// unique lowest common ancestor.
pub fn find_common_ancestor<S: ObjectStore + ?Sized>(
    store: &S,
    a: ObjectId,
    b: ObjectId,
) -> Result<Option<ObjectId>> {
    let ours = reachable(store, a)?;
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([b]);
    while let Some(id) = queue.pop_front() {
        if ours.contains(&id) {
            log::debug!("common ancestor of {} and {} is {}", a, b, id);
            return Ok(Some(id));
        }
        if !seen.insert(id) {
            continue;
        }
        queue.extend(Commit::load(store, id)?.parents());
    }
    Ok(None)
}

/// Reads the content of every file in `snapshot`.
pub fn load_files<S: ObjectStore + ?Sized>(store: &S, snapshot: &Snapshot) -> Result<FileMap> {
    snapshot
        .iter()
        .map(|(path, id)| Ok((path.to_string(), store.get(id)?)))
        .collect()
}

/// Combines `ours` and `theirs` against their common `base`.
///
/// Per path: if both sides agree, that wins; if only one side moved away
/// from the base, its version wins; otherwise the path conflicts. A path
/// missing from a side counts as that side's value, so additions and
/// deletions follow the same rule.
pub fn three_way_merge(
    base: &FileMap,
    ours: &FileMap,
    theirs: &FileMap,
    theirs_label: &str,
) -> MergeOutput {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut output = MergeOutput::default();
    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let resolved = if o == t {
            o
        } else if o == b {
            t
        } else if t == b {
            o
        } else {
            output.conflicts.insert(path.clone());
            output.merged.insert(
                path.clone(),
                conflict_text(o.map(Vec::as_slice), t.map(Vec::as_slice), theirs_label),
            );
            continue;
        };
        if let Some(content) = resolved {
            output.merged.insert(path.clone(), content.clone());
        }
    }
    output
}

/// Both variants of a conflicting file between conflict markers. A side that
/// deleted the file contributes nothing.
pub fn conflict_text(ours: Option<&[u8]>, theirs: Option<&[u8]>, theirs_label: &str) -> Vec<u8> {
    fn push_side(out: &mut Vec<u8>, side: Option<&[u8]>) {
        if let Some(content) = side {
            out.extend_from_slice(content);
            if !content.is_empty() && !content.ends_with(b"\n") {
                out.push(b'\n');
            }
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(OURS_MARKER.as_bytes());
    out.push(b'\n');
    push_side(&mut out, ours);
    out.extend_from_slice(SEPARATOR_MARKER.as_bytes());
    out.push(b'\n');
    push_side(&mut out, theirs);
    out.extend_from_slice(format!("{} {}\n", THEIRS_MARKER, theirs_label).as_bytes());
    out
}

/// Whether `content` still holds an unresolved conflict block: a line that
/// is exactly the ours marker, followed later by a line opening with the
/// theirs marker.
pub fn has_conflict_markers(content: &[u8]) -> bool {
    let mut opened = false;
    for line in content.split(|&byte| byte == b'\n') {
        if line == OURS_MARKER.as_bytes() {
            opened = true;
        } else if opened && line.starts_with(THEIRS_MARKER.as_bytes()) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::in_memory::InMemoryStorage;

    fn files(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn takes_their_change() {
        let out = three_way_merge(&files(&[("f", "1")]), &files(&[("f", "1")]), &files(&[("f", "2")]), "b");
        assert!(out.conflicts.is_empty());
        assert_eq!(out.merged, files(&[("f", "2")]));
    }

    #[test]
    fn keeps_our_change() {
        let out = three_way_merge(&files(&[("f", "1")]), &files(&[("f", "2")]), &files(&[("f", "1")]), "b");
        assert!(out.conflicts.is_empty());
        assert_eq!(out.merged, files(&[("f", "2")]));
    }

    #[test]
    fn identical_changes_agree() {
        let out = three_way_merge(&files(&[("f", "1")]), &files(&[("f", "2")]), &files(&[("f", "2")]), "b");
        assert!(out.conflicts.is_empty());
        assert_eq!(out.merged, files(&[("f", "2")]));
    }

    #[test]
    fn divergent_changes_conflict() {
        let out = three_way_merge(&files(&[("f", "1")]), &files(&[("f", "2")]), &files(&[("f", "3")]), "feature");
        assert_eq!(out.conflicts.iter().collect::<Vec<_>>(), vec!["f"]);
        let text = String::from_utf8(out.merged["f"].clone()).unwrap();
        assert_eq!(text, "<<<<<<< HEAD\n2\n=======\n3\n>>>>>>> feature\n");
    }

    #[test]
    fn additions_from_either_side() {
        let out = three_way_merge(
            &files(&[]),
            &files(&[("ours.txt", "o")]),
            &files(&[("theirs.txt", "t")]),
            "b",
        );
        assert!(out.conflicts.is_empty());
        assert_eq!(out.merged, files(&[("ours.txt", "o"), ("theirs.txt", "t")]));
    }

    #[test]
    fn deletions_follow_the_same_rule() {
        let base = files(&[("gone", "x"), ("edited", "x")]);
        let ours = files(&[("edited", "y")]);
        let theirs = files(&[("gone", "x")]);
        let out = three_way_merge(&base, &ours, &theirs, "b");
        // We deleted "gone" and they left it alone; they deleted "edited" which we changed.
        assert!(!out.merged.contains_key("gone"));
        assert_eq!(out.conflicts.iter().collect::<Vec<_>>(), vec!["edited"]);
        assert_eq!(
            out.merged["edited"],
            b"<<<<<<< HEAD\ny\n=======\n>>>>>>> b\n".to_vec()
        );
    }

    #[test]
    fn detects_leftover_markers() {
        assert!(has_conflict_markers(&conflict_text(Some(&b"2"[..]), Some(&b"3"[..]), "feature")));
        assert!(has_conflict_markers(&conflict_text(None, Some(&b"3"[..]), "feature")));
        assert!(!has_conflict_markers(b"resolved\n"));
        assert!(!has_conflict_markers(b"title\n=======\n"));
        assert!(!has_conflict_markers(b">>>>>>> before\n<<<<<<< HEAD\n"));
    }

    #[test]
    fn conflicting_into_result() {
        let conflicted = MergeResult::Conflicted {
            conflicts: vec!["f".into()],
        };
        assert!(matches!(conflicted.into_result(), Err(Error::MergeConflict(_))));
        assert_eq!(MergeResult::UpToDate.into_result().unwrap(), MergeResult::UpToDate);
    }

    fn commit(store: &mut InMemoryStorage, message: &str, parent: Option<ObjectId>) -> ObjectId {
        Commit::new(message, Snapshot::new(), parent).store(store).unwrap()
    }

    #[test]
    fn ancestor_of_forked_chains() {
        let mut store = InMemoryStorage::new();
        let x = commit(&mut store, "x", None);
        let y = commit(&mut store, "y", Some(x));
        let z = commit(&mut store, "z", Some(x));
        assert_eq!(find_common_ancestor(&store, y, z).unwrap(), Some(x));
        assert_eq!(find_common_ancestor(&store, z, y).unwrap(), Some(x));
        assert_eq!(find_common_ancestor(&store, y, y).unwrap(), Some(y));
        assert_eq!(find_common_ancestor(&store, x, y).unwrap(), Some(x));
    }

    #[test]
    fn unrelated_histories() {
        let mut store = InMemoryStorage::new();
        let a = commit(&mut store, "a", None);
        let b = commit(&mut store, "b", None);
        assert_eq!(find_common_ancestor(&store, a, b).unwrap(), None);
    }

    #[test]
    fn ancestor_through_a_merge_commit() {
        let mut store = InMemoryStorage::new();
        let root = commit(&mut store, "root", None);
        let side = commit(&mut store, "side", Some(root));
        let main = commit(&mut store, "main", Some(root));
        let mut merge = Commit::new("merge", Snapshot::new(), Some(main));
        merge.merge = Some(side);
        let merged = merge.store(&mut store).unwrap();
        let later = commit(&mut store, "later", Some(side));
        // `side` was merged into main, so it is the closest shared commit.
        assert_eq!(find_common_ancestor(&store, merged, later).unwrap(), Some(side));
    }
}
