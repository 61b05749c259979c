use std::collections::{btree_map, BTreeMap};

use serde::{Deserialize, Serialize};

use crate::{
    config::META_DIR,
    error::{Error, Result},
    object_id::ObjectId,
};

/// The full set of tracked files at one point in history: repository-relative
/// path to the [`ObjectId`] of the file's blob.
///
/// Paths are kept in lexicographic order so that serialization and
/// comparison are deterministic.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<String, ObjectId>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<ObjectId> {
        self.entries.get(path).copied()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, path: String, id: ObjectId) -> Option<ObjectId> {
        self.entries.insert(path, id)
    }

    pub fn remove(&mut self, path: &str) -> Option<ObjectId> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.entries.iter().map(|(path, id)| (path.as_str(), *id))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Appends one `<digest> <path>` line per entry.
    pub(crate) fn write_lines(&self, out: &mut String) {
        for (path, id) in &self.entries {
            out.push_str(&format!("{} {}\n", id, path));
        }
    }
}

impl FromIterator<(String, ObjectId)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, ObjectId)>>(iter: I) -> Self {
        Snapshot {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, ObjectId);
    type IntoIter = btree_map::IntoIter<String, ObjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Parses a `<digest> <path>` line.
pub(crate) fn parse_entry(line: &str) -> Option<(ObjectId, &str)> {
    let (id, path) = line.split_once(' ')?;
    let id = id.parse().ok()?;
    if path.is_empty() {
        return None;
    }
    Some((id, path))
}

/// Turns a user-supplied path into the canonical repository-relative form:
/// `/`-separated, no `.` components, no trailing slash.
///
/// Absolute paths, `..` components and anything inside the metadata
/// directory are rejected. The empty result stands for the repository root.
pub fn normalize_path(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(Error::InvalidPath(raw.to_string()));
    }
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(Error::InvalidPath(raw.to_string())),
            META_DIR => return Err(Error::InvalidPath(raw.to_string())),
            part if part.contains(|c: char| c == '\n' || c == '\r') => {
                return Err(Error::InvalidPath(raw.to_string()))
            }
            part => parts.push(part),
        }
    }
    Ok(parts.join("/"))
}

/// Whether `path` names a file exactly as [`normalize_path`] would write it.
pub(crate) fn is_canonical_path(path: &str) -> bool {
    !path.is_empty() && normalize_path(path).map_or(false, |normal| normal == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_id::ObjectKind;

    #[test]
    fn lines_are_sorted_by_path() {
        let a = ObjectId::hash(ObjectKind::Blob, b"a");
        let b = ObjectId::hash(ObjectKind::Blob, b"b");
        let snapshot: Snapshot = vec![("z.txt".to_string(), a), ("dir/b.txt".to_string(), b)]
            .into_iter()
            .collect();
        let mut text = String::new();
        snapshot.write_lines(&mut text);
        assert_eq!(text, format!("{} dir/b.txt\n{} z.txt\n", b, a));
    }

    #[test]
    fn entry_lines_keep_spaces_in_paths() {
        let id = ObjectId::hash(ObjectKind::Blob, b"x");
        let line = format!("{} notes/my file.txt", id);
        assert_eq!(parse_entry(&line), Some((id, "notes/my file.txt")));
        assert_eq!(parse_entry("parent"), None);
        assert_eq!(parse_entry(&format!("{} ", id)), None);
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path("./a//b/").unwrap(), "a/b");
        assert_eq!(normalize_path("dir\\file.txt").unwrap(), "dir/file.txt");
        assert_eq!(normalize_path(".").unwrap(), "");
        assert!(matches!(normalize_path("/etc/passwd"), Err(Error::InvalidPath(_))));
        assert!(matches!(normalize_path("a/../b"), Err(Error::InvalidPath(_))));
        assert!(matches!(normalize_path(".rev/HEAD"), Err(Error::InvalidPath(_))));
        assert!(matches!(normalize_path("a/b\rc"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn canonical_paths() {
        assert!(is_canonical_path("dir/file.txt"));
        assert!(!is_canonical_path(""));
        assert!(!is_canonical_path("dir\\file.txt"));
        assert!(!is_canonical_path("../x"));
        assert!(!is_canonical_path("d/bad\nname"));
    }
}
