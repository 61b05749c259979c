use std::{
    fs::{self, create_dir_all},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{config::Ignores, error::Result, lock::RepoLock};

use super::Storage;

#[cfg(unix)]
const NEW_FILE_MODE: u32 = 0o644;

/// A persistent [`Storage`] rooted in a directory, mapping each key onto the
/// file at that relative path.
///
/// Writes go through a temporary file in the destination directory which is
/// then renamed into place, so readers never observe a half-written file.
/// Listing skips any entry whose name is in the [`Ignores`].
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
    ignores: Ignores,
}

impl DirectoryStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        Self::with_ignores(root, Ignores::new(Vec::<String>::new()))
    }

    pub fn with_ignores(root: PathBuf, ignores: Ignores) -> Result<Self> {
        if !root.try_exists()? {
            log::info!("creating directory storage root: {:?}", root);
            create_dir_all(&root)?;
        }
        Ok(Self { root, ignores })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    fn walk(&self, dir: &Path, key: &str, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    log::warn!("skipping non utf-8 file name {:?} in {:?}", name, dir);
                    continue;
                }
            };
            if self.ignores.contains(&name) {
                continue;
            }
            let child = if key.is_empty() {
                name
            } else {
                format!("{}/{}", key, name)
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &child, out)?;
            } else if file_type.is_file() {
                out.push(child);
            } else {
                log::warn!("skipping {:?}, only regular files are tracked", entry.path());
            }
        }
        Ok(())
    }

    /// Removes directories left empty by a removal, stopping at the root.
    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[cfg(unix)]
fn set_default_mode(file: &fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(NEW_FILE_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_default_mode(_file: &fs::File) -> Result<()> {
    Ok(())
}

impl Storage for DirectoryStorage {
    type Guard = RepoLock;

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        log::debug!("reading {:?}", path);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        log::debug!("writing {} bytes to {:?}", bytes.len(), path);
        let parent = path.parent().unwrap_or(self.root.as_path());
        create_dir_all(parent)?;
        let mut file = NamedTempFile::new_in(parent)?;
        file.write_all(bytes)?;
        // Temporary files start out private; keep the mode of the file being replaced.
        match fs::metadata(&path) {
            Ok(existing) => file.as_file().set_permissions(existing.permissions())?,
            Err(err) if err.kind() == ErrorKind::NotFound => set_default_mode(file.as_file())?,
            Err(err) => return Err(err.into()),
        }
        file.persist(&path).map_err(|err| err.error)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("removed {:?}", path);
                self.prune_empty_parents(&path);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        if prefix.split('/').any(|part| self.ignores.contains(part)) {
            return Ok(Vec::new());
        }
        let path = self.path(prefix);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        if metadata.is_dir() {
            self.walk(&path, prefix.trim_matches('/'), &mut out)?;
        } else if metadata.is_file() {
            out.push(prefix.to_string());
        }
        out.sort();
        Ok(out)
    }

    fn lock(&self) -> Result<Self::Guard> {
        RepoLock::acquire(&self.root)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        match fs::metadata(self.path(key)) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[test]
fn test_directory_storage() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut storage = DirectoryStorage::new(tempdir.path().into()).unwrap();
    storage.write("a/b.txt", b"hello, world").unwrap();
    storage.write("c.txt", b"c").unwrap();
    assert!(storage.exists("a/b.txt").unwrap());
    assert!(!storage.exists("a").unwrap());
    assert_eq!(storage.read("a/b.txt").unwrap(), Some(b"hello, world".to_vec()));
    assert_eq!(storage.read("missing").unwrap(), None);
    assert_eq!(storage.list("").unwrap(), vec!["a/b.txt", "c.txt"]);
    assert_eq!(storage.list("a").unwrap(), vec!["a/b.txt"]);
    assert_eq!(storage.list("c.txt").unwrap(), vec!["c.txt"]);

    storage.write("c.txt", b"overwritten").unwrap();
    assert_eq!(storage.read("c.txt").unwrap(), Some(b"overwritten".to_vec()));

    assert!(storage.remove("a/b.txt").unwrap());
    assert!(!tempdir.path().join("a").exists());
    assert!(!storage.remove("a/b.txt").unwrap());
}

#[test]
fn test_listing_skips_ignored_names() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut storage =
        DirectoryStorage::with_ignores(tempdir.path().into(), Ignores::new(["target"])).unwrap();
    storage.write("src/lib.rs", b"").unwrap();
    storage.write("target/debug/out", b"").unwrap();
    storage.write(".rev/HEAD", b"").unwrap();
    assert_eq!(storage.list("").unwrap(), vec!["src/lib.rs"]);
    assert!(storage.list("target").unwrap().is_empty());
}

#[cfg(unix)]
#[test]
fn test_rewrites_keep_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let tempdir = tempfile::tempdir().unwrap();
    let mut storage = DirectoryStorage::new(tempdir.path().into()).unwrap();
    let mode = |name: &str| {
        fs::metadata(tempdir.path().join(name)).unwrap().permissions().mode() & 0o777
    };

    storage.write("fresh.txt", b"new").unwrap();
    assert_eq!(mode("fresh.txt"), 0o644);

    let script = tempdir.path().join("run.sh");
    fs::write(&script, b"#!/bin/sh\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    storage.write("run.sh", b"#!/bin/sh\necho hi\n").unwrap();
    assert_eq!(mode("run.sh"), 0o755);
    assert_eq!(fs::read(&script).unwrap(), b"#!/bin/sh\necho hi\n");
}
