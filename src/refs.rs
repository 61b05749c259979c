//! HEAD, branches, and walks over the commit graph.
//!
//! On disk, `HEAD` holds either `ref: refs/heads/<branch>` or a literal commit
//! digest (detached). Each `refs/heads/<name>` file holds the branch's commit
//! digest, or nothing for a branch that has no commits yet.

use std::collections::BTreeSet;

use crate::{
    commit::Commit,
    error::{Error, Result},
    object_id::{ObjectId, HEX_LEN},
    object_store::ObjectStore,
    storage::Storage,
};

pub const HEAD_FILE: &str = "HEAD";
pub const HEADS_DIR: &str = "refs/heads";
const SYMBOLIC_PREFIX: &str = "ref: ";
/// Shortest digest prefix accepted as a revision.
const MIN_PREFIX_LEN: usize = 4;

/// Where HEAD points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Branch(String),
    Detached(ObjectId),
}

impl Head {
    pub fn branch(&self) -> Option<&str> {
        match self {
            Head::Branch(name) => Some(name),
            Head::Detached(_) => None,
        }
    }

    fn encode(&self) -> String {
        match self {
            Head::Branch(name) => format!("{}{}\n", SYMBOLIC_PREFIX, branch_key(name)),
            Head::Detached(id) => format!("{}\n", id),
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::corrupt(HEAD_FILE, "not utf-8"))?
            .trim();
        match text.strip_prefix(SYMBOLIC_PREFIX) {
            Some(target) => target
                .trim()
                .strip_prefix(HEADS_DIR)
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|name| Head::Branch(name.to_string()))
                .ok_or_else(|| Error::corrupt(HEAD_FILE, format!("bad target {:?}", target))),
            None => Ok(Head::Detached(text.parse()?)),
        }
    }
}

pub fn branch_key(name: &str) -> String {
    format!("{}/{}", HEADS_DIR, name)
}

/// Branch names are `/`-separated segments of printable characters, without
/// the characters used by revision syntax.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let bad_segment = |segment: &str| {
        segment.is_empty()
            || segment.starts_with('.')
            || segment.starts_with('-')
            || segment
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || "~^:\\*?[".contains(c))
    };
    if name == HEAD_FILE || name.split('/').any(bad_segment) {
        return Err(Error::InvalidBranchName(name.to_string()));
    }
    Ok(())
}

/// Reference and history operations over a metadata [`Storage`].
pub trait RefGraph: ObjectStore {
    fn head(&self) -> Result<Head>;

    fn set_head(&mut self, head: &Head) -> Result<()>;

    /// The commit HEAD resolves to, following symbolic references, or `None`
    /// before the first commit.
    fn resolve_head(&self) -> Result<Option<ObjectId>>;

    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// The branch's tip; `None` if the branch has no commits yet.
    fn branch_tip(&self, name: &str) -> Result<Option<ObjectId>>;

    fn set_branch_tip(&mut self, name: &str, id: Option<ObjectId>) -> Result<()>;

    /// Creates `name` at the commit HEAD currently resolves to.
    fn create_branch(&mut self, name: &str) -> Result<()>;

    /// Points HEAD at `name`. Only the reference moves.
    fn switch(&mut self, name: &str) -> Result<()>;

    fn delete_branch(&mut self, name: &str) -> Result<()>;

    /// Branch names in lexicographic order.
    fn list_branches(&self) -> Result<Vec<String>>;

    /// Moves the checked-out branch, or a detached HEAD, to `id`.
    fn advance_head(&mut self, id: ObjectId) -> Result<()>;

    /// `id` followed by its first-parent ancestors, back to the root.
    fn ancestors(&self, id: ObjectId) -> Ancestors<'_, Self>;

    /// Resolves `HEAD`, a branch name, a full digest or a unique digest
    /// prefix, each optionally followed by `~N` to step back `N` first parents.
    fn resolve_rev(&self, rev: &str) -> Result<ObjectId>;
}

impl<S: Storage + ?Sized> RefGraph for S {
    fn head(&self) -> Result<Head> {
        let bytes = self
            .read(HEAD_FILE)?
            .ok_or_else(|| Error::corrupt(HEAD_FILE, "missing"))?;
        Head::decode(&bytes)
    }

    fn set_head(&mut self, head: &Head) -> Result<()> {
        log::info!("HEAD -> {}", head.encode().trim_end());
        self.write(HEAD_FILE, head.encode().as_bytes())
    }

    fn resolve_head(&self) -> Result<Option<ObjectId>> {
        let mut seen = BTreeSet::new();
        let mut key = String::from(HEAD_FILE);
        loop {
            if !seen.insert(key.clone()) {
                return Err(Error::CircularReference(key));
            }
            let bytes = match self.read(&key)? {
                Some(bytes) => bytes,
                None if key == HEAD_FILE => return Err(Error::corrupt(HEAD_FILE, "missing")),
                None => return Ok(None),
            };
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| Error::corrupt(&key, "not utf-8"))?
                .trim();
            if text.is_empty() {
                return Ok(None);
            }
            match text.strip_prefix(SYMBOLIC_PREFIX) {
                Some(target) => key = target.trim().to_string(),
                None => return Ok(Some(text.parse()?)),
            }
        }
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        validate_branch_name(name)?;
        self.exists(&branch_key(name))
    }

    fn branch_tip(&self, name: &str) -> Result<Option<ObjectId>> {
        validate_branch_name(name)?;
        let bytes = self
            .read(&branch_key(name))?
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| Error::corrupt(branch_key(name), "not utf-8"))?
            .trim();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text.parse()?))
        }
    }

    fn set_branch_tip(&mut self, name: &str, id: Option<ObjectId>) -> Result<()> {
        validate_branch_name(name)?;
        let text = id.map(|id| format!("{}\n", id)).unwrap_or_default();
        log::info!("{} -> {}", branch_key(name), text.trim_end());
        self.write(&branch_key(name), text.as_bytes())
    }

    fn create_branch(&mut self, name: &str) -> Result<()> {
        if self.branch_exists(name)? {
            return Err(Error::BranchAlreadyExists(name.to_string()));
        }
        let tip = self.resolve_head()?;
        self.set_branch_tip(name, tip)
    }

    fn switch(&mut self, name: &str) -> Result<()> {
        if !self.branch_exists(name)? {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        self.set_head(&Head::Branch(name.to_string()))
    }

    fn delete_branch(&mut self, name: &str) -> Result<()> {
        if !self.branch_exists(name)? {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        if self.head()?.branch() == Some(name) {
            return Err(Error::BranchInUse(name.to_string()));
        }
        log::info!("deleting branch {}", name);
        self.remove(&branch_key(name))?;
        Ok(())
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", HEADS_DIR);
        let mut names: Vec<String> = self
            .list(HEADS_DIR)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn advance_head(&mut self, id: ObjectId) -> Result<()> {
        match self.head()? {
            Head::Branch(name) => self.set_branch_tip(&name, Some(id)),
            Head::Detached(_) => self.set_head(&Head::Detached(id)),
        }
    }

    fn ancestors(&self, id: ObjectId) -> Ancestors<'_, Self> {
        Ancestors {
            store: self,
            next: Some(id),
            seen: BTreeSet::new(),
        }
    }

    fn resolve_rev(&self, rev: &str) -> Result<ObjectId> {
        let unknown = || Error::UnknownRevision(rev.to_string());
        let (base, steps) = match rev.split_once('~') {
            Some((base, "")) => (base, 1),
            Some((base, steps)) => (base, steps.parse::<usize>().map_err(|_| unknown())?),
            None => (rev, 0),
        };

        let mut id = if base == HEAD_FILE {
            self.resolve_head()?.ok_or(Error::NoCommits)?
        } else if validate_branch_name(base).is_ok() && self.exists(&branch_key(base))? {
            self.branch_tip(base)?.ok_or(Error::NoCommits)?
        } else if base.len() == HEX_LEN {
            let id: ObjectId = base.parse().map_err(|_| unknown())?;
            if Commit::load(self, id).is_err() {
                return Err(unknown());
            }
            id
        } else if base.len() >= MIN_PREFIX_LEN && base.chars().all(|c| c.is_ascii_hexdigit()) {
            let prefix = base.to_ascii_lowercase();
            let mut matches = Vec::new();
            for candidate in self.object_ids()? {
                if candidate.to_hex().starts_with(&prefix) && Commit::load(self, candidate).is_ok()
                {
                    matches.push(candidate);
                }
            }
            match matches.as_slice() {
                [] => return Err(unknown()),
                [only] => *only,
                _ => return Err(Error::AmbiguousRevision(rev.to_string())),
            }
        } else {
            return Err(unknown());
        };

        for _ in 0..steps {
            id = Commit::load(self, id)?.parent.ok_or_else(unknown)?;
        }
        Ok(id)
    }
}

/// First-parent walk from a commit back to the root.
///
/// Each item is loaded from the store before it is yielded, so a dangling
/// link surfaces as [`Error::ObjectNotFound`]. A digest seen twice yields
/// [`Error::CorruptHistory`]. The walk ends after the first error.
pub struct Ancestors<'a, S: ?Sized> {
    store: &'a S,
    next: Option<ObjectId>,
    seen: BTreeSet<ObjectId>,
}

impl<'a, S: ObjectStore + ?Sized> Iterator for Ancestors<'a, S> {
    type Item = Result<ObjectId>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        if !self.seen.insert(id) {
            log::error!("{} appears twice in its own history", id);
            return Some(Err(Error::CorruptHistory(id)));
        }
        match Commit::load(self.store, id) {
            Ok(commit) => {
                self.next = commit.parent;
                Some(Ok(id))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
