//! The repository handle every command goes through.
//!
//! A [`Repository`] owns two [`Storage`]s: the metadata namespace (`.rev` on
//! disk) and the working tree. Mutating operations hold the repository lock
//! from their first read to their last write.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    commit::{Commit, CommitSummary},
    config::{Config, META_DIR},
    diff::{blob_id, diff_snapshots, diff_work_tree, Diff},
    error::{Error, PathList, Result, StageFailures},
    index::{Staged, StagingIndex, INDEX_FILE},
    merge::{
        find_common_ancestor, has_conflict_markers, load_files, three_way_merge, FileMap,
        MergeResult,
    },
    object_id::{ObjectId, ObjectKind},
    object_store::ObjectStore,
    refs::{Head, RefGraph, HEAD_FILE},
    snapshot::{is_canonical_path, normalize_path, Snapshot},
    storage::{directory::DirectoryStorage, in_memory::InMemoryStorage, is_under, Storage},
};

/// Records the tip being merged while a conflicted merge awaits its resolving commit.
pub const MERGE_HEAD_FILE: &str = "MERGE_HEAD";
/// The paths a conflicted merge left for the user to resolve, one per line.
pub const MERGE_CONFLICTS_FILE: &str = "MERGE_CONFLICTS";
pub const STASH_FILE: &str = "stash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Move the branch and clear the index; leave the working tree alone.
    Soft,
    /// Also rewrite the working tree to match the target commit.
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub tip: Option<ObjectId>,
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// `None` when HEAD is detached.
    pub branch: Option<String>,
    pub head: Option<ObjectId>,
    /// The index compared with the HEAD commit.
    pub staged: Diff,
    /// The working tree compared with what the next commit would contain.
    pub unstaged: Diff,
    /// Set while a conflicted merge is waiting to be committed.
    pub merging: Option<ObjectId>,
    /// Conflicting paths of that merge not yet resolved in the index.
    pub conflicts: Vec<String>,
}

pub struct Repository<S: Storage> {
    meta: S,
    tree: S,
}

impl Repository<DirectoryStorage> {
    /// Creates `.rev` under `root`.
    pub fn init(root: &Path) -> Result<Self> {
        let meta_dir = root.join(META_DIR);
        if meta_dir.try_exists()? {
            return Err(Error::RepositoryAlreadyExists(meta_dir));
        }
        let config = Config::default();
        let meta = DirectoryStorage::new(meta_dir)?;
        let tree = DirectoryStorage::with_ignores(root.to_path_buf(), config.ignores.clone())?;
        Self::init_with(meta, tree, &config)
    }

    /// Opens the repository whose working tree is `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let meta_dir = root.join(META_DIR);
        if !meta_dir.is_dir() {
            return Err(Error::RepositoryNotInitialized(root.to_path_buf()));
        }
        let meta = DirectoryStorage::new(meta_dir)?;
        let config = Config::load(&meta)?;
        let tree = DirectoryStorage::with_ignores(root.to_path_buf(), config.ignores)?;
        Self::from_parts(meta, tree)
    }

    /// Opens the repository containing `start`, looking in each parent directory in turn.
    pub fn discover(start: &Path) -> Result<Self> {
        let mut dir: Option<&Path> = Some(start);
        while let Some(candidate) = dir {
            if candidate.join(META_DIR).is_dir() {
                log::debug!("found repository at {:?}", candidate);
                return Self::open(candidate);
            }
            dir = candidate.parent();
        }
        Err(Error::RepositoryNotInitialized(PathBuf::from(start)))
    }

    pub fn work_dir(&self) -> &Path {
        self.tree.root()
    }
}

impl Repository<InMemoryStorage> {
    /// A fresh repository that lives entirely in memory.
    pub fn in_memory() -> Result<Self> {
        Self::init_with(InMemoryStorage::new(), InMemoryStorage::new(), &Config::default())
    }
}

impl<S: Storage> Repository<S> {
    /// Writes the initial metadata into `meta`: config, an empty index, and
    /// HEAD pointing at the default branch, which has no commits yet.
    pub fn init_with(mut meta: S, tree: S, config: &Config) -> Result<Self> {
        if meta.exists(HEAD_FILE)? {
            return Err(Error::RepositoryAlreadyExists(PathBuf::from(META_DIR)));
        }
        {
            let _guard = meta.lock()?;
            config.save(&mut meta)?;
            meta.set_branch_tip(&config.default_branch, None)?;
            meta.set_head(&Head::Branch(config.default_branch.clone()))?;
            StagingIndex::new().save(&mut meta, INDEX_FILE)?;
        }
        log::info!("initialized repository on branch {}", config.default_branch);
        Ok(Repository { meta, tree })
    }

    /// Wraps storages that already hold a repository.
    pub fn from_parts(meta: S, tree: S) -> Result<Self> {
        if !meta.exists(HEAD_FILE)? {
            return Err(Error::RepositoryNotInitialized(PathBuf::from(META_DIR)));
        }
        Ok(Repository { meta, tree })
    }

    pub fn meta(&self) -> &S {
        &self.meta
    }

    pub fn work_tree(&self) -> &S {
        &self.tree
    }

    pub fn work_tree_mut(&mut self) -> &mut S {
        &mut self.tree
    }

    pub fn config(&self) -> Result<Config> {
        Config::load(&self.meta)
    }

    pub fn head(&self) -> Result<Head> {
        self.meta.head()
    }

    pub fn resolve_head(&self) -> Result<Option<ObjectId>> {
        self.meta.resolve_head()
    }

    pub fn resolve_rev(&self, rev: &str) -> Result<ObjectId> {
        self.meta.resolve_rev(rev)
    }

    pub fn load_commit(&self, id: ObjectId) -> Result<Commit> {
        Commit::load(&self.meta, id)
    }

    pub fn index(&self) -> Result<StagingIndex> {
        StagingIndex::load(&self.meta, INDEX_FILE)
    }

    fn head_snapshot(&self) -> Result<Snapshot> {
        match self.meta.resolve_head()? {
            Some(id) => Ok(self.load_commit(id)?.snapshot),
            None => Ok(Snapshot::new()),
        }
    }

    fn merge_head(&self) -> Result<Option<ObjectId>> {
        match self.meta.read(MERGE_HEAD_FILE)? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Ok(Some(text.trim().parse()?))
            }
            None => Ok(None),
        }
    }

    fn merge_conflicts(&self) -> Result<Vec<String>> {
        match self.meta.read(MERGE_CONFLICTS_FILE)? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes)
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Conflicting paths of a pending merge whose staged state is not a
    /// resolution: unstaged, or staged with conflict markers still inside.
    fn unresolved_conflicts(&self, index: &StagingIndex) -> Result<Vec<String>> {
        let mut unresolved = Vec::new();
        for path in self.merge_conflicts()? {
            let resolved = match index.get(&path) {
                Some(Staged::Content(id)) => !has_conflict_markers(&self.meta.get(id)?),
                Some(Staged::Removed) => true,
                None => false,
            };
            if !resolved {
                unresolved.push(path);
            }
        }
        Ok(unresolved)
    }

    fn clear_merge_state(&mut self) -> Result<()> {
        self.meta.remove(MERGE_HEAD_FILE)?;
        self.meta.remove(MERGE_CONFLICTS_FILE)?;
        Ok(())
    }

    /// Stages each path: files get their current content, directories every
    /// file below them, and tracked files missing from the working tree a
    /// removal.
    ///
    /// A failing path does not stop the others; the successful ones are
    /// staged and every failure is reported together as [`Error::Stage`].
    pub fn stage<P: AsRef<str>>(&mut self, paths: &[P]) -> Result<Vec<String>> {
        let _guard = self.meta.lock()?;
        let head = self.head_snapshot()?;
        let mut index = self.index()?;
        let mut staged = Vec::new();
        let mut failures = Vec::new();
        for raw in paths {
            let raw = raw.as_ref();
            match self.stage_path(raw, &head, &mut index, &mut failures) {
                Ok(mut done) => staged.append(&mut done),
                Err(err) => {
                    log::warn!("could not stage {}: {}", raw, err);
                    failures.push((raw.to_string(), err));
                }
            }
        }
        index.save(&mut self.meta, INDEX_FILE)?;
        if failures.is_empty() {
            Ok(staged)
        } else {
            Err(Error::Stage(StageFailures(failures)))
        }
    }

    fn stage_path(
        &mut self,
        raw: &str,
        head: &Snapshot,
        index: &mut StagingIndex,
        failures: &mut Vec<(String, Error)>,
    ) -> Result<Vec<String>> {
        let path = normalize_path(raw)?;
        let live = self.tree.list(&path)?;
        let is_live = |candidate: &str| live.binary_search_by(|p| p.as_str().cmp(candidate)).is_ok();
        let removed: Vec<String> = head
            .paths()
            .filter(|tracked| is_under(tracked, &path) && !is_live(*tracked))
            .map(str::to_string)
            .collect();
        let forgotten: Vec<String> = index
            .iter()
            .map(|(staged, _)| staged)
            .filter(|staged| is_under(staged, &path) && !is_live(*staged) && !head.contains(staged))
            .map(str::to_string)
            .collect();
        if live.is_empty() && removed.is_empty() && forgotten.is_empty() {
            return Err(Error::PathNotFound(raw.to_string()));
        }

        // Names found by walking a directory must fit the line-based index format.
        let (live, unusable): (Vec<String>, Vec<String>) =
            live.into_iter().partition(|file| is_canonical_path(file));
        for file in unusable {
            log::warn!("cannot track {:?}", file);
            failures.push((file.clone(), Error::InvalidPath(file)));
        }

        for file in &live {
            let bytes = self
                .tree
                .read(file)?
                .ok_or_else(|| Error::PathNotFound(file.clone()))?;
            let id = self.meta.put(ObjectKind::Blob, &bytes)?;
            log::debug!("staged {} as {}", file, id);
            index.stage(file.clone(), Staged::Content(id));
        }
        for file in &removed {
            log::debug!("staged removal of {}", file);
            index.stage(file.clone(), Staged::Removed);
        }
        for file in &forgotten {
            index.unstage(file);
        }
        Ok(live.into_iter().chain(removed).collect())
    }

    /// Drops pending changes for each path (and everything below it) from the index.
    pub fn unstage<P: AsRef<str>>(&mut self, paths: &[P]) -> Result<usize> {
        let _guard = self.meta.lock()?;
        let mut index = self.index()?;
        let mut count = 0;
        for raw in paths {
            let path = normalize_path(raw.as_ref())?;
            let matching: Vec<String> = index
                .iter()
                .map(|(staged, _)| staged)
                .filter(|staged| is_under(staged, &path))
                .map(str::to_string)
                .collect();
            for staged in matching {
                index.unstage(&staged);
                count += 1;
            }
        }
        index.save(&mut self.meta, INDEX_FILE)?;
        Ok(count)
    }

    /// Records the staged changes on top of HEAD and advances the current branch.
    ///
    /// While a conflicted merge is pending, every conflicting path must be
    /// staged without conflict markers first.
    pub fn commit(&mut self, message: &str) -> Result<ObjectId> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::EmptyCommitMessage);
        }
        let _guard = self.meta.lock()?;
        let index = self.index()?;
        if index.is_empty() {
            return Err(Error::NoStagedFiles);
        }
        let merge = self.merge_head()?;
        if merge.is_some() {
            let unresolved = self.unresolved_conflicts(&index)?;
            if !unresolved.is_empty() {
                return Err(Error::UnresolvedConflicts(PathList(unresolved)));
            }
        }
        let parent = self.meta.resolve_head()?;
        let base = self.head_snapshot()?;
        let mut commit = Commit::new(message, index.apply(&base), parent);
        commit.merge = merge;

        let id = commit.store(&mut self.meta)?;
        self.meta.advance_head(id)?;
        StagingIndex::new().save(&mut self.meta, INDEX_FILE)?;
        self.clear_merge_state()?;
        log::info!("committed {} ({} files)", id, commit.snapshot.len());
        Ok(id)
    }

    pub fn status(&self) -> Result<Status> {
        let head = self.meta.resolve_head()?;
        let base = self.head_snapshot()?;
        let index = self.index()?;
        let next = index.apply(&base);
        let merging = self.merge_head()?;
        let conflicts = match merging {
            Some(_) => self.unresolved_conflicts(&index)?,
            None => Vec::new(),
        };
        Ok(Status {
            branch: self.meta.head()?.branch().map(str::to_string),
            head,
            staged: diff_snapshots(&base, &next),
            unstaged: diff_work_tree(&next, &self.tree)?,
            merging,
            conflicts,
        })
    }

    /// First-parent history from HEAD back to the root commit.
    pub fn history(&self) -> Result<Vec<CommitSummary>> {
        let head = match self.meta.resolve_head()? {
            Some(head) => head,
            None => return Ok(Vec::new()),
        };
        self.meta
            .ancestors(head)
            .map(|id| {
                let id = id?;
                Ok(self.load_commit(id)?.summary(id))
            })
            .collect()
    }

    pub fn create_branch(&mut self, name: &str) -> Result<()> {
        let _guard = self.meta.lock()?;
        self.meta.create_branch(name)?;
        log::info!("created branch {}", name);
        Ok(())
    }

    /// Points HEAD at `name`; the working tree is left as it is.
    pub fn switch_branch(&mut self, name: &str) -> Result<()> {
        let _guard = self.meta.lock()?;
        self.meta.switch(name)
    }

    pub fn delete_branch(&mut self, name: &str) -> Result<()> {
        let _guard = self.meta.lock()?;
        self.meta.delete_branch(name)
    }

    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.meta.list_branches()
    }

    pub fn branches(&self) -> Result<Vec<BranchInfo>> {
        let head = self.meta.head()?;
        self.meta
            .list_branches()?
            .into_iter()
            .map(|name| {
                Ok(BranchInfo {
                    tip: self.meta.branch_tip(&name)?,
                    current: head.branch() == Some(name.as_str()),
                    name,
                })
            })
            .collect()
    }

    /// The working tree compared with the commit `rev` names.
    pub fn diff(&self, rev: &str) -> Result<Diff> {
        let id = self.meta.resolve_rev(rev)?;
        diff_work_tree(&self.load_commit(id)?.snapshot, &self.tree)
    }

    /// What changed between two stored commits.
    pub fn diff_commits(&self, from: &str, to: &str) -> Result<Diff> {
        let from = self.load_commit(self.meta.resolve_rev(from)?)?;
        let to = self.load_commit(self.meta.resolve_rev(to)?)?;
        Ok(diff_snapshots(&from.snapshot, &to.snapshot))
    }

    /// Merges branch `name` into HEAD.
    ///
    /// Without conflicts the result is committed on the current branch, with
    /// the merged branch's tip recorded as the merge link, and the incoming
    /// changes are written to the working tree. With conflicts nothing is
    /// committed: the working tree receives the incoming changes with
    /// conflict markers in the conflicting files, the clean changes are
    /// staged, and the next commit concludes the merge once every conflict
    /// is resolved.
    ///
    /// Nothing is written if the merge would overwrite working-tree content
    /// that matches neither our commit nor the merge result.
    pub fn merge_branch(&mut self, name: &str) -> Result<MergeResult> {
        let _guard = self.meta.lock()?;
        let ours = self.meta.resolve_head()?;
        let theirs = self.meta.branch_tip(name)?;
        if ours == theirs {
            log::info!("{} is already up to date", name);
            return Ok(MergeResult::UpToDate);
        }
        let (ours, theirs) = match (ours, theirs) {
            (Some(ours), Some(theirs)) => (ours, theirs),
            _ => return Err(Error::NoCommonAncestor),
        };
        let base = find_common_ancestor(&self.meta, ours, theirs)?.ok_or(Error::NoCommonAncestor)?;
        if base == theirs {
            log::info!("{} is already merged", name);
            return Ok(MergeResult::UpToDate);
        }

        let base_files = load_files(&self.meta, &self.load_commit(base)?.snapshot)?;
        let our_snapshot = self.load_commit(ours)?.snapshot;
        let our_files = load_files(&self.meta, &our_snapshot)?;
        let their_files = load_files(&self.meta, &self.load_commit(theirs)?.snapshot)?;
        let output = three_way_merge(&base_files, &our_files, &their_files, name);

        let dirty = self.overwritten_changes(&our_snapshot, &output.merged)?;
        if !dirty.is_empty() {
            log::warn!("refusing to merge {} over local changes", name);
            return Err(Error::DirtyWorkTree(PathList(dirty)));
        }

        if output.conflicts.is_empty() {
            let mut snapshot = Snapshot::new();
            for (path, content) in &output.merged {
                snapshot.insert(path.clone(), self.meta.put(ObjectKind::Blob, content)?);
            }
            let mut commit = Commit::new(&format!("Merge branch '{}'", name), snapshot, Some(ours));
            commit.merge = Some(theirs);
            let id = commit.store(&mut self.meta)?;
            self.meta.advance_head(id)?;
            self.write_incoming(&our_files, &output.merged)?;
            log::info!("merged {} into {}", name, id);
            return Ok(MergeResult::Merged { commit: id });
        }

        let mut index = self.index()?;
        for (path, content) in &output.merged {
            if output.conflicts.contains(path) || our_files.get(path) == Some(content) {
                continue;
            }
            let id = self.meta.put(ObjectKind::Blob, content)?;
            index.stage(path.clone(), Staged::Content(id));
        }
        for path in our_files.keys() {
            if !output.merged.contains_key(path) {
                index.stage(path.clone(), Staged::Removed);
            }
        }
        index.save(&mut self.meta, INDEX_FILE)?;
        let conflicts: Vec<String> = output.conflicts.iter().cloned().collect();
        let mut listing = conflicts.join("\n");
        listing.push('\n');
        self.meta
            .write(MERGE_HEAD_FILE, format!("{}\n", theirs).as_bytes())?;
        self.meta.write(MERGE_CONFLICTS_FILE, listing.as_bytes())?;
        self.write_incoming(&our_files, &output.merged)?;

        log::warn!("merge of {} stopped on {} conflicts", name, conflicts.len());
        Ok(MergeResult::Conflicted { conflicts })
    }

    /// Paths that going from `ours` to `merged` would rewrite, and whose
    /// working-tree content matches neither side.
    fn overwritten_changes(&self, ours: &Snapshot, merged: &FileMap) -> Result<Vec<String>> {
        let touched: BTreeSet<&str> = merged.keys().map(String::as_str).chain(ours.paths()).collect();
        let mut dirty = Vec::new();
        for path in touched {
            let expected = ours.get(path);
            let target = merged
                .get(path)
                .map(|content| ObjectId::hash(ObjectKind::Blob, content));
            if expected == target {
                continue;
            }
            let live = blob_id(&self.tree, path)?;
            if live != expected && live != target {
                dirty.push(path.to_string());
            }
        }
        Ok(dirty)
    }

    /// Brings the working tree from `ours` to `merged`, touching only the paths that differ.
    fn write_incoming(&mut self, ours: &FileMap, merged: &FileMap) -> Result<()> {
        for (path, content) in merged {
            if ours.get(path) != Some(content) {
                self.tree.write(path, content)?;
            }
        }
        for path in ours.keys() {
            if !merged.contains_key(path) {
                self.tree.remove(path)?;
            }
        }
        Ok(())
    }

    /// Moves the current branch (or detached HEAD) to `rev` and clears the index.
    pub fn reset(&mut self, rev: &str, mode: ResetMode) -> Result<ObjectId> {
        let _guard = self.meta.lock()?;
        let target = self.meta.resolve_rev(rev)?;
        let snapshot = self.load_commit(target)?.snapshot;
        let previous = self.head_snapshot()?;

        self.meta.advance_head(target)?;
        StagingIndex::new().save(&mut self.meta, INDEX_FILE)?;
        self.clear_merge_state()?;

        if mode == ResetMode::Hard {
            for path in previous.paths() {
                if !snapshot.contains(path) {
                    self.tree.remove(path)?;
                }
            }
            for (path, id) in snapshot.iter() {
                if blob_id(&self.tree, path)? != Some(id) {
                    let content = self.meta.get(id)?;
                    self.tree.write(path, &content)?;
                }
            }
        }
        log::info!("reset to {} ({:?})", target, mode);
        Ok(target)
    }

    /// Moves everything staged onto the stash and clears the index.
    pub fn stash(&mut self) -> Result<usize> {
        let _guard = self.meta.lock()?;
        let index = self.index()?;
        if index.is_empty() {
            return Err(Error::NothingToStash);
        }
        let count = index.len();
        let mut stash = StagingIndex::load(&self.meta, STASH_FILE)?;
        stash.extend(index);
        stash.save(&mut self.meta, STASH_FILE)?;
        StagingIndex::new().save(&mut self.meta, INDEX_FILE)?;
        log::info!("stashed {} entries", count);
        Ok(count)
    }

    /// Restores the stash into the index, stashed entries taking precedence.
    pub fn stash_pop(&mut self) -> Result<usize> {
        let _guard = self.meta.lock()?;
        let stash = StagingIndex::load(&self.meta, STASH_FILE)?;
        if stash.is_empty() {
            return Err(Error::NothingToStash);
        }
        let count = stash.len();
        let mut index = self.index()?;
        index.extend(stash);
        index.save(&mut self.meta, INDEX_FILE)?;
        self.meta.remove(STASH_FILE)?;
        Ok(count)
    }
}
