use std::{fmt, path::PathBuf};

use derive_more::{Display, From};

use crate::object_id::ObjectId;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while operating on a repository.
#[derive(Debug, Display, From)]
pub enum Error {
    #[display(fmt = "no repository found at {:?}", _0)]
    RepositoryNotInitialized(PathBuf),
    #[display(fmt = "repository already exists at {:?}", _0)]
    RepositoryAlreadyExists(PathBuf),
    #[display(fmt = "object not found: {}", _0)]
    ObjectNotFound(ObjectId),
    /// Storing these bytes would have replaced different bytes under the same digest.
    #[display(fmt = "integrity violation: {} already holds different content", _0)]
    IntegrityViolation(ObjectId),
    #[display(fmt = "corrupt record {}: {}", id, reason)]
    CorruptObject { id: String, reason: String },
    #[display(fmt = "branch not found: {}", _0)]
    BranchNotFound(String),
    #[display(fmt = "branch already exists: {}", _0)]
    BranchAlreadyExists(String),
    #[display(fmt = "cannot delete the checked-out branch: {}", _0)]
    BranchInUse(String),
    #[display(fmt = "invalid branch name: {:?}", _0)]
    InvalidBranchName(String),
    #[display(fmt = "invalid path: {:?}", _0)]
    InvalidPath(String),
    #[display(fmt = "path does not exist: {}", _0)]
    PathNotFound(String),
    #[display(fmt = "commit message cannot be empty")]
    EmptyCommitMessage,
    #[display(fmt = "no files staged for commit")]
    NoStagedFiles,
    #[display(fmt = "no commits yet")]
    NoCommits,
    #[display(fmt = "unknown revision: {}", _0)]
    UnknownRevision(String),
    #[display(fmt = "ambiguous revision: {}", _0)]
    AmbiguousRevision(String),
    #[display(fmt = "circular symbolic reference: {}", _0)]
    CircularReference(String),
    #[display(fmt = "no common ancestor, cannot merge")]
    NoCommonAncestor,
    /// A digest came around twice while walking parent links.
    #[display(fmt = "corrupt history: {} repeats in its own ancestry", _0)]
    CorruptHistory(ObjectId),
    #[display(fmt = "merge conflict in {}", _0)]
    MergeConflict(PathList),
    /// A conflicted merge is pending and these paths are not resolved in the index.
    #[display(fmt = "unresolved merge conflicts in {}", _0)]
    UnresolvedConflicts(PathList),
    /// Uncommitted working-tree changes would be overwritten.
    #[display(fmt = "local changes would be overwritten in {}", _0)]
    DirtyWorkTree(PathList),
    #[display(fmt = "failed to stage {}", _0)]
    Stage(StageFailures),
    #[display(fmt = "nothing to stash")]
    NothingToStash,
    #[display(fmt = "repository is locked by another process")]
    Locked,
    #[from]
    #[display(fmt = "i/o failure: {}", _0)]
    Io(std::io::Error),
    #[from]
    #[display(fmt = "malformed json: {}", _0)]
    Serde(serde_json::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Serde(err) => Some(err),
            _ => None,
        }
    }
}

impl Error {
    pub(crate) fn corrupt(id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::CorruptObject {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Repository-relative paths, printed comma separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathList(pub Vec<String>);

impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

/// The per-path failures collected by a batch staging call.
#[derive(Debug)]
pub struct StageFailures(pub Vec<(String, Error)>);

impl fmt::Display for StageFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (path, err)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", path, err)?;
        }
        Ok(())
    }
}
