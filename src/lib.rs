//! # Revision Control
//!
//! The core of a snapshot-based version control system: a content-addressed
//! object store, named branches over a commit graph, snapshot diffing and
//! three-way merging. Everything runs on top of the [`Storage`] trait, so a
//! repository can live in a directory or entirely in memory.

/// Commit records and their line-oriented encoding.
pub mod commit;
/// Repository configuration and ignore rules.
pub mod config;
/// Comparing snapshots with each other and with the working tree.
pub mod diff;
pub mod error;
/// The staging area between the working tree and the next commit.
pub mod index;
/// Exclusive lock over a repository's metadata directory.
pub mod lock;
/// Common-ancestor search and three-way merging.
pub mod merge;
/// Hash-based binary object identifier.
pub mod object_id;
/// Content addressible store API using the [`ObjectId`].
pub mod object_store;
/// HEAD, branches and revision lookup.
pub mod refs;
pub mod repository;
/// A mapping from file paths to blob ids.
pub mod snapshot;
/// Keyed byte storage backing both metadata and the working tree.
pub mod storage;

pub use commit::{Commit, CommitSummary};
pub use config::Config;
pub use diff::{Change, ChangeKind, Diff};
pub use error::{Error, Result};
pub use merge::MergeResult;
pub use object_id::{ObjectId, ObjectKind};
pub use object_store::ObjectStore;
pub use refs::{Head, RefGraph};
pub use repository::{BranchInfo, Repository, ResetMode, Status};
pub use snapshot::Snapshot;
pub use storage::{directory::DirectoryStorage, in_memory::InMemoryStorage, Storage};
