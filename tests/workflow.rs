use std::fs;

use rev::{
    ChangeKind, DirectoryStorage, Error, Head, MergeResult, ObjectStore, RefGraph, Repository,
    ResetMode,
};

fn write(repo: &Repository<DirectoryStorage>, path: &str, content: &str) {
    let full = repo.work_dir().join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

fn read(repo: &Repository<DirectoryStorage>, path: &str) -> String {
    fs::read_to_string(repo.work_dir().join(path)).unwrap()
}

#[test]
fn branch_edit_merge() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = Repository::init(dir.path()).unwrap();
    assert!(matches!(
        Repository::init(dir.path()),
        Err(Error::RepositoryAlreadyExists(_))
    ));

    write(&repo, "a.txt", "hello");
    repo.stage(&["a.txt"]).unwrap();
    let c1 = repo.commit("c1").unwrap();
    assert!(dir.path().join(".rev/objects").join(c1.to_hex()).is_file());
    assert_eq!(repo.resolve_head().unwrap(), Some(c1));

    repo.create_branch("feature").unwrap();
    repo.switch_branch("feature").unwrap();
    write(&repo, "a.txt", "hello world");
    let diff = repo.diff("HEAD").unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff.get("a.txt"), Some(ChangeKind::Modified));
    repo.stage(&["a.txt"]).unwrap();
    let c2 = repo.commit("c2").unwrap();
    assert_eq!(repo.load_commit(c2).unwrap().parent, Some(c1));

    repo.switch_branch("master").unwrap();
    assert_eq!(repo.head().unwrap(), Head::Branch("master".into()));
    let merged = match repo.merge_branch("feature").unwrap() {
        MergeResult::Merged { commit } => commit,
        other => panic!("unexpected {:?}", other),
    };
    let commit = repo.load_commit(merged).unwrap();
    assert_eq!(commit.parent, Some(c1));
    assert_eq!(commit.merge, Some(c2));
    assert_eq!(repo.meta().get(commit.snapshot.get("a.txt").unwrap()).unwrap(), b"hello world");
    assert_eq!(read(&repo, "a.txt"), "hello world");
    assert!(repo.diff("HEAD").unwrap().is_clean());

    // Everything survives reopening from disk.
    drop(repo);
    fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
    let repo = Repository::discover(&dir.path().join("nested/deeper")).unwrap();
    assert_eq!(repo.resolve_head().unwrap(), Some(merged));
    assert_eq!(repo.list_branches().unwrap(), vec!["feature", "master"]);
    let messages: Vec<String> = repo.history().unwrap().into_iter().map(|c| c.message).collect();
    assert_eq!(messages, vec!["Merge branch 'feature'", "c1"]);
}

#[test]
fn conflict_markers_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = Repository::init(dir.path()).unwrap();
    write(&repo, "notes/f.txt", "base");
    repo.stage(&["notes"]).unwrap();
    repo.commit("base").unwrap();
    repo.create_branch("other").unwrap();

    write(&repo, "notes/f.txt", "ours");
    repo.stage(&["notes/f.txt"]).unwrap();
    let ours = repo.commit("ours").unwrap();

    repo.switch_branch("other").unwrap();
    write(&repo, "notes/f.txt", "theirs");
    repo.stage(&["notes/f.txt"]).unwrap();
    repo.commit("theirs").unwrap();

    repo.switch_branch("master").unwrap();
    repo.reset("HEAD", ResetMode::Hard).unwrap();
    assert_eq!(read(&repo, "notes/f.txt"), "ours");

    let result = repo.merge_branch("other").unwrap();
    assert_eq!(
        result,
        MergeResult::Conflicted {
            conflicts: vec!["notes/f.txt".into()]
        }
    );
    assert!(matches!(result.into_result(), Err(Error::MergeConflict(_))));
    assert_eq!(repo.resolve_head().unwrap(), Some(ours));
    assert_eq!(
        read(&repo, "notes/f.txt"),
        "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> other\n"
    );
}

#[test]
fn ignored_and_metadata_paths_are_untracked() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = Repository::init(dir.path()).unwrap();
    write(&repo, "target/debug/out", "build output");
    write(&repo, "src/main.rs", "fn main() {}");
    let staged = repo.stage(&["."]).unwrap();
    assert_eq!(staged, vec!["src/main.rs"]);
    assert!(matches!(
        repo.stage(&[".rev/HEAD"]),
        Err(Error::Stage(_))
    ));
    repo.commit("initial").unwrap();
    assert!(repo.status().unwrap().unstaged.is_clean());
}

#[test]
fn open_outside_a_repository() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Repository::open(dir.path()),
        Err(Error::RepositoryNotInitialized(_))
    ));
}

#[test]
fn lock_blocks_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = Repository::init(dir.path()).unwrap();
    write(&repo, "a.txt", "a");
    let _held = rev::lock::RepoLock::acquire(&dir.path().join(".rev")).unwrap();
    assert!(matches!(repo.stage(&["a.txt"]), Err(Error::Locked)));
    assert!(repo.meta().branch_tip("master").unwrap().is_none());
}
