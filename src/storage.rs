use crate::error::Result;

pub mod directory;
pub mod in_memory;

/// A namespace of byte files addressed by `/`-separated relative keys.
///
/// A [`Repository`](crate::repository::Repository) holds two of these: one for
/// the metadata directory and one for the working tree.
pub trait Storage {
    /// Held for the duration of a mutating command; dropping it releases the lock.
    type Guard;

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Returns whether something was removed.
    fn remove(&mut self, key: &str) -> Result<bool>;

    /// Every file key equal to `prefix` or nested below it, sorted.
    /// The empty prefix lists everything.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn lock(&self) -> Result<Self::Guard>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key)?.is_some())
    }
}

/// Whether `key` sits at or below `prefix` in the key hierarchy.
pub(crate) fn is_under(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}

#[test]
fn test_is_under() {
    assert!(is_under("a/b", ""));
    assert!(is_under("a/b", "a"));
    assert!(is_under("a", "a"));
    assert!(!is_under("ab/c", "a"));
    assert!(!is_under("a", "a/b"));
}
