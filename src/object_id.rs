use blake3::Hash;
use serde::{Deserialize, Serialize};

use std::{fmt::Display, str::FromStr};

use crate::error::Error;

/// What an object holds, mixed into its [`ObjectId`] so that identical bytes
/// stored as different kinds never share an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Blob,
    Commit,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Commit => "commit",
        }
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identifier for a particular piece of typed binary content.
/// Under the hood, this is a [`blake3`] hash of `"<kind> <len>\0<bytes>"`.
///
/// It is displayed in hexadecimal format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(Hash);

/// Number of hexadecimal characters in a displayed [`ObjectId`].
pub const HEX_LEN: usize = blake3::OUT_LEN * 2;

impl ObjectId {
    /// Hashes `content` as an object of the given kind.
    pub fn hash(kind: ObjectKind, content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(content.len().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(content);
        ObjectId(hasher.finalize())
    }

    pub fn as_bytes(&self) -> &[u8; blake3::OUT_LEN] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; blake3::OUT_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|err| Error::corrupt(s, format!("not an object id: {}", err)))?;
        Ok(ObjectId(Hash::from(bytes)))
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[test]
fn test_hash_is_deterministic() {
    let a = ObjectId::hash(ObjectKind::Blob, b"hello");
    let b = ObjectId::hash(ObjectKind::Blob, b"hello");
    assert_eq!(a, b);
    assert_ne!(a, ObjectId::hash(ObjectKind::Blob, b"hellp"));
}

#[test]
fn test_kind_is_part_of_the_digest() {
    let blob = ObjectId::hash(ObjectKind::Blob, b"same bytes");
    let commit = ObjectId::hash(ObjectKind::Commit, b"same bytes");
    assert_ne!(blob, commit);
}

#[test]
fn test_hash_covers_the_header() {
    let expected = blake3::hash(b"blob 5\0hello");
    assert_eq!(ObjectId::hash(ObjectKind::Blob, b"hello").as_bytes(), expected.as_bytes());
}

#[test]
fn test_hex_parse() {
    let id = ObjectId::hash(ObjectKind::Commit, b"c1");
    let text = id.to_string();
    assert_eq!(text.len(), HEX_LEN);
    assert_eq!(text.parse::<ObjectId>().unwrap(), id);
    assert!("not-hex".parse::<ObjectId>().is_err());
    assert!(text[..10].parse::<ObjectId>().is_err());
}

#[test]
fn test_serde_as_hex_string() {
    let id = ObjectId::hash(ObjectKind::Blob, b"hello, world");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", id));
    let back: ObjectId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
