use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{error::Result, storage::Storage};

/// Name of the metadata directory at the root of every working tree.
pub const META_DIR: &str = ".rev";
pub const CONFIG_FILE: &str = "config";
pub const DEFAULT_BRANCH: &str = "master";

/// File and directory names skipped anywhere in the working tree.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ignores {
    set: BTreeSet<String>,
}

impl Ignores {
    pub fn new<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Ignores {
            set: names.into_iter().map(Into::into).collect(),
        }
    }

    /// The metadata directory is ignored whether or not it is listed.
    pub fn contains(&self, name: &str) -> bool {
        name == META_DIR || self.set.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.set.iter().map(String::as_str)
    }
}

impl Default for Ignores {
    fn default() -> Self {
        Ignores::new([".git", "target"])
    }
}

/// Per-repository settings, kept as pretty JSON in `.rev/config`.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The branch HEAD points at right after `init`.
    pub default_branch: String,
    pub ignores: Ignores,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_branch: String::from(DEFAULT_BRANCH),
            ignores: Ignores::default(),
        }
    }
}

impl Config {
    /// Reads the config from metadata storage, falling back to defaults when absent.
    pub fn load<S: Storage + ?Sized>(meta: &S) -> Result<Self> {
        match meta.read(CONFIG_FILE)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => {
                log::debug!("no {} file, using defaults", CONFIG_FILE);
                Ok(Config::default())
            }
        }
    }

    pub fn save<S: Storage + ?Sized>(&self, meta: &mut S) -> Result<()> {
        meta.write(CONFIG_FILE, &serde_json::to_vec_pretty(self)?)
    }
}
