//! On-disk repository used by the in-process engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::cid;

const CONFIG_FILE: &str = "config.json";
const BLOCKS_DIR: &str = "blocks";
const REPO_VERSION: u32 = 1;

/// Persistent repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RepoConfig {
    /// The node's identity.
    pub peer_id: String,
    /// When the repository was created.
    pub created_at: DateTime<Utc>,
    /// Layout version.
    #[serde(default = "default_version")]
    pub version: u32,
}

const fn default_version() -> u32 {
    REPO_VERSION
}

/// A repository directory: `config.json` plus one file per block.
#[derive(Debug, Clone)]
pub(crate) struct Repo {
    root: PathBuf,
    config: RepoConfig,
}

impl Repo {
    /// Opens the repository at `root`, initializing it when the directory is
    /// missing or empty.
    pub fn open_or_create(root: &Path) -> io::Result<Self> {
        if is_missing_or_empty(root)? {
            Self::create(root)
        } else {
            Self::open(root)
        }
    }

    fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root.join(BLOCKS_DIR))?;

        let config = RepoConfig {
            peer_id: cid::random_peer_id(),
            created_at: Utc::now(),
            version: REPO_VERSION,
        };
        let encoded = serde_json::to_vec_pretty(&config).map_err(invalid_data)?;
        fs::write(root.join(CONFIG_FILE), encoded)?;

        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    fn open(root: &Path) -> io::Result<Self> {
        let raw = fs::read(root.join(CONFIG_FILE))?;
        let config: RepoConfig = serde_json::from_slice(&raw).map_err(invalid_data)?;
        fs::create_dir_all(root.join(BLOCKS_DIR))?;

        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.config.peer_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores a block. Existing blocks are left untouched.
    pub fn put(&self, cid: &str, data: &[u8]) -> io::Result<()> {
        let path = self.block_path(cid);
        if path.exists() {
            return Ok(());
        }

        let staging = self
            .root
            .join(BLOCKS_DIR)
            .join(format!("{cid}.{:016x}.tmp", rand::random::<u64>()));
        fs::write(&staging, data)?;
        fs::rename(staging, path)
    }

    /// Reads a block, `None` if it is not stored here.
    pub fn get(&self, cid: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.block_path(cid)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn block_path(&self, cid: &str) -> PathBuf {
        self.root.join(BLOCKS_DIR).join(cid)
    }
}

fn is_missing_or_empty(root: &Path) -> io::Result<bool> {
    match fs::read_dir(root) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err),
    }
}

fn invalid_data(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
