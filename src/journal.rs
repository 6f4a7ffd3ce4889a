//! Commit-journal access.
//!
//! The record tree is the working tree of a managed repository; the engine
//! only ever *reads* its history. [`CommitLog`] is the seam the change
//! deriver is written against: branch name, ordered commit log, and a flat
//! per-commit leaf manifest (file path → content id) for leaf-by-leaf tree
//! diffing. [`JournalLog`] is the shipped implementation — a directory of
//! content-addressed commit bodies:
//!
//! ```text
//! <repository>/HEAD              current branch name
//! <repository>/refs/<branch>     tip commit id
//! <repository>/commits/<id>.json commit body (author, timestamp, parent, manifest)
//! ```
//!
//! A commit id is the BLAKE3 hash of its serialized body under a domain tag,
//! so identical bodies hash identically and corruption is detectable.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const COMMIT_DOMAIN: &str = "folio-commit-v1";
const CONTENT_DOMAIN: &str = "folio-content-v1";

/// A commit identifier: the BLAKE3 hex digest of the commit body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hex: impl Into<String>) -> Self {
        CommitId(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the ordered commit log.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Flat leaf manifest: working-tree-relative file path → content id.
pub type Manifest = BTreeMap<String, String>;

/// Read access to a repository's history, newest first.
///
/// Implementations must return commits ordered from tip to root and must
/// never block on user interaction; failures map to
/// [`Error::VersionControl`].
pub trait CommitLog: Send + Sync {
    /// The currently checked-out branch name.
    fn branch(&self) -> Result<String>;

    /// The ordered commit log for the current branch, newest first.
    fn commits(&self) -> Result<Vec<CommitInfo>>;

    /// The leaf manifest of one commit's tree.
    fn manifest(&self, id: &CommitId) -> Result<Manifest>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitBody {
    author: String,
    timestamp: DateTime<Utc>,
    parent: Option<String>,
    manifest: Manifest,
}

/// The journal-directory implementation of [`CommitLog`].
#[derive(Debug, Clone)]
pub struct JournalLog {
    root: PathBuf,
}

impl JournalLog {
    /// Open an existing journal. Fails when the directory has no `HEAD`.
    pub fn open(root: impl Into<PathBuf>) -> Result<JournalLog> {
        let root = root.into();
        if !root.join("HEAD").is_file() {
            return Err(Error::VersionControl(format!(
                "no journal at {}",
                root.display()
            )));
        }
        Ok(JournalLog { root })
    }

    /// Create an empty journal with the given branch checked out.
    pub fn init(root: impl Into<PathBuf>, branch: &str) -> Result<JournalLog> {
        let root = root.into();
        fs::create_dir_all(root.join("commits")).map_err(versioned)?;
        fs::create_dir_all(root.join("refs")).map_err(versioned)?;
        fs::write(root.join("HEAD"), branch).map_err(versioned)?;
        Ok(JournalLog { root })
    }

    /// Append a commit on the current branch and advance the branch ref.
    pub fn append_commit(
        &self,
        author: &str,
        timestamp: DateTime<Utc>,
        manifest: Manifest,
    ) -> Result<CommitId> {
        let branch = self.branch()?;
        let parent = self.tip(&branch)?.map(|id| id.as_str().to_string());

        let body = CommitBody {
            author: author.to_string(),
            timestamp,
            parent,
            manifest,
        };
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| Error::VersionControl(format!("commit serialization: {e}")))?;
        let id = CommitId::new(hash_hex(COMMIT_DOMAIN, &bytes));

        fs::write(self.commit_path(&id), &bytes).map_err(versioned)?;
        fs::write(self.root.join("refs").join(&branch), id.as_str()).map_err(versioned)?;
        Ok(id)
    }

    /// Content id of one leaf's bytes, for building manifests.
    pub fn content_id(data: &[u8]) -> String {
        hash_hex(CONTENT_DOMAIN, data)
    }

    fn tip(&self, branch: &str) -> Result<Option<CommitId>> {
        let ref_path = self.root.join("refs").join(branch);
        match fs::read_to_string(&ref_path) {
            Ok(text) => Ok(Some(CommitId::new(text.trim().to_string()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(versioned(e)),
        }
    }

    fn commit_path(&self, id: &CommitId) -> PathBuf {
        self.root.join("commits").join(format!("{}.json", id))
    }

    fn read_body(&self, id: &CommitId) -> Result<CommitBody> {
        let path = self.commit_path(id);
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::VersionControl(format!("commit {id} unreadable: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::VersionControl(format!("commit {id} malformed: {e}")))
    }
}

impl CommitLog for JournalLog {
    fn branch(&self) -> Result<String> {
        let text = fs::read_to_string(self.root.join("HEAD")).map_err(versioned)?;
        Ok(text.trim().to_string())
    }

    fn commits(&self) -> Result<Vec<CommitInfo>> {
        let branch = self.branch()?;
        let mut log = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.tip(&branch)?;

        while let Some(id) = cursor {
            if !seen.insert(id.clone()) {
                return Err(Error::VersionControl(format!(
                    "commit cycle at {id} on branch {branch}"
                )));
            }
            let body = self.read_body(&id)?;
            cursor = body.parent.map(CommitId::new);
            log.push(CommitInfo {
                id,
                author: body.author,
                timestamp: body.timestamp,
            });
        }
        Ok(log)
    }

    fn manifest(&self, id: &CommitId) -> Result<Manifest> {
        Ok(self.read_body(id)?.manifest)
    }
}

fn versioned(err: std::io::Error) -> Error {
    Error::VersionControl(err.to_string())
}

fn hash_hex(domain: &str, data: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain.as_bytes());
    hasher.update(b":");
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}
