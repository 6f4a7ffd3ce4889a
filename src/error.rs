//! Engine error taxonomy.
//!
//! `NotFound` and `PermissionDenied` are deliberately distinct so the outcome
//! boundary can answer "missing" and "forbidden" differently. Variants carry
//! owned strings rather than source errors so a single result can be cloned
//! to every waiter parked on a coalesced read.

/// Errors produced by the library engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A required library parameter is missing or unusable. Fatal at
    /// construction; never produced afterwards.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A type referenced during inheritance merging does not exist.
    /// Fatal at construction.
    #[error("type {type_id} references unknown type {missing}")]
    TypeResolution { type_id: String, missing: String },

    /// The resource does not exist in this library or any parent.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The principal may not access the resource.
    #[error("access denied: {0}")]
    PermissionDenied(String),

    /// A stored record or type-schema file could not be parsed.
    #[error("malformed file {path}: {detail}")]
    Parse { path: String, detail: String },

    /// The commit journal could not be read or walked. Change history
    /// degrades to empty rather than failing the library.
    #[error("version control error: {0}")]
    VersionControl(String),

    /// An I/O failure other than "file absent".
    #[error("i/o error on {path}: {detail}")]
    Io { path: String, detail: String },
}

impl Error {
    /// Wrap an I/O failure, folding `NotFound` into the resource-level
    /// [`Error::NotFound`] so parent-library fallback can absorb it.
    pub(crate) fn from_io(err: std::io::Error, path: &std::path::Path, resource: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            Error::Io {
                path: path.display().to_string(),
                detail: format!("{resource}: {err}"),
            }
        }
    }

    pub(crate) fn parse(path: &std::path::Path, err: &serde_json::Error) -> Self {
        Error::Parse {
            path: path.display().to_string(),
            detail: err.to_string(),
        }
    }
}

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;
