//! Query entry point and the coalescing read cache.
//!
//! Every query resolves to exactly one [`QueryOutcome`]. Record and type
//! files are read through [`ReadCache`], which guarantees at most one
//! in-flight read per path: concurrent callers for the same uncached file
//! park on a pending list and all receive the single read's result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};
use crate::library::security::Principal;
use crate::library::thing::{Thing, ThingId};
use crate::library::{externalize, read_guard, Change, ChangeKind, Library};

/// One query's inputs.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub resource_id: ThingId,
    pub principal: Principal,
    /// Serve the resolved type's schema instead of the record.
    pub metadata: bool,
    /// Serve the digital representation behind the id.
    pub representation: bool,
    /// Serve the compact summary form.
    pub summary: bool,
    pub offset: usize,
    /// Collection page size; the library default applies when unset.
    pub limit: Option<usize>,
}

impl QueryContext {
    pub fn new(resource_id: ThingId) -> QueryContext {
        QueryContext {
            resource_id,
            principal: Principal::anonymous(),
            metadata: false,
            representation: false,
            summary: false,
            offset: 0,
            limit: None,
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> QueryContext {
        self.principal = principal;
        self
    }
}

/// The five ways a query can end. Exactly one per query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    NotFound,
    /// Denied by an ACL; deliberately distinct from [`QueryOutcome::NotFound`].
    CannotRead,
    /// Serve this file's raw bytes.
    File(PathBuf),
    /// Serve this representation payload from the writable root.
    LocalContent(PathBuf),
    /// Serve this externalized JSON document.
    Object(Value),
}

impl Library {
    /// Resolve one resource for one principal.
    ///
    /// Ids under the change namespace are answered from change history.
    /// Everything else resolves through the path index, falling back to the
    /// parent library on a miss. Errors other than not-found and denial
    /// propagate to the transport boundary.
    pub async fn query(&self, ctx: &QueryContext) -> Result<QueryOutcome> {
        debug!(resource = %ctx.resource_id, "query");

        if ctx.resource_id.is_under(&self.changes_root) {
            return self.query_changes(ctx).await;
        }
        if ctx.representation {
            return self.query_representation(ctx).await;
        }

        let Some((lib, hit)) = self.resolving_library(&ctx.resource_id) else {
            return Ok(QueryOutcome::NotFound);
        };
        if !self.can_read(&hit.id, &ctx.principal) {
            return Ok(QueryOutcome::CannotRead);
        }
        if !hit.is_directory {
            return Ok(QueryOutcome::File(lib.raw_file_path(&hit.id)));
        }
        if ctx.metadata {
            return self.query_metadata(&hit.id).await;
        }

        let value = match lib.cache.read_json(&lib.record_path(&hit.id)).await {
            Ok(value) => value,
            Err(Error::NotFound(_)) => return Ok(QueryOutcome::NotFound),
            Err(e) => return Err(e),
        };
        let thing = Thing::from_value(hit.id.clone(), value)?;

        let object = if ctx.summary {
            externalize::summarize_thing(self, &thing, None)?
        } else {
            externalize::externalize_thing(self, &thing, ctx).await?
        };
        Ok(QueryOutcome::Object(object))
    }

    /// `<changes>` lists commits coarsely; `<changes>/<id>` expands one
    /// commit's members, filtered to what the principal may see.
    async fn query_changes(&self, ctx: &QueryContext) -> Result<QueryOutcome> {
        let changes = read_guard(&self.changes);
        let limit = ctx.limit.unwrap_or(self.settings.collection_limit);

        if ctx.resource_id == self.changes_root {
            let members: Vec<Value> = changes
                .iter()
                .skip(ctx.offset)
                .take(limit)
                .map(Change::coarse_json)
                .collect();
            return Ok(QueryOutcome::Object(json!({
                "limit": limit,
                "offset": ctx.offset,
                "totalCount": changes.len(),
                "members": members,
            })));
        }

        let Some(parent) = ctx.resource_id.parent() else {
            return Ok(QueryOutcome::NotFound);
        };
        if parent != self.changes_root {
            return Ok(QueryOutcome::NotFound);
        }
        let commit = ctx.resource_id.leaf();
        let Some(change) = changes.iter().find(|c| c.commit.as_str() == commit) else {
            return Ok(QueryOutcome::NotFound);
        };

        // Removed records stay visible; everything else must still exist
        // and pass the read ACL.
        let mut visible = Vec::new();
        for member in &change.members {
            let keep = match member.kind {
                ChangeKind::Removed => true,
                _ => {
                    self.can_read(&member.id, &ctx.principal)
                        && self.resolving_library(&member.id).is_some()
                }
            };
            if keep {
                visible.push(member);
            }
        }

        let total = visible.len();
        let members: Vec<Value> = visible
            .into_iter()
            .skip(ctx.offset)
            .take(limit)
            .map(|m| m.to_json())
            .collect();
        Ok(QueryOutcome::Object(json!({
            "id": change.commit.as_str(),
            "author": change.author,
            "timestamp": change.timestamp,
            "limit": limit,
            "offset": ctx.offset,
            "totalCount": total,
            "members": members,
        })))
    }

    /// Serve the link file's payload from the writable tree, walking up the
    /// parent chain when this library has no link for the id.
    async fn query_representation(&self, ctx: &QueryContext) -> Result<QueryOutcome> {
        let id = &ctx.resource_id;
        if !self.can_read(id, &ctx.principal) {
            return Ok(QueryOutcome::CannotRead);
        }

        let mut lib: &Library = self;
        let value = loop {
            match lib.cache.read_json(&lib.representation_link_path(id)).await {
                Ok(value) => break value,
                Err(Error::NotFound(_)) => match lib.parent.as_deref() {
                    Some(parent) => lib = parent,
                    None => return Ok(QueryOutcome::NotFound),
                },
                Err(e) => return Err(e),
            }
        };
        let link = Thing::from_value(id.clone(), value)?;
        let Some(file) = link.scalar_str("file") else {
            return Ok(QueryOutcome::NotFound);
        };
        Ok(QueryOutcome::LocalContent(
            lib.representation_payload_path(id, file),
        ))
    }

    /// Serve the resolved type's schema file through the cache.
    async fn query_metadata(&self, id: &ThingId) -> Result<QueryOutcome> {
        let Some(type_id) = self.resolve_type(id) else {
            return Ok(QueryOutcome::NotFound);
        };
        let mut lib: &Library = self;
        let path = loop {
            if lib.catalog.definition(&type_id).is_some() {
                break lib.type_path(&type_id);
            }
            match lib.parent.as_deref() {
                Some(parent) => lib = parent,
                None => return Ok(QueryOutcome::NotFound),
            }
        };
        match lib.cache.read_json(&path).await {
            Ok(value) => Ok(QueryOutcome::Object(value)),
            Err(Error::NotFound(_)) => Ok(QueryOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Read and parse a record anywhere in the library chain.
    pub(crate) async fn fetch_thing(&self, id: &ThingId) -> Result<Thing> {
        let Some((lib, hit)) = self.resolving_library(id) else {
            return Err(Error::NotFound(id.to_string()));
        };
        if !hit.is_directory {
            return Err(Error::NotFound(id.to_string()));
        }
        let value = lib.cache.read_json(&lib.record_path(&hit.id)).await?;
        Thing::from_value(hit.id, value)
    }
}

type PendingReads = HashMap<PathBuf, Vec<oneshot::Sender<Result<Arc<str>>>>>;

/// Raw-file cache with read coalescing.
///
/// Successful reads are cached forever (the tree is append-only between
/// restarts); failures are never cached. The `reads` counter counts actual
/// filesystem reads, which tests use to observe coalescing.
#[derive(Debug, Default)]
pub struct ReadCache {
    entries: Mutex<HashMap<PathBuf, Arc<str>>>,
    pending: Mutex<PendingReads>,
    reads: AtomicUsize,
}

impl ReadCache {
    /// Read a file's text, joining any read already in flight for the same
    /// path.
    pub async fn read_raw(&self, path: &Path) -> Result<Arc<str>> {
        if let Some(hit) = lock(&self.entries).get(path) {
            return Ok(hit.clone());
        }

        let waiter = {
            let mut pending = lock(&self.pending);
            // A read may have completed between the cache miss and taking
            // the pending lock.
            if let Some(hit) = lock(&self.entries).get(path) {
                return Ok(hit.clone());
            }
            match pending.get_mut(path) {
                Some(queue) => {
                    let (tx, rx) = oneshot::channel();
                    queue.push(tx);
                    Some(rx)
                }
                None => {
                    pending.insert(path.to_path_buf(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Io {
                    path: path.display().to_string(),
                    detail: "coalesced read abandoned".into(),
                }),
            };
        }

        self.reads.fetch_add(1, Ordering::Relaxed);
        let result = match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let text: Arc<str> = Arc::from(text);
                lock(&self.entries).insert(path.to_path_buf(), text.clone());
                Ok(text)
            }
            Err(e) => Err(Error::from_io(e, path, "stored file")),
        };

        let waiters = lock(&self.pending).remove(path).unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
        result
    }

    /// Read a file as JSON through the cache.
    pub async fn read_json(&self, path: &Path) -> Result<Value> {
        let text = self.read_raw(path).await?;
        serde_json::from_str(&text).map_err(|e| Error::parse(path, &e))
    }

    /// Overwrite one cached entry after a write-back.
    pub fn insert(&self, path: &Path, text: String) {
        lock(&self.entries).insert(path.to_path_buf(), Arc::from(text));
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of filesystem reads actually issued.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;

    #[tokio::test]
    async fn concurrent_reads_coalesce_into_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        std::fs::write(&path, "{\"name\": \"x\"}").unwrap();

        let cache = ReadCache::default();
        let reads = join_all((0..8).map(|_| cache.read_raw(&path))).await;
        for read in reads {
            assert_eq!(&*read.unwrap(), "{\"name\": \"x\"}");
        }
        assert_eq!(cache.read_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.json");

        let cache = ReadCache::default();
        assert!(matches!(
            cache.read_raw(&path).await,
            Err(Error::NotFound(_))
        ));

        std::fs::write(&path, "{}").unwrap();
        assert_eq!(&*cache.read_raw(&path).await.unwrap(), "{}");
        assert_eq!(cache.read_count(), 2);
    }

    #[tokio::test]
    async fn insert_overwrites_without_a_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        std::fs::write(&path, "old").unwrap();

        let cache = ReadCache::default();
        assert_eq!(&*cache.read_raw(&path).await.unwrap(), "old");
        cache.insert(&path, "new".to_string());
        assert_eq!(&*cache.read_raw(&path).await.unwrap(), "new");
        assert_eq!(cache.read_count(), 1);
    }

    #[tokio::test]
    async fn read_json_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{nope").unwrap();

        let cache = ReadCache::default();
        assert!(matches!(
            cache.read_json(&path).await,
            Err(Error::Parse { .. })
        ));
    }
}
