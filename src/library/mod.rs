//! Library assembly and lifecycle.
//!
//! A [`Library`] is built synchronously from one scan of its record tree
//! (type catalog plus path index), then [`Library::initialize`] finishes the
//! asynchronous phase: representation ACLs, the root library's email index,
//! and change history. Queries are served through [`Library::query`].

pub mod catalog;
mod externalize;
pub mod history;
pub mod paths;
pub mod query;
pub mod security;
pub mod thing;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::journal::JournalLog;
use crate::throttle::Throttle;

pub use catalog::{PropertyDef, TypeCatalog, TypeDefinition};
pub use history::{Change, ChangeKind, ChangeMember};
pub use paths::{PathIndex, Resolved, Scan};
pub use query::{QueryContext, QueryOutcome, ReadCache};
pub use security::Principal;
pub use thing::{PropertyValue, Reference, Thing, ThingId};

/// Sentinel file that makes a directory a record.
pub const THING_FILE: &str = "thing.json";
/// Sentinel file that makes a record directory also declare a type.
pub const TYPE_FILE: &str = "type.json";

/// Everything a library needs to know about itself. Built from
/// configuration; validated by [`Library::open`].
#[derive(Debug, Clone)]
pub struct LibrarySettings {
    pub name: String,
    /// Leading path segment of every generated href.
    pub application_name: String,
    pub home_path: PathBuf,
    pub writable_path: PathBuf,
    pub repository_path: PathBuf,
    pub collections_path: String,
    pub changes_path: String,
    pub accounts_path: String,
    pub collection_limit: usize,
    pub change_window_days: i64,
    pub read_limit: usize,
}

/// Outcome of the asynchronous initialization phase. Failures along the way
/// become warnings; the library still comes up.
#[derive(Debug, Default)]
pub struct InitReport {
    pub representation_acls: usize,
    pub accounts_indexed: usize,
    pub changes: usize,
    pub warnings: Vec<String>,
}

/// Counters for the stats command.
#[derive(Debug, Clone)]
pub struct LibraryStats {
    pub name: String,
    pub records: usize,
    pub types: usize,
    pub changes: usize,
    pub cached_files: usize,
    pub file_reads: usize,
}

/// One knowledge library: a typed record tree, its indexes, its ACLs, and
/// its change history. Libraries chain upward through an optional parent;
/// the child never mutates the parent.
pub struct Library {
    pub(crate) settings: LibrarySettings,
    pub(crate) parent: Option<Arc<Library>>,
    pub(crate) catalog: TypeCatalog,
    pub(crate) index: PathIndex,
    pub(crate) read_acls: RwLock<security::AclMap>,
    pub(crate) write_acls: RwLock<security::AclMap>,
    /// Representation ids harvested by the scan, consumed by `initialize`.
    pub(crate) representations: Vec<ThingId>,
    pub(crate) cache: ReadCache,
    pub(crate) changes: RwLock<Vec<Change>>,
    pub(crate) accounts_by_email: RwLock<BTreeMap<String, ThingId>>,
    pub(crate) journal: Option<JournalLog>,
    pub(crate) throttle: Throttle,
    pub(crate) collections_root: ThingId,
    pub(crate) changes_root: ThingId,
    pub(crate) accounts_root: ThingId,
}

impl Library {
    /// Construct a library synchronously: validate settings, load the type
    /// catalog, scan the record tree. Missing required settings and broken
    /// type inheritance are fatal; a missing commit journal only disables
    /// change history.
    pub fn open(settings: LibrarySettings, parent: Option<Arc<Library>>) -> Result<Library> {
        if settings.name.is_empty() {
            return Err(Error::Configuration("library name is required".into()));
        }
        if settings.home_path.as_os_str().is_empty() {
            return Err(Error::Configuration("library home path is required".into()));
        }
        if !settings.home_path.is_dir() {
            return Err(Error::Configuration(format!(
                "library home {} is not a directory",
                settings.home_path.display()
            )));
        }

        let catalog = TypeCatalog::load(&settings.home_path)?;
        let scan = PathIndex::scan(&settings.home_path)?;
        let journal = match JournalLog::open(&settings.repository_path) {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!(library = %settings.name, error = %e, "change history disabled");
                None
            }
        };

        info!(
            library = %settings.name,
            records = scan.index.record_count(),
            types = catalog.len(),
            "library opened"
        );

        Ok(Library {
            collections_root: ThingId::new(&settings.collections_path),
            changes_root: ThingId::new(&settings.changes_path),
            accounts_root: ThingId::new(&settings.accounts_path),
            throttle: Throttle::new(settings.read_limit),
            parent,
            catalog,
            index: scan.index,
            read_acls: RwLock::new(scan.read_acls),
            write_acls: RwLock::new(scan.write_acls),
            representations: scan.representations.into_iter().collect(),
            cache: ReadCache::default(),
            changes: RwLock::new(Vec::new()),
            accounts_by_email: RwLock::new(BTreeMap::new()),
            journal,
            settings,
        })
    }

    /// Finish bringing the library up: load representation ACLs, build the
    /// root library's email index, compute change history. Partial failure
    /// is reported, never fatal.
    pub async fn initialize(&self) -> InitReport {
        let mut report = InitReport::default();

        let tasks: Vec<_> = self
            .representations
            .iter()
            .map(|id| self.load_representation_acl(id))
            .collect();
        for (id, outcome) in self.representations.iter().zip(self.throttle.run(tasks).await) {
            match outcome {
                Ok(true) => report.representation_acls += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(representation = %id, error = %e, "representation ACL not loaded");
                    report.warnings.push(format!("representation {id}: {e}"));
                }
            }
        }

        if self.parent.is_none() {
            let accounts: Vec<ThingId> = self
                .index
                .record_ids()
                .into_iter()
                .filter(|id| id.is_under(&self.accounts_root) && *id != self.accounts_root)
                .collect();
            let tasks: Vec<_> = accounts.iter().map(|id| self.account_email(id)).collect();
            for (id, outcome) in accounts.iter().zip(self.throttle.run(tasks).await) {
                match outcome {
                    Ok(Some(email)) => {
                        write_guard(&self.accounts_by_email).insert(email, id.clone());
                        report.accounts_indexed += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(account = %id, error = %e, "account not indexed");
                        report.warnings.push(format!("account {id}: {e}"));
                    }
                }
            }
        }

        if let Some(journal) = &self.journal {
            let resolve = |id: &ThingId| self.resolve_type(id);
            match history::compute(
                journal,
                &resolve,
                &self.collections_root,
                self.settings.change_window_days,
                Utc::now(),
            ) {
                Ok(changes) => {
                    report.changes = changes.len();
                    *write_guard(&self.changes) = changes;
                }
                Err(e) => {
                    warn!(library = %self.settings.name, error = %e, "change history unavailable");
                    report.warnings.push(format!("change history: {e}"));
                }
            }
        }

        info!(
            library = %self.settings.name,
            representation_acls = report.representation_acls,
            accounts = report.accounts_indexed,
            changes = report.changes,
            warnings = report.warnings.len(),
            "library ready"
        );
        report
    }

    pub fn settings(&self) -> &LibrarySettings {
        &self.settings
    }

    pub fn parent(&self) -> Option<&Library> {
        self.parent.as_deref()
    }

    pub fn stats(&self) -> LibraryStats {
        LibraryStats {
            name: self.settings.name.clone(),
            records: self.index.record_count(),
            types: self.catalog.len(),
            changes: read_guard(&self.changes).len(),
            cached_files: self.cache.len(),
            file_reads: self.cache.read_count(),
        }
    }

    // ── Access control ──────────────────────────────────────────────

    /// Read permission. Parent policy binds first; an undeclared resource
    /// is readable by default.
    pub fn can_read(&self, resource: &ThingId, principal: &Principal) -> bool {
        if let Some(parent) = &self.parent {
            if !parent.can_read(resource, principal) {
                return false;
            }
        }
        let acls = read_guard(&self.read_acls);
        security::decide(&acls, &self.collections_root, resource, principal).unwrap_or(true)
    }

    /// Write permission, same shape as [`Library::can_read`] over the
    /// write-ACL map.
    pub fn can_write(&self, resource: &ThingId, principal: &Principal) -> bool {
        if let Some(parent) = &self.parent {
            if !parent.can_write(resource, principal) {
                return false;
            }
        }
        let acls = read_guard(&self.write_acls);
        security::decide(&acls, &self.collections_root, resource, principal).unwrap_or(true)
    }

    // ── Types ───────────────────────────────────────────────────────

    /// The declared type of a record id, deferring to the parent library
    /// when this one declares nothing.
    pub fn resolve_type(&self, id: &ThingId) -> Option<String> {
        self.catalog
            .resolve_type(id)
            .or_else(|| self.parent.as_ref().and_then(|p| p.resolve_type(id)))
    }

    pub fn type_definition(&self, type_id: &str) -> Option<&TypeDefinition> {
        self.catalog
            .definition(type_id)
            .or_else(|| self.parent.as_ref().and_then(|p| p.type_definition(type_id)))
    }

    // ── Accounts ────────────────────────────────────────────────────

    /// Look an account up by its indexed email address. Accounts live in the
    /// root library, so lookups delegate up the chain.
    pub fn find_account_by_email(&self, email: &str) -> Option<ThingId> {
        read_guard(&self.accounts_by_email)
            .get(email)
            .cloned()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.find_account_by_email(email))
            })
    }

    /// Write-back of an account's last sign-in time, updating the owning
    /// library's record file and cache together. Safe to repeat.
    pub async fn record_sign_in(&self, account: &ThingId, when: DateTime<Utc>) -> Result<()> {
        let Some((lib, hit)) = self.resolving_library(account) else {
            return Err(Error::NotFound(account.to_string()));
        };
        let path = lib.record_path(&hit.id);
        let text = lib.cache.read_raw(&path).await?;
        let mut value: Value =
            serde_json::from_str(&text).map_err(|e| Error::parse(&path, &e))?;
        let Value::Object(map) = &mut value else {
            return Err(Error::Parse {
                path: path.display().to_string(),
                detail: "record is not a JSON object".into(),
            });
        };
        map.insert("lastSignIn".into(), json!(when.to_rfc3339()));

        let updated = serde_json::to_string_pretty(&value).map_err(|e| Error::parse(&path, &e))?;
        tokio::fs::write(&path, &updated)
            .await
            .map_err(|e| Error::from_io(e, &path, "account record"))?;
        lib.cache.insert(&path, updated);
        tracing::debug!(account = %account, "sign-in recorded");
        Ok(())
    }

    // ── Computed operations ─────────────────────────────────────────

    /// Run a named derived-property operation. Unknown names resolve to
    /// null rather than failing the record.
    pub fn run_operation(&self, name: &str, resource: &ThingId) -> Value {
        match name {
            "childCount" => json!(self.index.child_record_count(resource)),
            "recentChangeCount" => {
                let changes = read_guard(&self.changes);
                let count = changes
                    .iter()
                    .flat_map(|c| &c.members)
                    .filter(|m| m.id.is_under(resource))
                    .count();
                json!(count)
            }
            other => {
                warn!(operation = other, "unknown computed operation");
                Value::Null
            }
        }
    }

    // ── Internals shared across the query path ──────────────────────

    /// Walk up the parent chain to the first library whose index resolves
    /// the id.
    pub(crate) fn resolving_library<'a>(&'a self, id: &ThingId) -> Option<(&'a Library, Resolved)> {
        let mut lib: &'a Library = self;
        loop {
            if let Some(hit) = lib.index.resolve(id) {
                return Some((lib, hit));
            }
            lib = lib.parent.as_deref()?;
        }
    }

    pub(crate) fn record_path(&self, id: &ThingId) -> PathBuf {
        self.settings
            .home_path
            .join(id.as_str().trim_start_matches('/'))
            .join(THING_FILE)
    }

    pub(crate) fn raw_file_path(&self, id: &ThingId) -> PathBuf {
        self.settings
            .home_path
            .join(id.as_str().trim_start_matches('/'))
    }

    pub(crate) fn type_path(&self, type_id: &str) -> PathBuf {
        self.settings
            .home_path
            .join(type_id.trim_start_matches('/'))
            .join(TYPE_FILE)
    }

    pub(crate) fn representation_link_path(&self, id: &ThingId) -> PathBuf {
        self.settings
            .writable_path
            .join(id.as_str().trim_start_matches('/'))
            .join(THING_FILE)
    }

    pub(crate) fn representation_payload_path(&self, id: &ThingId, file: &str) -> PathBuf {
        self.settings
            .writable_path
            .join(id.as_str().trim_start_matches('/'))
            .join(file)
    }

    /// Client-facing link for an id.
    pub fn href(&self, id: &ThingId) -> String {
        if self.settings.application_name.is_empty() {
            id.to_string()
        } else {
            format!("/{}{}", self.settings.application_name, id)
        }
    }

    async fn load_representation_acl(&self, id: &ThingId) -> Result<bool> {
        let path = self.representation_link_path(id);
        let value = self.cache.read_json(&path).await?;
        let thing = Thing::from_value(id.clone(), value)?;

        let reads = thing.set_ids("canRead");
        let writes = thing.set_ids("canWrite");
        let declared = !reads.is_empty() || !writes.is_empty();
        if !reads.is_empty() {
            write_guard(&self.read_acls).insert(id.clone(), reads.into_iter().collect());
        }
        if !writes.is_empty() {
            write_guard(&self.write_acls).insert(id.clone(), writes.into_iter().collect());
        }
        Ok(declared)
    }

    async fn account_email(&self, id: &ThingId) -> Result<Option<String>> {
        let value = self.cache.read_json(&self.record_path(id)).await?;
        let thing = Thing::from_value(id.clone(), value)?;
        Ok(thing.scalar_str("email").map(str::to_string))
    }
}

pub(crate) fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
