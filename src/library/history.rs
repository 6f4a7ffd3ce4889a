//! Change history derived from the commit journal.
//!
//! Walks the commit log newest first and diffs consecutive tree manifests
//! leaf by leaf. Only record files count; directory-level identity is
//! ignored. The walk stops at the first commit older than the recency
//! window, so ancient history is never loaded.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::journal::{CommitId, CommitLog, Manifest};
use crate::library::thing::ThingId;
use crate::library::THING_FILE;

/// How one record moved between two commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One record's entry inside a commit's change.
#[derive(Debug, Clone)]
pub struct ChangeMember {
    pub id: ThingId,
    pub kind: ChangeKind,
    pub is_collection: bool,
    pub type_id: Option<String>,
}

impl ChangeMember {
    pub fn to_json(&self) -> Value {
        json!({
            "file": self.id.as_str(),
            "typeOfChange": self.kind,
            "isCollection": self.is_collection,
            "typeId": self.type_id,
        })
    }
}

/// One commit's worth of record changes.
#[derive(Debug, Clone)]
pub struct Change {
    pub commit: CommitId,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub members: Vec<ChangeMember>,
}

impl Change {
    /// The compact form used when many changes are listed at once.
    pub fn coarse_json(&self) -> Value {
        json!({
            "id": self.commit.as_str(),
            "author": self.author,
            "timestamp": self.timestamp,
            "memberCount": self.members.len(),
        })
    }
}

/// Derive the change list from a commit log, newest first.
///
/// A single-commit log classifies every record in that tree as added.
/// Otherwise each consecutive pair produces one change attributed to the
/// newer commit. Iteration stops at the first commit whose timestamp falls
/// before `now` minus the window.
pub fn compute(
    log: &dyn CommitLog,
    resolve_type: &dyn Fn(&ThingId) -> Option<String>,
    collections_root: &ThingId,
    window_days: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Change>> {
    let commits = log.commits()?;
    let cutoff = now - Duration::days(window_days);
    let mut changes = Vec::new();

    if commits.is_empty() {
        return Ok(changes);
    }

    if commits.len() == 1 {
        let only = &commits[0];
        if only.timestamp < cutoff {
            return Ok(changes);
        }
        let manifest = log.manifest(&only.id)?;
        let members = manifest
            .keys()
            .filter_map(|path| record_id(path))
            .map(|id| member(id, ChangeKind::Added, resolve_type, collections_root))
            .collect();
        changes.push(Change {
            commit: only.id.clone(),
            author: only.author.clone(),
            timestamp: only.timestamp,
            members,
        });
        return Ok(changes);
    }

    for pair in commits.windows(2) {
        let (newer, older) = (&pair[0], &pair[1]);
        if newer.timestamp < cutoff {
            break;
        }
        let new_manifest = log.manifest(&newer.id)?;
        let old_manifest = log.manifest(&older.id)?;
        changes.push(Change {
            commit: newer.id.clone(),
            author: newer.author.clone(),
            timestamp: newer.timestamp,
            members: diff_members(
                &new_manifest,
                &old_manifest,
                resolve_type,
                collections_root,
            ),
        });
    }
    Ok(changes)
}

/// Leaf-by-leaf manifest diff over record files only.
fn diff_members(
    new: &Manifest,
    old: &Manifest,
    resolve_type: &dyn Fn(&ThingId) -> Option<String>,
    collections_root: &ThingId,
) -> Vec<ChangeMember> {
    let mut members = Vec::new();
    for (path, content) in new {
        let Some(id) = record_id(path) else { continue };
        match old.get(path) {
            None => members.push(member(id, ChangeKind::Added, resolve_type, collections_root)),
            Some(previous) if previous != content => members.push(member(
                id,
                ChangeKind::Modified,
                resolve_type,
                collections_root,
            )),
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if new.contains_key(path) {
            continue;
        }
        let Some(id) = record_id(path) else { continue };
        members.push(member(
            id,
            ChangeKind::Removed,
            resolve_type,
            collections_root,
        ));
    }
    members
}

fn member(
    id: ThingId,
    kind: ChangeKind,
    resolve_type: &dyn Fn(&ThingId) -> Option<String>,
    collections_root: &ThingId,
) -> ChangeMember {
    ChangeMember {
        is_collection: id.is_under(collections_root),
        type_id: resolve_type(&id),
        id,
        kind,
    }
}

/// Map a manifest path to a record id. Only paths whose final component is
/// exactly the record sentinel qualify.
fn record_id(path: &str) -> Option<ThingId> {
    let prefix = path.strip_suffix(THING_FILE)?;
    if !prefix.is_empty() && !prefix.ends_with('/') {
        return None;
    }
    Some(ThingId::new(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalLog;
    use chrono::TimeZone;

    fn no_types(_: &ThingId) -> Option<String> {
        None
    }

    fn collections() -> ThingId {
        ThingId::new("/collections")
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, day, 12, 0, 0).unwrap()
    }

    fn manifest(pairs: &[(&str, &str)]) -> Manifest {
        pairs
            .iter()
            .map(|(p, c)| (p.to_string(), JournalLog::content_id(c.as_bytes())))
            .collect()
    }

    #[test]
    fn single_commit_classifies_every_record_as_added() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalLog::init(dir.path(), "main").unwrap();
        journal
            .append_commit(
                "alice",
                ts(20),
                manifest(&[
                    ("types/books/x/thing.json", "a"),
                    ("people/alice/thing.json", "b"),
                    ("types/books/x/cover.jpg", "jpeg"),
                    ("types/mything.json", "not a record"),
                ]),
            )
            .unwrap();

        let changes = compute(&journal, &no_types, &collections(), 30, ts(21)).unwrap();
        assert_eq!(changes.len(), 1);
        let members = &changes[0].members;
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.kind == ChangeKind::Added));
        assert!(members
            .iter()
            .any(|m| m.id == ThingId::new("/types/books/x")));
        assert!(members.iter().any(|m| m.id == ThingId::new("/people/alice")));
    }

    #[test]
    fn only_the_changed_leaf_is_modified() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalLog::init(dir.path(), "main").unwrap();
        journal
            .append_commit(
                "alice",
                ts(19),
                manifest(&[("a/thing.json", "one"), ("b/thing.json", "same")]),
            )
            .unwrap();
        journal
            .append_commit(
                "alice",
                ts(20),
                manifest(&[("a/thing.json", "two"), ("b/thing.json", "same")]),
            )
            .unwrap();

        let changes = compute(&journal, &no_types, &collections(), 30, ts(21)).unwrap();
        assert_eq!(changes.len(), 1);
        let members = &changes[0].members;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, ThingId::new("/a"));
        assert_eq!(members[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn additions_and_removals_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalLog::init(dir.path(), "main").unwrap();
        journal
            .append_commit(
                "alice",
                ts(19),
                manifest(&[("a/thing.json", "x"), ("b/thing.json", "y")]),
            )
            .unwrap();
        journal
            .append_commit(
                "bob",
                ts(20),
                manifest(&[("a/thing.json", "x"), ("c/thing.json", "z")]),
            )
            .unwrap();

        let changes = compute(&journal, &no_types, &collections(), 30, ts(21)).unwrap();
        let members = &changes[0].members;
        assert_eq!(members.len(), 2);
        assert!(members
            .iter()
            .any(|m| m.id == ThingId::new("/c") && m.kind == ChangeKind::Added));
        assert!(members
            .iter()
            .any(|m| m.id == ThingId::new("/b") && m.kind == ChangeKind::Removed));
        assert_eq!(changes[0].author, "bob");
    }

    #[test]
    fn computation_stops_at_the_recency_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalLog::init(dir.path(), "main").unwrap();
        let old = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let stale = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        journal
            .append_commit("alice", old, manifest(&[("a/thing.json", "1")]))
            .unwrap();
        journal
            .append_commit("alice", stale, manifest(&[("a/thing.json", "2")]))
            .unwrap();
        journal
            .append_commit("alice", ts(20), manifest(&[("a/thing.json", "3")]))
            .unwrap();

        let changes = compute(&journal, &no_types, &collections(), 30, ts(21)).unwrap();
        // The stale→fresh pair qualifies; the pair headed by the stale
        // commit falls before the cutoff and ends the walk.
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].timestamp, ts(20));
    }

    #[test]
    fn stale_single_commit_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalLog::init(dir.path(), "main").unwrap();
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        journal
            .append_commit("alice", old, manifest(&[("a/thing.json", "1")]))
            .unwrap();

        let changes = compute(&journal, &no_types, &collections(), 30, ts(21)).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn members_carry_collection_flag_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalLog::init(dir.path(), "main").unwrap();
        journal
            .append_commit(
                "alice",
                ts(20),
                manifest(&[
                    ("collections/family/thing.json", "a"),
                    ("types/books/x/thing.json", "b"),
                ]),
            )
            .unwrap();

        let books = |id: &ThingId| {
            id.is_under(&ThingId::new("/types/books"))
                .then(|| "/types/books".to_string())
        };
        let changes = compute(&journal, &books, &collections(), 30, ts(21)).unwrap();
        let members = &changes[0].members;

        let family = members
            .iter()
            .find(|m| m.id == ThingId::new("/collections/family"))
            .unwrap();
        assert!(family.is_collection);
        assert_eq!(family.type_id, None);

        let book = members
            .iter()
            .find(|m| m.id == ThingId::new("/types/books/x"))
            .unwrap();
        assert!(!book.is_collection);
        assert_eq!(book.type_id.as_deref(), Some("/types/books"));
    }

    #[test]
    fn empty_log_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalLog::init(dir.path(), "main").unwrap();
        let changes = compute(&journal, &no_types, &collections(), 30, ts(21)).unwrap();
        assert!(changes.is_empty());
    }
}
