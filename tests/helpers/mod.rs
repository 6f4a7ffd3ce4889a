#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tempfile::TempDir;

use folio::journal::{JournalLog, Manifest};
use folio::library::{
    Library, LibrarySettings, Principal, QueryContext, QueryOutcome, ThingId,
};

/// One library rooted in throwaway directories. Write fixtures first, then
/// `open()`.
pub struct Fixture {
    pub home: TempDir,
    pub writable: TempDir,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture {
            home: tempfile::tempdir().unwrap(),
            writable: tempfile::tempdir().unwrap(),
        }
    }

    pub fn settings(&self) -> LibrarySettings {
        LibrarySettings {
            name: "Test Library".to_string(),
            application_name: "library".to_string(),
            home_path: self.home.path().to_path_buf(),
            writable_path: self.writable.path().to_path_buf(),
            repository_path: self.home.path().join(".journal"),
            collections_path: "/collections".to_string(),
            changes_path: "/changes".to_string(),
            accounts_path: "/people".to_string(),
            collection_limit: 10,
            change_window_days: 30,
            read_limit: 10,
        }
    }

    /// Write `<home>/<id>/thing.json`.
    pub fn write_record(&self, id: &str, body: Value) {
        write_json(self.home.path(), id, "thing.json", &body);
    }

    /// Write `<home>/<id>/type.json`.
    pub fn write_type(&self, id: &str, body: Value) {
        write_json(self.home.path(), id, "type.json", &body);
    }

    /// Write a loose file inside a record directory.
    pub fn write_file(&self, id: &str, name: &str, bytes: &[u8]) {
        let dir = self.home.path().join(id.trim_start_matches('/'));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), bytes).unwrap();
    }

    /// Write `<writable>/<id>/thing.json`, a representation link.
    pub fn write_link(&self, id: &str, body: Value) {
        write_json(self.writable.path(), id, "thing.json", &body);
    }

    /// Write a representation payload beside its link.
    pub fn write_payload(&self, id: &str, name: &str, bytes: &[u8]) {
        let dir = self.writable.path().join(id.trim_start_matches('/'));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), bytes).unwrap();
    }

    /// Create the commit journal the library will pick up on open.
    pub fn init_journal(&self) -> JournalLog {
        JournalLog::init(self.home.path().join(".journal"), "main").unwrap()
    }

    pub async fn open(&self) -> Arc<Library> {
        self.open_with(None).await
    }

    pub async fn open_with(&self, parent: Option<Arc<Library>>) -> Arc<Library> {
        let library = Library::open(self.settings(), parent).unwrap();
        library.initialize().await;
        Arc::new(library)
    }
}

fn write_json(root: &Path, id: &str, file: &str, body: &Value) {
    let dir = root.join(id.trim_start_matches('/'));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), serde_json::to_string_pretty(body).unwrap()).unwrap();
}

/// A timestamp `n` days before now, safely inside or outside the default
/// 30-day change window.
pub fn days_ago(n: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(n)
}

/// Manifest from (path, content) pairs, hashing content the journal's way.
pub fn manifest(pairs: &[(&str, &str)]) -> Manifest {
    pairs
        .iter()
        .map(|(p, c)| (p.to_string(), JournalLog::content_id(c.as_bytes())))
        .collect()
}

/// Run one query and return its outcome.
pub async fn run(library: &Library, id: &str, principal: Principal) -> QueryOutcome {
    let ctx = QueryContext::new(ThingId::new(id)).with_principal(principal);
    library.query(&ctx).await.unwrap()
}

/// Unwrap an object outcome.
pub fn object(outcome: QueryOutcome) -> Value {
    match outcome {
        QueryOutcome::Object(value) => value,
        other => panic!("expected an object outcome, got {other:?}"),
    }
}

/// The `members` array of a collection envelope.
pub fn members(envelope: &Value) -> &Vec<Value> {
    envelope["members"].as_array().unwrap()
}
