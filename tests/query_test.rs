mod helpers;

use futures_util::future::join_all;
use serde_json::json;

use folio::library::{Principal, QueryContext, QueryOutcome, ThingId};
use helpers::{object, run, Fixture};

#[tokio::test]
async fn records_resolve_to_their_externalized_form() {
    let fx = Fixture::new();
    fx.write_type("/collections", json!({}));
    fx.write_type(
        "/collections/recipes",
        json!({"singularName": "recipe", "properties": {}}),
    );
    fx.write_record(
        "/collections/recipes/pasta",
        json!({"name": "Pasta", "rating": 5}),
    );
    let library = fx.open().await;

    let out = object(run(&library, "/collections/recipes/pasta", Principal::anonymous()).await);
    assert_eq!(out["href"], json!("/library/collections/recipes/pasta"));
    assert_eq!(out["id"], json!("pasta"));
    assert_eq!(out["name"], json!("Pasta"));
    assert_eq!(out["path"], json!("/collections/recipes/pasta"));
    assert_eq!(out["type"], json!("/collections/recipes"));
    assert_eq!(out["typeName"], json!("recipe"));
    assert_eq!(out["rating"], json!(5));
}

#[tokio::test]
async fn missing_and_denied_resources_stay_distinct() {
    let fx = Fixture::new();
    fx.write_record(
        "/collections/secret",
        json!({"name": "Secret", "canRead": {"</people/alice>": ""}}),
    );
    let library = fx.open().await;

    assert_eq!(
        run(&library, "/collections/absent", Principal::anonymous()).await,
        QueryOutcome::NotFound
    );
    assert_eq!(
        run(&library, "/collections/secret", Principal::anonymous()).await,
        QueryOutcome::CannotRead
    );
    assert!(matches!(
        run(&library, "/collections/secret", Principal::user("/people/alice")).await,
        QueryOutcome::Object(_)
    ));
}

#[tokio::test]
async fn loose_files_resolve_to_their_raw_path() {
    let fx = Fixture::new();
    fx.write_record("/collections/doc", json!({"name": "Doc"}));
    fx.write_file("/collections/doc", "notes.txt", b"plain text");
    let library = fx.open().await;

    let expected = fx.home.path().join("collections/doc/notes.txt");
    assert_eq!(
        run(&library, "/collections/doc/notes.txt", Principal::anonymous()).await,
        QueryOutcome::File(expected)
    );
}

#[tokio::test]
async fn concurrent_queries_share_one_file_read() {
    let fx = Fixture::new();
    fx.write_record("/collections/hot", json!({"name": "Hot"}));
    let library = fx.open().await;
    assert_eq!(library.stats().file_reads, 0);

    let outcomes = join_all(
        (0..8).map(|_| run(&library, "/collections/hot", Principal::anonymous())),
    )
    .await;
    for outcome in outcomes {
        assert!(matches!(outcome, QueryOutcome::Object(_)));
    }
    assert_eq!(library.stats().file_reads, 1);
}

#[tokio::test]
async fn child_libraries_fall_back_to_the_parent() {
    let parent_fx = Fixture::new();
    parent_fx.write_record("/collections/shared", json!({"name": "Shared"}));
    let parent = parent_fx.open().await;

    let child_fx = Fixture::new();
    child_fx.write_record("/collections/mine", json!({"name": "Mine"}));
    let child = child_fx.open_with(Some(parent)).await;

    let out = object(run(&child, "/collections/shared", Principal::anonymous()).await);
    assert_eq!(out["name"], json!("Shared"));

    // Ids in neither library still miss.
    assert_eq!(
        run(&child, "/collections/nowhere", Principal::anonymous()).await,
        QueryOutcome::NotFound
    );
}

#[tokio::test]
async fn parent_denial_binds_before_the_child_resolves() {
    let parent_fx = Fixture::new();
    parent_fx.write_record(
        "/collections/vault",
        json!({"name": "Vault", "canRead": {"</people/alice>": ""}}),
    );
    let parent = parent_fx.open().await;

    let child_fx = Fixture::new();
    // The child's own copy carries no ACL at all.
    child_fx.write_record("/collections/vault", json!({"name": "Vault Copy"}));
    let child = child_fx.open_with(Some(parent)).await;

    assert_eq!(
        run(&child, "/collections/vault", Principal::user("/people/bob")).await,
        QueryOutcome::CannotRead
    );
    let out = object(run(&child, "/collections/vault", Principal::user("/people/alice")).await);
    assert_eq!(out["name"], json!("Vault Copy"));
}

#[tokio::test]
async fn declared_children_recover_request_casing() {
    let fx = Fixture::new();
    fx.write_record("/collections", json!({"children": {"<Photos>": ""}}));
    fx.write_record("/collections/Photos", json!({"name": "Photos"}));
    let library = fx.open().await;

    let out = object(run(&library, "/collections/photos", Principal::anonymous()).await);
    assert_eq!(out["path"], json!("/collections/Photos"));
}

#[tokio::test]
async fn metadata_serves_the_resolved_type_schema() {
    let fx = Fixture::new();
    fx.write_type("/collections", json!({}));
    fx.write_type(
        "/collections/recipes",
        json!({"singularName": "recipe", "properties": {"rating": {"kind": "number"}}}),
    );
    fx.write_record("/collections/recipes/pasta", json!({"name": "Pasta"}));
    let library = fx.open().await;

    let ctx = QueryContext {
        metadata: true,
        ..QueryContext::new(ThingId::new("/collections/recipes/pasta"))
    };
    let out = match library.query(&ctx).await.unwrap() {
        QueryOutcome::Object(value) => value,
        other => panic!("expected the schema, got {other:?}"),
    };
    assert_eq!(out["singularName"], json!("recipe"));
    assert_eq!(out["properties"]["rating"]["kind"], json!("number"));
}

#[tokio::test]
async fn representations_resolve_to_local_content() {
    let fx = Fixture::new();
    fx.write_record(
        "/collections/doc",
        json!({"name": "Doc", "representations": {"<scan>": ""}}),
    );
    fx.write_link(
        "/collections/doc/scan",
        json!({"name": "scan", "file": "scan.png"}),
    );
    fx.write_payload("/collections/doc/scan", "scan.png", b"png bytes");
    let library = fx.open().await;

    let ctx = QueryContext {
        representation: true,
        ..QueryContext::new(ThingId::new("/collections/doc/scan"))
    };
    let expected = fx.writable.path().join("collections/doc/scan/scan.png");
    assert_eq!(
        library.query(&ctx).await.unwrap(),
        QueryOutcome::LocalContent(expected)
    );

    // A link with no payload reference cannot be served.
    fx.write_link("/collections/doc/empty", json!({"name": "empty"}));
    let ctx = QueryContext {
        representation: true,
        ..QueryContext::new(ThingId::new("/collections/doc/empty"))
    };
    assert_eq!(library.query(&ctx).await.unwrap(), QueryOutcome::NotFound);
}

#[tokio::test]
async fn representation_acls_load_during_initialization() {
    let fx = Fixture::new();
    fx.write_record(
        "/collections/doc",
        json!({"name": "Doc", "representations": {"<scan>": ""}}),
    );
    fx.write_link(
        "/collections/doc/scan",
        json!({"name": "scan", "file": "scan.png", "canRead": {"</people/alice>": ""}}),
    );
    fx.write_payload("/collections/doc/scan", "scan.png", b"png bytes");
    let library = fx.open().await;

    let ctx = QueryContext {
        representation: true,
        ..QueryContext::new(ThingId::new("/collections/doc/scan"))
    };
    assert_eq!(library.query(&ctx).await.unwrap(), QueryOutcome::CannotRead);

    let ctx = QueryContext {
        representation: true,
        ..QueryContext::new(ThingId::new("/collections/doc/scan"))
    }
    .with_principal(Principal::user("/people/alice"));
    assert!(matches!(
        library.query(&ctx).await.unwrap(),
        QueryOutcome::LocalContent(_)
    ));
}

#[tokio::test]
async fn sign_in_updates_the_account_record() {
    let fx = Fixture::new();
    fx.write_record(
        "/people/alice",
        json!({"name": "Alice", "email": "alice@example.com"}),
    );
    let library = fx.open().await;

    let account = library.find_account_by_email("alice@example.com").unwrap();
    assert_eq!(account, ThingId::new("/people/alice"));
    assert!(library.find_account_by_email("nobody@example.com").is_none());

    let when = helpers::days_ago(0);
    library.record_sign_in(&account, when).await.unwrap();

    // Both the stored file and the served record carry the stamp.
    let stored =
        std::fs::read_to_string(fx.home.path().join("people/alice/thing.json")).unwrap();
    assert!(stored.contains("lastSignIn"));
    let out = object(run(&library, "/people/alice", Principal::anonymous()).await);
    assert_eq!(out["lastSignIn"], json!(when.to_rfc3339()));
}

#[tokio::test]
async fn account_lookups_delegate_to_the_root_library() {
    let parent_fx = Fixture::new();
    parent_fx.write_record(
        "/people/alice",
        json!({"name": "Alice", "email": "alice@example.com"}),
    );
    let parent = parent_fx.open().await;

    let child_fx = Fixture::new();
    let child = child_fx.open_with(Some(parent)).await;

    let account = child.find_account_by_email("alice@example.com").unwrap();
    assert_eq!(account, ThingId::new("/people/alice"));

    // The write lands in the parent's tree, not the child's.
    child.record_sign_in(&account, helpers::days_ago(0)).await.unwrap();
    let stored =
        std::fs::read_to_string(parent_fx.home.path().join("people/alice/thing.json")).unwrap();
    assert!(stored.contains("lastSignIn"));
    assert!(!child_fx.home.path().join("people/alice").exists());
}
