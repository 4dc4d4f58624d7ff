//! Integration tests for the store: schema idempotence, index behaviour,
//! and the licence → connection cascade.

mod common;

use std::sync::Arc;

use chrono::Local;

use common::{signed_licence, CapturingReporter, LicenceSpec};
use roost::events::EventId;
use roost::server::store::Store;

async fn setup_store() -> (Store, Arc<CapturingReporter>) {
    let reporter = Arc::new(CapturingReporter::default());
    let store = Store::open_in_memory(reporter.clone()).await.unwrap();
    store.create_schema().await.unwrap();
    (store, reporter)
}

#[tokio::test]
async fn schema_creation_is_idempotent() {
    let (store, reporter) = setup_store().await;
    assert!(reporter.seen(EventId::DatabaseSchemaCreated));

    // A second attempt swallows "already exists" and adds no site log row.
    store.create_schema().await.unwrap();
    let installs = reporter
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|(e, _)| *e == EventId::DatabaseSchemaCreated)
        .count();
    assert_eq!(installs, 1);
}

#[tokio::test]
async fn licence_insert_is_keyed_on_timestamp() {
    let (store, _) = setup_store().await;

    let licence = signed_licence(&LicenceSpec::new("App", 2, 100));
    assert!(store.insert_licence_if_absent(&licence).await.unwrap());
    assert!(!store.insert_licence_if_absent(&licence).await.unwrap());

    // Same timestamp, different content: still ignored.
    let mut variant = licence.clone();
    variant.seats = 9;
    assert!(!store.insert_licence_if_absent(&variant).await.unwrap());

    let rows = store.licences_for_product("App").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].seats, 2);
}

#[tokio::test]
async fn licences_are_ordered_newest_first() {
    let (store, _) = setup_store().await;
    for spec in [
        LicenceSpec::new("App", 1, 100),
        LicenceSpec::new("App", 2, 300),
        LicenceSpec::new("App", 3, 200),
    ] {
        store
            .insert_licence_if_absent(&signed_licence(&spec))
            .await
            .unwrap();
    }

    let rows = store.licences_for_product("app").await.unwrap();
    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![300, 200, 100]);
}

#[tokio::test]
async fn deleting_a_licence_cascades_into_its_connections() {
    let (store, _) = setup_store().await;
    store
        .insert_licence_if_absent(&signed_licence(&LicenceSpec::new("App", 2, 100)))
        .await
        .unwrap();
    let licence_id = store.licences_for_product("App").await.unwrap()[0].id;

    let now = Local::now().naive_local();
    store
        .insert_connection_if_absent("App", "alice", "1.1.1.1", "hostA", now, Some(licence_id))
        .await
        .unwrap();

    // Reconciling against an empty on-disk set removes everything.
    assert_eq!(store.delete_licences_not_in(&[]).await.unwrap(), 1);
    let since = now - chrono::Duration::seconds(60);
    assert!(store.live_connections("App", since).await.unwrap().is_empty());
}

#[tokio::test]
async fn connection_triple_is_unique_case_insensitively() {
    let (store, _) = setup_store().await;
    let now = Local::now().naive_local();

    store
        .insert_connection_if_absent("App", "alice", "1.1.1.1", "hostA", now, None)
        .await
        .unwrap();
    store
        .insert_connection_if_absent("APP", "alice", "1.1.1.1", "hostB", now, None)
        .await
        .unwrap();

    let since = now - chrono::Duration::seconds(60);
    let rows = store.live_connections("aPp", since).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].host, "hostA");
}

#[tokio::test]
async fn live_connection_counts_exclude_the_requester() {
    let (store, _) = setup_store().await;
    let now = Local::now().naive_local();
    let since = now - chrono::Duration::seconds(60);

    store
        .insert_connection_if_absent("App", "alice", "1.1.1.1", "hostA", now, None)
        .await
        .unwrap();
    store
        .insert_connection_if_absent("App", "bob", "1.1.1.2", "hostB", now, None)
        .await
        .unwrap();

    let excluding_alice = store
        .count_live_connections_excluding("App", since, "alice", "1.1.1.1")
        .await
        .unwrap();
    assert_eq!(excluding_alice, 1);
    let excluding_nobody = store
        .count_live_connections_excluding("App", since, "carol", "1.1.1.3")
        .await
        .unwrap();
    assert_eq!(excluding_nobody, 2);
}

#[tokio::test]
async fn stale_rows_are_invisible_and_deletable() {
    let (store, _) = setup_store().await;
    let now = Local::now().naive_local();
    let old = now - chrono::Duration::seconds(600);
    let since = now - chrono::Duration::seconds(330);

    store
        .insert_connection_if_absent("App", "alice", "1.1.1.1", "hostA", old, None)
        .await
        .unwrap();
    store
        .insert_connection_if_absent("App", "bob", "1.1.1.2", "hostB", now, None)
        .await
        .unwrap();

    assert_eq!(store.live_connections("App", since).await.unwrap().len(), 1);
    assert_eq!(store.delete_stale_connections(since).await.unwrap(), 1);
    assert_eq!(store.live_connections("App", since).await.unwrap().len(), 1);
}

#[tokio::test]
async fn touch_updates_only_the_update_time() {
    let (store, _) = setup_store().await;
    let logon = Local::now().naive_local() - chrono::Duration::seconds(120);

    store
        .insert_connection_if_absent("App", "alice", "1.1.1.1", "hostA", logon, None)
        .await
        .unwrap();
    let refreshed = Local::now().naive_local();
    store
        .touch_connection("App", "alice", "1.1.1.1", refreshed)
        .await
        .unwrap();

    let since = logon - chrono::Duration::seconds(60);
    let rows = store.live_connections("App", since).await.unwrap();
    assert_eq!(rows[0].logon_time, logon);
    assert_eq!(rows[0].update_time, refreshed);
}

#[tokio::test]
async fn analyze_and_vacuum_run_cleanly() {
    let (store, _) = setup_store().await;
    store.analyze().await.unwrap();
    store.vacuum().await.unwrap();
}
