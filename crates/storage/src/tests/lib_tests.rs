use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn missing_key_reads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert_eq!(storage.get("profile").await.expect("get"), None);
}

#[tokio::test]
async fn set_overwrites_previous_value() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.set("profile", r#"{"v":1}"#).await.expect("first set");
    storage.set("profile", r#"{"v":2}"#).await.expect("second set");

    assert_eq!(
        storage.get("profile").await.expect("get").as_deref(),
        Some(r#"{"v":2}"#)
    );
}

#[tokio::test]
async fn delete_removes_value_and_tolerates_missing_key() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.set("delay_ledger", "{}").await.expect("set");

    storage.delete("delay_ledger").await.expect("delete");
    storage.delete("delay_ledger").await.expect("second delete");

    assert_eq!(storage.get("delay_ledger").await.expect("get"), None);
}

#[tokio::test]
async fn scopes_do_not_share_keys() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let other = storage.with_scope("other-device");
    storage.set("profile", "mine").await.expect("set");

    assert_eq!(other.scope(), "other-device");
    assert_eq!(other.get("profile").await.expect("get"), None);

    other.set("profile", "theirs").await.expect("set other");
    assert_eq!(
        storage.get("profile").await.expect("get").as_deref(),
        Some("mine")
    );
}

#[tokio::test]
async fn values_survive_reopening_the_database_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("commute.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let storage = Storage::new(&database_url).await.expect("db");
        storage.set("profile", "persisted").await.expect("set");
        storage.pool().close().await;
    }

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    let reopened = Storage::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.get("profile").await.expect("get").as_deref(),
        Some("persisted")
    );
}

#[tokio::test]
async fn missing_store_fails_every_operation() {
    let store = MissingKeyValueStore::new("disk not mounted");

    let err = store.get("profile").await.expect_err("get must fail");
    assert!(err.to_string().contains("disk not mounted"));
    assert!(store.set("profile", "x").await.is_err());
    assert!(store.delete("profile").await.is_err());
}

#[tokio::test]
async fn missing_parent_directory_is_not_created() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let missing_dir = temp_root.path().join("not-there");
    let database_url = format!(
        "sqlite://{}",
        missing_dir.join("commute.db").to_string_lossy().replace('\\', "/")
    );

    assert!(Storage::new(&database_url).await.is_err());
    assert!(!missing_dir.exists());
}
