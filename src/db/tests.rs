use crate::cache::ItemCache;
use crate::checkpoint::{CheckpointStore, load_fresh};
use crate::db::*;
use crate::types::{Account, AccountId, FetchMode, Item, Payload, Phase};
use chrono::Utc;
use std::time::Duration;
use tempfile::NamedTempFile;

async fn open() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn item(account: &str, message: &str, seq: u32, create_time: i64) -> Item {
    Item {
        item_id: format!("{message}:{seq}"),
        account_id: AccountId::from(account),
        title: format!("{message}-{seq}"),
        canonical_link: format!("https://example.com/{account}/{message}/{seq}"),
        create_time,
        sequence_index: seq,
        deleted: false,
    }
}

fn payload(url: &str, mode: FetchMode) -> Payload {
    Payload {
        url: url.to_string(),
        mode,
        body: format!("body of {url}"),
        corrected_account_id: None,
        fetched_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    db.close().await;

    // Reopening must not re-run v1
    let db = Database::new(temp_file.path()).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);
    db.close().await;
}

#[tokio::test]
async fn test_accounts_keep_import_order_and_update_in_place() {
    let (db, _temp) = open().await;

    db.save_account(&Account::new("b", "Beta")).await.unwrap();
    db.save_account(&Account::new("a", "Alpha")).await.unwrap();

    let mut beta = Account::new("b", "Beta");
    beta.completed = true;
    beta.message_count = 7;
    beta.item_count = 9;
    beta.searchable = false;
    db.save_account(&beta).await.unwrap();

    let accounts = ItemCache::list_accounts(&db).await.unwrap();
    let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(accounts[0], beta);

    db.close().await;
}

#[tokio::test]
async fn test_import_resets_completed() {
    let (db, _temp) = open().await;

    let mut account = Account::new("a", "Alpha");
    account.completed = true;
    account.message_count = 30;
    account.item_count = 41;
    account.total_count = 100;
    db.save_account(&account).await.unwrap();

    db.import_accounts(&[account]).await.unwrap();

    let stored = ItemCache::get_account(&db, &AccountId::from("a"))
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.completed);
    assert_eq!(stored.message_count, 0);
    assert_eq!(stored.total_count, 0);

    db.close().await;
}

#[tokio::test]
async fn test_insert_if_absent_inserts_exactly_once() {
    let (db, _temp) = open().await;
    let it = item("a", "m1", 1, 100);

    assert!(db.insert_if_absent(&it).await.unwrap());
    assert!(!db.insert_if_absent(&it).await.unwrap());
    assert!(!db.insert_if_absent(&it).await.unwrap());

    let items = db.get_items(&AccountId::from("a")).await.unwrap();
    assert_eq!(items, vec![it]);

    db.close().await;
}

#[tokio::test]
async fn test_boundary_queries() {
    let (db, _temp) = open().await;
    let account = AccountId::from("a");

    assert_eq!(db.latest_create_time(&account).await.unwrap(), None);
    assert!(!db.has_item_older_than(&account, i64::MAX).await.unwrap());

    db.insert_if_absent(&item("a", "m1", 1, 100)).await.unwrap();
    db.insert_if_absent(&item("a", "m2", 1, 250)).await.unwrap();
    db.insert_if_absent(&item("other", "m9", 1, 10)).await.unwrap();

    assert_eq!(db.latest_create_time(&account).await.unwrap(), Some(250));
    assert!(!db.has_item_older_than(&account, 100).await.unwrap());
    assert!(db.has_item_older_than(&account, 101).await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_items_newest_first() {
    let (db, _temp) = open().await;

    db.insert_if_absent(&item("a", "m1", 1, 100)).await.unwrap();
    db.insert_if_absent(&item("a", "m2", 2, 300)).await.unwrap();
    db.insert_if_absent(&item("a", "m2", 1, 300)).await.unwrap();

    let ids: Vec<String> = db
        .get_items(&AccountId::from("a"))
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.item_id)
        .collect();
    assert_eq!(ids, vec!["m2:1", "m2:2", "m1:1"]);

    db.close().await;
}

#[tokio::test]
async fn test_batch_exists_and_payload_round_trip() {
    let (db, _temp) = open().await;

    let stored = payload("https://example.com/1", FetchMode::Content);
    db.store_payload(&stored).await.unwrap();
    db.store_payload(&payload("https://example.com/2", FetchMode::Comments))
        .await
        .unwrap();

    let urls: Vec<String> = (1..=3).map(|n| format!("https://example.com/{n}")).collect();
    let existing = db.batch_exists(&urls, FetchMode::Content).await.unwrap();
    assert_eq!(existing.len(), 1);
    assert!(existing.contains("https://example.com/1"));

    let payloads = db.get_payloads(&urls, FetchMode::Content).await.unwrap();
    let loaded = &payloads["https://example.com/1"];
    assert_eq!(loaded.body, stored.body);
    assert_eq!(loaded.mode, FetchMode::Content);
    assert_eq!(loaded.fetched_at.timestamp(), stored.fetched_at.timestamp());

    db.close().await;
}

#[tokio::test]
async fn test_batch_exists_spans_chunks() {
    let (db, _temp) = open().await;

    let urls: Vec<String> = (0..1200).map(|n| format!("https://example.com/{n}")).collect();
    for url in urls.iter().step_by(100) {
        db.store_payload(&payload(url, FetchMode::Content)).await.unwrap();
    }

    let existing = db.batch_exists(&urls, FetchMode::Content).await.unwrap();
    assert_eq!(existing.len(), 12);

    db.close().await;
}

#[tokio::test]
async fn test_remove_account_cascades_to_items_and_payloads() {
    let (db, _temp) = open().await;

    db.save_account(&Account::new("a", "Alpha")).await.unwrap();
    db.save_account(&Account::new("b", "Beta")).await.unwrap();
    let mine = item("a", "m1", 1, 100);
    let theirs = item("b", "m1", 1, 100);
    db.insert_if_absent(&mine).await.unwrap();
    db.insert_if_absent(&theirs).await.unwrap();
    db.store_payload(&payload(&mine.canonical_link, FetchMode::Content))
        .await
        .unwrap();
    db.store_payload(&payload(&theirs.canonical_link, FetchMode::Content))
        .await
        .unwrap();

    db.remove_account(&AccountId::from("a")).await.unwrap();

    let accounts = ItemCache::list_accounts(&db).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert!(db.get_items(&AccountId::from("a")).await.unwrap().is_empty());

    let urls = vec![mine.canonical_link.clone(), theirs.canonical_link.clone()];
    let existing = db.batch_exists(&urls, FetchMode::Content).await.unwrap();
    assert_eq!(existing.len(), 1);
    assert!(existing.contains(&theirs.canonical_link));

    db.close().await;
}

#[tokio::test]
async fn test_mark_deleted_never_reverts() {
    let (db, _temp) = open().await;
    let it = item("a", "m1", 1, 100);
    db.insert_if_absent(&it).await.unwrap();

    assert_eq!(db.mark_deleted(&it.canonical_link).await.unwrap(), 1);
    assert_eq!(db.mark_deleted(&it.canonical_link).await.unwrap(), 0);

    // A later sync of the same identity must not clear the flag
    db.insert_if_absent(&it).await.unwrap();
    let items = db.get_items(&AccountId::from("a")).await.unwrap();
    assert!(items[0].deleted);

    db.close().await;
}

#[tokio::test]
async fn test_reassign_item_moves_once() {
    let (db, _temp) = open().await;
    let it = item("unknown", "m1", 1, 100);
    db.insert_if_absent(&it).await.unwrap();

    let target = AccountId::from("real");
    assert!(db.reassign_item(&it.canonical_link, &target).await.unwrap());
    assert!(!db.reassign_item(&it.canonical_link, &target).await.unwrap());

    assert_eq!(db.get_items(&target).await.unwrap().len(), 1);
    assert!(
        db.get_items(&AccountId::from("unknown"))
            .await
            .unwrap()
            .is_empty()
    );

    db.close().await;
}

#[tokio::test]
async fn test_checkpoint_persist_load_clear() {
    let (db, _temp) = open().await;
    assert!(db.load().await.unwrap().is_none());

    let mut checkpoint = crate::checkpoint::tests::sample_checkpoint(Utc::now());
    checkpoint.current_phase = Phase::Export;
    db.persist(&checkpoint).await.unwrap();

    checkpoint.consecutive_error_count = 2;
    db.persist(&checkpoint).await.unwrap();

    let loaded = db.load().await.unwrap().unwrap();
    assert_eq!(loaded.consecutive_error_count, 2);
    assert_eq!(loaded.current_phase, Phase::Export);
    assert_eq!(loaded.processed_account_ids.len(), 2);

    db.clear().await.unwrap();
    assert!(db.load().await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_stale_checkpoint_is_discarded() {
    let (db, _temp) = open().await;

    let checkpoint =
        crate::checkpoint::tests::sample_checkpoint(Utc::now() - chrono::Duration::hours(30));
    db.persist(&checkpoint).await.unwrap();

    let loaded = load_fresh(&db, Duration::from_secs(24 * 60 * 60))
        .await
        .unwrap();
    assert!(loaded.is_none());
    assert!(db.load().await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_query_after_close_returns_error() {
    let (db, _temp) = open().await;

    db.pool().close().await;

    let result = db.get_items(&AccountId::from("a")).await;
    assert!(
        result.is_err(),
        "get_items after pool close should return an error, got: {:?}",
        result
    );
}
