use super::*;
use crate::cache::MemoryCache;
use crate::test_helpers::{ScriptedPageFetcher, page, raw};
use crate::types::AccountId;

struct Harness {
    fetcher: Arc<ScriptedPageFetcher>,
    cache: Arc<MemoryCache>,
    engine: IncrementalSyncEngine,
}

fn harness() -> Harness {
    let fetcher = Arc::new(ScriptedPageFetcher::new());
    let cache = Arc::new(MemoryCache::new());
    let engine = IncrementalSyncEngine::new(
        fetcher.clone(),
        cache.clone(),
        Duration::from_millis(5),
        Duration::from_secs(5),
    );
    Harness {
        fetcher,
        cache,
        engine,
    }
}

fn cursors(calls: &[crate::test_helpers::PageCall]) -> Vec<u64> {
    calls.iter().map(|c| c.cursor).collect()
}

#[tokio::test]
async fn test_incomplete_account_resumes_at_message_count() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    account.message_count = 10;
    account.item_count = 12;

    h.fetcher.push(
        "a",
        Ok(page(
            vec![
                raw("m15", 1, 500),
                raw("m14", 1, 400),
                raw("m13", 1, 300),
                raw("m12", 1, 200),
                raw("m11", 1, 100),
            ],
            false,
            15,
        )),
    );
    h.fetcher.push("a", Ok(page(Vec::new(), true, 15)));

    let outcome = h
        .engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cursors(&h.fetcher.calls_for("a")), vec![10, 15]);
    assert!(outcome.exhausted);
    assert_eq!(outcome.new_items.len(), 5);
    assert_eq!(outcome.total_count, 15);
    assert!(account.completed);
    assert_eq!(account.message_count, 15);
    assert_eq!(account.item_count, 17);

    let saved = h
        .cache
        .get_account(&AccountId::from("a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved, account);
}

#[tokio::test]
async fn test_multi_item_message_counts_once() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");

    h.fetcher.push(
        "a",
        Ok(page(
            vec![raw("m1", 1, 100), raw("m1", 2, 100), raw("m1", 3, 100)],
            false,
            1,
        )),
    );

    h.engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(account.message_count, 1);
    assert_eq!(account.item_count, 3);
    // Second request continues after one message
    assert_eq!(cursors(&h.fetcher.calls_for("a")), vec![0, 1]);
}

#[tokio::test]
async fn test_completed_account_caught_up_stops_after_first_page() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    account.completed = true;
    account.message_count = 2;
    account.item_count = 2;

    let id = AccountId::from("a");
    for r in [raw("m2", 1, 200), raw("m1", 1, 100)] {
        h.cache.insert_if_absent(&Item::from_raw(&id, &r)).await.unwrap();
    }

    h.fetcher.push(
        "a",
        Ok(page(vec![raw("m2", 1, 200), raw("m1", 1, 100)], false, 2)),
    );

    let outcome = h
        .engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.caught_up);
    assert!(outcome.new_items.is_empty());
    assert_eq!(outcome.pages_fetched, 1);
    assert_eq!(h.fetcher.calls_for("a").len(), 1);
    assert_eq!(account.message_count, 2);
    assert!(account.last_sync_time.is_some());
}

#[tokio::test]
async fn test_cache_boundary_stops_walk() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    account.completed = true;
    account.message_count = 1;
    account.item_count = 1;

    let id = AccountId::from("a");
    h.cache
        .insert_if_absent(&Item::from_raw(&id, &raw("m1", 1, 100)))
        .await
        .unwrap();

    // Newest cached is 100; this page is entirely newer
    h.fetcher.push(
        "a",
        Ok(page(vec![raw("m3", 1, 300), raw("m2", 1, 200)], false, 3)),
    );
    // Never requested
    h.fetcher.push(
        "a",
        Ok(page(vec![raw("m1", 1, 100)], false, 3)),
    );

    let outcome = h
        .engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.boundary_hit);
    assert!(!outcome.exhausted);
    assert_eq!(outcome.new_items.len(), 2);
    assert_eq!(cursors(&h.fetcher.calls_for("a")), vec![0]);
    assert_eq!(account.message_count, 3);
    assert!(account.completed);
}

#[tokio::test]
async fn test_resumed_page_overlapping_cached_items_keeps_walking() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    account.message_count = 1;
    account.item_count = 1;

    let id = AccountId::from("a");
    h.cache
        .insert_if_absent(&Item::from_raw(&id, &raw("m3", 1, 300)))
        .await
        .unwrap();

    // The feed shifted by one: m3 shows up again at cursor 1, but nothing
    // cached is older than the page
    h.fetcher.push(
        "a",
        Ok(page(vec![raw("m3", 1, 300), raw("m2", 1, 200)], false, 4)),
    );
    h.fetcher
        .push("a", Ok(page(vec![raw("m1", 1, 100)], false, 4)));
    h.fetcher.push("a", Ok(page(Vec::new(), true, 4)));

    let outcome = h
        .engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.exhausted);
    assert!(!outcome.boundary_hit);
    assert_eq!(cursors(&h.fetcher.calls_for("a")), vec![1, 3, 4]);
    assert_eq!(outcome.new_items.len(), 2);
    assert_eq!(account.message_count, 3);
}

#[tokio::test]
async fn test_incomplete_account_stops_at_cache_boundary() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    account.message_count = 1;
    account.item_count = 1;

    let id = AccountId::from("a");
    h.cache
        .insert_if_absent(&Item::from_raw(&id, &raw("m1", 1, 100)))
        .await
        .unwrap();

    h.fetcher.push(
        "a",
        Ok(page(vec![raw("m3", 1, 300), raw("m2", 1, 200)], false, 3)),
    );
    // Never requested
    h.fetcher
        .push("a", Ok(page(vec![raw("m1", 1, 100)], false, 3)));

    let outcome = h
        .engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.boundary_hit);
    assert!(!outcome.exhausted);
    assert_eq!(cursors(&h.fetcher.calls_for("a")), vec![1]);
    assert_eq!(outcome.new_items.len(), 2);
    assert_eq!(account.message_count, 3);
    assert!(!account.completed);
}

#[tokio::test]
async fn test_items_are_merged_idempotently() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");

    h.fetcher
        .push("a", Ok(page(vec![raw("m1", 1, 100)], true, 1)));
    h.engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    let mut again = Account::new("a", "Alpha");
    h.fetcher
        .push("a", Ok(page(vec![raw("m1", 1, 100)], true, 1)));
    let outcome = h
        .engine
        .sync(&mut again, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.new_items.is_empty());
    assert_eq!(again.message_count, 0);
    assert_eq!(
        h.cache.get_items(&AccountId::from("a")).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_session_expired_propagates() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    h.fetcher.push("a", Err(Error::SessionExpired));

    let err = h
        .engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_session_expired());
}

#[tokio::test]
async fn test_access_restricted_flags_account_and_next_sync_uses_privileged_path() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    account.message_count = 5;
    h.fetcher.push(
        "a",
        Err(Error::AccessRestricted {
            account_id: AccountId::from("a"),
        }),
    );

    let mut cursor = SyncCursor::default();
    let err = h
        .engine
        .sync(&mut account, &mut cursor, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AccessRestricted { .. }));
    assert!(!account.searchable);
    let saved = h
        .cache
        .get_account(&AccountId::from("a"))
        .await
        .unwrap()
        .unwrap();
    assert!(!saved.searchable);

    // Privileged path: item offsets, remote cursor when provided
    let mut first = page(vec![raw("m9", 1, 900), raw("m9", 2, 900)], false, 9);
    first.next_offset = Some(7);
    h.fetcher.push("a", Ok(first));
    h.fetcher
        .push("a", Ok(page(vec![raw("m8", 1, 800)], false, 9)));
    h.fetcher.push("a", Ok(page(Vec::new(), true, 9)));

    h.engine
        .sync(&mut account, &mut cursor, &CancellationToken::new())
        .await
        .unwrap();

    let calls = h.fetcher.calls_for("a");
    assert!(calls[1..].iter().all(|c| c.path == FetchPath::Privileged));
    assert_eq!(cursors(&calls[1..]), vec![0, 7, 8]);
    assert_eq!(cursor.loaded_count, 3);
    assert!(account.completed);
}

#[tokio::test]
async fn test_privileged_resume_uses_cursor_offset() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    account.searchable = false;
    let mut cursor = SyncCursor {
        next_offset: 20,
        loaded_count: 20,
    };

    h.fetcher.push("a", Ok(page(Vec::new(), true, 20)));

    h.engine
        .sync(&mut account, &mut cursor, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cursors(&h.fetcher.calls_for("a")), vec![20]);
    assert_eq!(cursor.loaded_count, 20);
}

#[tokio::test]
async fn test_cancellation_between_pages_interrupts() {
    let h = harness();
    let mut account = Account::new("a", "Alpha");
    let token = CancellationToken::new();

    h.fetcher
        .push("a", Ok(page(vec![raw("m2", 1, 200)], false, 2)));
    h.fetcher
        .push("a", Ok(page(vec![raw("m1", 1, 100)], false, 2)));

    token.cancel();
    let outcome = h
        .engine
        .sync(&mut account, &mut SyncCursor::default(), &token)
        .await
        .unwrap();

    assert!(outcome.interrupted);
    assert!(!account.completed);
    assert!(h.fetcher.calls_for("a").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_page_delay_applies_between_pages_only() {
    let fetcher = Arc::new(ScriptedPageFetcher::new());
    let cache = Arc::new(MemoryCache::new());
    let engine = IncrementalSyncEngine::new(
        fetcher.clone(),
        cache,
        Duration::from_secs(5),
        Duration::from_secs(30),
    );
    let mut account = Account::new("a", "Alpha");

    fetcher.push("a", Ok(page(vec![raw("m2", 1, 200)], false, 2)));
    fetcher.push("a", Ok(page(vec![raw("m1", 1, 100)], false, 2)));
    fetcher.push("a", Ok(page(Vec::new(), true, 2)));

    let start = tokio::time::Instant::now();
    engine
        .sync(&mut account, &mut SyncCursor::default(), &CancellationToken::new())
        .await
        .unwrap();

    // Three pages, two gaps
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}
