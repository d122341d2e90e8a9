//! Cache-aside behaviour of the record repository against in-memory tiers.

use std::sync::Arc;
use std::time::Duration;

use recordcache_core::{
    CacheTierConfig, NewRecord, RecordError, RecordPatch, RecordStatus, RepositoryConfig,
};
use recordcache_storage::{
    CacheTier, InMemoryCacheTier, InMemoryRecordStore, KeySpace, RecordRepository, RecordStore,
    RequestContext,
};
use recordcache_test_utils::assertions::{assert_duplicate_key, assert_matches_new, assert_not_found};
use recordcache_test_utils::fixtures::{self, counting_repository, CountingRepository};
use recordcache_test_utils::init_test_tracing;
use tokio::sync::Barrier;

fn repository() -> CountingRepository {
    init_test_tracing();
    counting_repository(RepositoryConfig::default()).unwrap()
}

// ============================================================================
// SINGLE-RECORD READS
// ============================================================================

#[tokio::test]
async fn test_second_read_of_existing_record_skips_store() {
    let repo = repository();
    let ctx = RequestContext::new();
    let id = repo.create_record(&ctx, &fixtures::amy()).await.unwrap();

    let first = repo.get_record(&ctx, id).await.unwrap();
    let second = repo.get_record(&ctx, id).await.unwrap();

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(repo.store().get_by_id_calls(), 1);
}

#[tokio::test]
async fn test_second_read_of_missing_record_skips_store() {
    let repo = repository();
    let ctx = RequestContext::new();

    assert_eq!(repo.get_record(&ctx, 404).await.unwrap(), None);
    assert_eq!(repo.get_record(&ctx, 404).await.unwrap(), None);
    assert_eq!(repo.store().get_by_id_calls(), 1);
    assert_eq!(repo.stats().negative_hits, 1);
}

#[tokio::test]
async fn test_store_error_is_propagated_and_not_cached() {
    let repo = repository();
    let ctx = RequestContext::new();
    let id = fixtures::seed(repo.store(), 1).await.unwrap()[0];

    repo.store().set_failing(true);
    let err = repo.get_record(&ctx, id).await.unwrap_err();
    assert!(matches!(err, RecordError::Storage(_)));
    assert!(repo.cache().get(id).await.unwrap().is_absent());

    repo.store().set_failing(false);
    assert!(repo.get_record(&ctx, id).await.unwrap().is_some());
    assert_eq!(repo.store().get_by_id_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_positive_entry_expires_after_ttl() {
    let repo = repository();
    let ctx = RequestContext::new();
    let id = repo.create_record(&ctx, &fixtures::amy()).await.unwrap();
    repo.get_record(&ctx, id).await.unwrap();

    tokio::time::advance(Duration::from_secs(299)).await;
    repo.get_record(&ctx, id).await.unwrap();
    assert_eq!(repo.store().get_by_id_calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    repo.get_record(&ctx, id).await.unwrap();
    assert_eq!(repo.store().get_by_id_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_negative_entry_expires_after_negative_ttl() {
    let repo = repository();
    let ctx = RequestContext::new();
    assert_eq!(repo.get_record(&ctx, 1).await.unwrap(), None);

    // Created behind the repository's back: the negative marker hides it.
    repo.store().inner().insert(&fixtures::amy()).await.unwrap();
    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(repo.get_record(&ctx, 1).await.unwrap(), None);
    assert_eq!(repo.store().get_by_id_calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let record = repo.get_record(&ctx, 1).await.unwrap().unwrap();
    assert_eq!(record.username, "amy");
    assert_eq!(repo.store().get_by_id_calls(), 2);
}

// ============================================================================
// DEDUPLICATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_cold_reads_issue_one_query() {
    let repo = repository();
    let id = fixtures::seed(repo.store(), 1).await.unwrap()[0];
    repo.store().set_latency(Duration::from_millis(200));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.get_record(&RequestContext::new(), id).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(repo.store().get_by_id_calls(), 1);
    assert!(results.iter().all(|r| r.is_some() && *r == results[0]));
    let gate = repo.stats().gate;
    assert_eq!(gate.leaders, 1);
    assert_eq!(gate.coalesced, 9);
    assert_eq!(gate.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_reads_on_many_threads() {
    const CALLERS: usize = 16;
    let repo = repository();
    let id = fixtures::seed(repo.store(), 1).await.unwrap()[0];
    repo.store().set_latency(Duration::from_millis(300));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let repo = repo.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                repo.get_record(&RequestContext::new(), id).await
            })
        })
        .collect();

    for handle in handles {
        let record = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(record.id, id);
    }
    assert_eq!(repo.store().get_by_id_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_record_is_deduplicated_too() {
    let repo = repository();
    repo.store().set_latency(Duration::from_millis(100));

    let ctx = RequestContext::new();
    let (a, b, c) = tokio::join!(
        repo.get_record(&ctx, 9),
        repo.get_record(&ctx, 9),
        repo.get_record(&ctx, 9),
    );
    assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (None, None, None));
    assert_eq!(repo.store().get_by_id_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_leader_releases_key() {
    let repo = repository();
    let id = fixtures::seed(repo.store(), 1).await.unwrap()[0];
    repo.store().set_latency(Duration::from_secs(10));

    let impatient = RequestContext::with_timeout(Duration::from_secs(1));
    let err = repo.get_record(&impatient, id).await.unwrap_err();
    assert_eq!(err, RecordError::DeadlineExceeded);
    assert_eq!(repo.stats().gate.in_flight, 0);
    assert!(repo.cache().get(id).await.unwrap().is_absent());

    repo.store().set_latency(Duration::ZERO);
    let record = repo.get_record(&RequestContext::new(), id).await.unwrap();
    assert!(record.is_some());
    assert_eq!(repo.store().get_by_id_calls(), 2);
}

#[tokio::test]
async fn test_cancelled_context_is_reported() {
    let repo = repository();
    let ctx = RequestContext::new();
    ctx.cancel();

    assert_eq!(repo.get_record(&ctx, 1).await, Err(RecordError::Cancelled));
    assert_eq!(
        repo.update_record(&ctx, 1, &RecordPatch::new().username("x")).await,
        Err(RecordError::Cancelled)
    );
    assert_eq!(repo.store().read_calls(), 0);
}

// ============================================================================
// BATCH READS
// ============================================================================

#[tokio::test]
async fn test_batch_mixes_cached_uncached_and_missing() {
    let repo = repository();
    let ctx = RequestContext::new();
    let ids = fixtures::seed(repo.store(), 4).await.unwrap();

    // Warm ids[0] positively and 100 negatively.
    repo.get_record(&ctx, ids[0]).await.unwrap();
    repo.get_record(&ctx, 100).await.unwrap();
    repo.store().reset_counts();

    let records = repo
        .batch_get_records(&ctx, &[ids[0], ids[1], 100, 200, ids[2], ids[1]])
        .await
        .unwrap();

    let got: Vec<_> = records.iter().map(|r| r.id).collect();
    assert_eq!(got, vec![ids[0], ids[1], ids[2]]);
    assert_eq!(repo.store().batch_calls(), 1);
    assert_eq!(repo.store().get_by_id_calls(), 0);
    assert_eq!(repo.store().last_batch(), vec![ids[1], 200, ids[2]]);

    // Fetched records are now cached.
    assert!(repo.cache().get(ids[1]).await.unwrap().is_hit());
    assert!(repo.cache().get(ids[2]).await.unwrap().is_hit());
    assert!(repo.cache().get(200).await.unwrap().is_absent());
}

#[tokio::test]
async fn test_fully_cached_batch_skips_store() {
    let repo = repository();
    let ctx = RequestContext::new();
    let ids = fixtures::seed(repo.store(), 3).await.unwrap();

    repo.batch_get_records(&ctx, &ids).await.unwrap();
    let again = repo.batch_get_records(&ctx, &ids).await.unwrap();

    assert_eq!(again.len(), 3);
    assert_eq!(repo.store().batch_calls(), 1);
}

#[tokio::test]
async fn test_empty_batch_touches_no_tier() {
    let repo = repository();
    let records = repo
        .batch_get_records(&RequestContext::new(), &[])
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(repo.store().batch_calls(), 0);
    assert_eq!(repo.cache().tier().stats().await.unwrap().misses, 0);
}

#[tokio::test]
async fn test_batch_store_failure_is_propagated() {
    let repo = repository();
    let ctx = RequestContext::new();
    fixtures::seed(repo.store(), 2).await.unwrap();
    repo.store().set_failing(true);

    let err = repo.batch_get_records(&ctx, &[1, 2]).await.unwrap_err();
    assert!(matches!(err, RecordError::Storage(_)));
    assert!(repo.cache().get(1).await.unwrap().is_absent());
}

// ============================================================================
// WRITES
// ============================================================================

#[tokio::test]
async fn test_create_then_get_round_trips() {
    let repo = repository();
    let ctx = RequestContext::new();
    let data = NewRecord::new("carol", "c@x.com")
        .with_phone("555-0199")
        .with_password_hash("5f4dcc3b")
        .with_status(RecordStatus::Disabled);

    let id = repo.create_record(&ctx, &data).await.unwrap();
    let record = repo.get_record(&ctx, id).await.unwrap().unwrap();
    assert_eq!(record.id, id);
    assert_matches_new(&record, &data);
}

#[tokio::test]
async fn test_amy_scenario() {
    let repo = repository();
    let ctx = RequestContext::new();

    let id = repo
        .create_record(&ctx, &NewRecord::new("amy", "a@x.com"))
        .await
        .unwrap();
    assert_eq!(id, 1);

    let amy = repo.get_record(&ctx, 1).await.unwrap().unwrap();
    assert_eq!(amy.username, "amy");
    assert_eq!(amy.email, "a@x.com");
    assert!(amy.created_at <= chrono::Utc::now());
    assert_eq!(amy.created_at, amy.updated_at);

    let duplicate = repo
        .create_record(&ctx, &NewRecord::new("amy", "other@x.com"))
        .await;
    assert_duplicate_key(&duplicate, "username");
}

#[tokio::test]
async fn test_racing_creates_with_same_username() {
    let repo = repository();
    let ctx = RequestContext::new();
    let first = NewRecord::new("bob", "b1@x.com");
    let second = NewRecord::new("bob", "b2@x.com");

    let (a, b) = tokio::join!(
        repo.create_record(&ctx, &first),
        repo.create_record(&ctx, &second),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    assert_duplicate_key(loser, "username");
    assert_eq!(repo.store().inner().len(), 1);
}

#[tokio::test]
async fn test_update_then_get_observes_patch() {
    let repo = repository();
    let ctx = RequestContext::new();
    let id = repo.create_record(&ctx, &fixtures::amy()).await.unwrap();
    let before = repo.get_record(&ctx, id).await.unwrap().unwrap();

    repo.update_record(
        &ctx,
        id,
        &RecordPatch::new()
            .phone("555-0100")
            .status(RecordStatus::Disabled),
    )
    .await
    .unwrap();

    let after = repo.get_record(&ctx, id).await.unwrap().unwrap();
    assert_eq!(after.phone, "555-0100");
    assert_eq!(after.status, RecordStatus::Disabled);
    assert_eq!(after.username, before.username);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(repo.store().update_calls(), 1);
}

#[tokio::test]
async fn test_update_missing_record_is_not_found() {
    let repo = repository();
    let ctx = RequestContext::new();
    let result = repo
        .update_record(&ctx, 31, &RecordPatch::new().email("x@x.com"))
        .await;
    assert_not_found(&result, 31);
    assert_eq!(repo.store().update_calls(), 0);
}

#[tokio::test]
async fn test_update_duplicate_is_reported_and_entry_dropped() {
    let repo = repository();
    let ctx = RequestContext::new();
    let ids = fixtures::seed(repo.store(), 2).await.unwrap();
    repo.get_record(&ctx, ids[1]).await.unwrap();

    let result = repo
        .update_record(&ctx, ids[1], &RecordPatch::new().email("user0@x.com"))
        .await;
    assert_duplicate_key(&result, "email");
    assert!(repo.cache().get(ids[1]).await.unwrap().is_absent());
    assert_eq!(
        repo.get_record(&ctx, ids[1]).await.unwrap().unwrap().email,
        "user1@x.com"
    );
}

#[tokio::test]
async fn test_update_with_empty_patch_writes_nothing() {
    let repo = repository();
    let ctx = RequestContext::new();
    let id = repo.create_record(&ctx, &fixtures::amy()).await.unwrap();

    repo.update_record(&ctx, id, &RecordPatch::new()).await.unwrap();
    assert_eq!(repo.store().update_calls(), 0);
}

// ============================================================================
// UNCACHED LOOKUPS
// ============================================================================

#[tokio::test]
async fn test_unique_attribute_lookups_hit_their_own_column() {
    let repo = repository();
    let ctx = RequestContext::new();
    let data = NewRecord::new("dee", "d@x.com").with_phone("555-0142");
    let id = repo.create_record(&ctx, &data).await.unwrap();

    let by_name = repo.get_record_by_username(&ctx, "dee").await.unwrap();
    let by_email = repo.get_record_by_email(&ctx, "d@x.com").await.unwrap();
    let by_phone = repo.get_record_by_phone(&ctx, "555-0142").await.unwrap();
    for found in [by_name, by_email, by_phone] {
        assert_eq!(found.map(|r| r.id), Some(id));
    }

    assert_eq!(repo.get_record_by_email(&ctx, "dee").await.unwrap(), None);
    assert_eq!(repo.get_record_by_phone(&ctx, "d@x.com").await.unwrap(), None);

    // Uncached: asking again goes to the store again.
    repo.get_record_by_username(&ctx, "dee").await.unwrap();
    assert_eq!(repo.store().lookup_calls(), 6);
    assert!(repo.cache().tier().is_empty());
}

// ============================================================================
// KEY NAMESPACES
// ============================================================================

#[tokio::test]
async fn test_configured_namespace_prefixes_every_cache_entry() {
    let config = CacheTierConfig::default().with_namespace("blue");
    let tier = Arc::new(InMemoryCacheTier::new());
    let repo = RecordRepository::with_key_space(
        Arc::new(InMemoryRecordStore::new()),
        Arc::clone(&tier),
        KeySpace::from_config(&config),
        RepositoryConfig::default(),
    )
    .unwrap();
    let ctx = RequestContext::new();

    let id = repo.create_record(&ctx, &fixtures::amy()).await.unwrap();
    repo.get_record(&ctx, id).await.unwrap();
    repo.get_record(&ctx, 999).await.unwrap();

    assert_eq!(repo.cache().key(id), format!("blue:record:info:{}", id));
    assert!(tier.contains_key(&format!("blue:record:info:{}", id)));
    assert!(tier.contains_key("blue:record:info:999"));
    assert!(!tier.contains_key(&format!("record:info:{}", id)));

    repo.update_record(&ctx, id, &RecordPatch::new().email("amy@blue.com"))
        .await
        .unwrap();
    assert!(!tier.contains_key(&format!("blue:record:info:{}", id)));
}
