use super::*;

fn dedup_queue(ctx: &Arc<EngineContext>) -> QueueEngine {
    let q = queue(ctx, "orders");
    configure(
        &q,
        QueueConfig {
            dedup_window_ms: 10_000,
            ..Default::default()
        },
    );
    q
}

fn keyed(payload: &str, key: &str) -> NewMessage {
    NewMessage {
        dedup: Some(Dedup::ByKey(key.to_string())),
        ..msg(payload)
    }
}

#[test]
fn same_key_within_window_is_suppressed() {
    let (ctx, _dir) = test_setup();
    let q = dedup_queue(&ctx);

    assert!(q.add(keyed("a", "k"), T0).unwrap().is_some());
    assert!(q.add(keyed("b", "k"), T0 + SEC).unwrap().is_none());

    assert_eq!(q.size().unwrap(), 1);
}

#[test]
fn same_key_after_window_is_accepted() {
    let (ctx, _dir) = test_setup();
    let q = dedup_queue(&ctx);

    q.add(keyed("a", "k"), T0).unwrap().unwrap();

    assert!(q.add(keyed("b", "k"), T0 + 10 * SEC).unwrap().is_some());
    assert_eq!(q.size().unwrap(), 2);
}

#[test]
fn hash_dedup_compares_payloads() {
    let (ctx, _dir) = test_setup();
    let q = dedup_queue(&ctx);
    let hashed = |payload: &str| NewMessage {
        dedup: Some(Dedup::ByHash),
        ..msg(payload)
    };

    assert!(q.add(hashed("same"), T0).unwrap().is_some());
    assert!(q.add(hashed("same"), T0 + 1).unwrap().is_none());
    assert!(q.add(hashed("different"), T0 + 2).unwrap().is_some());
}

#[test]
fn dedup_is_ignored_when_window_is_zero() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");

    let first = q.add(keyed("a", "k"), T0).unwrap().unwrap();
    let second = q.add(keyed("b", "k"), T0 + 1).unwrap().unwrap();

    assert_eq!(first.dedup_key, None);
    assert_eq!(second.dedup_key, None);
    assert_eq!(q.size().unwrap(), 2);
}

#[test]
fn dedup_entry_outlives_acknowledgement() {
    let (ctx, _dir) = test_setup();
    let q = dedup_queue(&ctx);
    q.add(keyed("a", "k"), T0).unwrap().unwrap();
    let claimed = claim_one(&q, T0);
    q.acknowledge(&[claimed.id]).unwrap();

    assert!(q.add(keyed("a", "k"), T0 + SEC).unwrap().is_none());
}

#[test]
fn duplicate_takes_precedence_over_full_queue() {
    let (ctx, harness, _dir) = test_setup_with_metrics();
    let q = queue(&ctx, "orders");
    configure(
        &q,
        QueueConfig {
            size_limit: 1,
            dedup_window_ms: 10_000,
            ..Default::default()
        },
    );
    q.add(keyed("a", "k"), T0).unwrap().unwrap();

    assert!(q.add(keyed("a", "k"), T0 + 1).unwrap().is_none());

    let duplicates = harness.counter(
        "ferry.messages.suppressed",
        &[
            opentelemetry::KeyValue::new("queue", "orders"),
            opentelemetry::KeyValue::new("reason", "duplicate"),
        ],
    );
    assert_eq!(duplicates, Some(1));
}

#[test]
fn reaper_prunes_expired_dedup_entries() {
    let (ctx, _dir) = test_setup();
    let q = dedup_queue(&ctx);
    q.add(keyed("a", "k1"), T0).unwrap().unwrap();
    q.add(keyed("b", "k2"), T0 + 5 * SEC).unwrap().unwrap();

    let stats = q.reap(T0 + 12 * SEC).unwrap();

    assert_eq!(stats.dedup_pruned, 1);
    let remaining = ctx
        .storage
        .list_dedup(&keys::queue_prefix("orders"))
        .unwrap();
    assert_eq!(remaining.len(), 1);
}
