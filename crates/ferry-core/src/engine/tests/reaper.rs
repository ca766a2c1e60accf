use super::*;

use crate::engine::config::ReaperConfig;
use crate::message::now_ns;

#[test]
fn timed_out_message_is_redelivered() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    let added = add(&q, "x", T0);
    let first = claim_one(&q, T0);
    assert_eq!(first.visibility_deadline, Some(T0 + 30 * SEC));

    assert_eq!(q.reap(T0 + 29 * SEC).unwrap().reclaimed, 0);
    let stats = q.reap(T0 + 31 * SEC).unwrap();

    assert_eq!(stats.reclaimed, 1);
    let reclaimed = q.get(&added.id).unwrap().unwrap();
    assert_eq!(reclaimed.state, MessageState::Ready);
    assert_eq!(reclaimed.delivery_count, 1);
    assert_eq!(reclaimed.visibility_deadline, None);

    let second = claim_one(&q, T0 + 31 * SEC);
    assert_eq!(second.id, added.id);
    assert_eq!(second.delivery_count, 2);
    assert_state_exclusive(&q);
}

#[test]
fn acknowledged_message_is_not_reclaimed() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    add(&q, "x", T0);
    let claimed = claim_one(&q, T0);
    q.acknowledge(&[claimed.id.clone()]).unwrap();

    let stats = q.reap(T0 + 60 * SEC).unwrap();

    assert_eq!(stats, ReapStats::default());
    assert!(q.get(&claimed.id).unwrap().is_none());
}

#[test]
fn timed_out_message_at_limit_is_dead_lettered() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    let dlq = queue(&ctx, "orders-dlq");
    configure(
        &q,
        QueueConfig {
            delivery_limit: 1,
            dead_letter_queue: Some("orders-dlq".to_string()),
            ..Default::default()
        },
    );
    let added = add(&q, "x", T0);
    claim_one(&q, T0);

    let stats = q.reap(T0 + 31 * SEC).unwrap();

    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.reclaimed, 0);
    assert!(q.get(&added.id).unwrap().is_none());
    assert_eq!(dlq.get(&added.id).unwrap().unwrap().state, MessageState::Ready);
}

#[test]
fn concurrent_reapers_reclaim_each_message_once() {
    let (ctx, _dir) = test_setup();
    let other = second_context(&ctx);
    let q = queue(&ctx, "orders");
    for i in 0..20 {
        add(&q, &format!("m{i}"), T0 + i);
    }
    assert_eq!(q.claim(20, VISIBILITY, T0 + 100).unwrap().len(), 20);

    let reapers: Vec<_> = [Arc::clone(&ctx), other]
        .into_iter()
        .map(|ctx| {
            std::thread::spawn(move || queue(&ctx, "orders").reap(T0 + 60 * SEC).unwrap())
        })
        .collect();
    let total: u64 = reapers
        .into_iter()
        .map(|handle| handle.join().unwrap().reclaimed)
        .sum();

    assert_eq!(total, 20);
    for record in q.list_all().unwrap() {
        assert_eq!(record.delivery_count, 1);
    }
    assert_eq!(q.list_all().unwrap().len(), 20);
    assert_state_exclusive(&q);
}

#[test]
fn expired_messages_are_removed_in_any_state() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    configure(
        &q,
        QueueConfig {
            message_ttl_ms: 10_000,
            ..Default::default()
        },
    );
    add(&q, "ready", T0);
    q.add(
        NewMessage {
            delay: Duration::from_secs(60),
            ..msg("delayed")
        },
        T0,
    )
    .unwrap()
    .unwrap();
    add(&q, "claimed", T0);
    claim_one(&q, T0);
    let fresh = add(&q, "fresh", T0 + 5 * SEC);

    let stats = q.reap(T0 + 11 * SEC).unwrap();

    assert_eq!(stats.expired, 3);
    assert_eq!(q.size().unwrap(), 1);
    assert!(q.get(&fresh.id).unwrap().is_some());
    assert_state_exclusive(&q);
}

#[test]
fn due_delayed_messages_are_promoted() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    let delayed = |secs| NewMessage {
        delay: Duration::from_secs(secs),
        ..msg("later")
    };
    q.add(delayed(5), T0).unwrap().unwrap();
    q.add(delayed(50), T0).unwrap().unwrap();

    let stats = q.reap(T0 + 6 * SEC).unwrap();

    assert_eq!(stats.promoted, 1);
    assert_eq!(q.count_delayed().unwrap(), 1);
    assert_eq!(q.list_all().unwrap().len(), 1);
}

#[test]
fn registry_runs_one_reaper_per_queue_while_leased() {
    let (ctx, _dir) = test_setup();
    let registry = Arc::new(ReaperRegistry::new(Arc::clone(&ctx)));

    let first = registry.acquire("orders").unwrap();
    let second = registry.acquire("orders").unwrap();
    let other = registry.acquire("billing").unwrap();
    assert!(registry.is_running("orders"));

    drop(first);
    assert!(registry.is_running("orders"));
    drop(second);
    assert!(!registry.is_running("orders"));
    assert!(registry.is_running("billing"));

    registry.shutdown_all();
    assert!(!registry.is_running("billing"));
    drop(other);
}

#[test]
fn background_reaper_reclaims_timed_out_messages() {
    let (ctx, _dir) = test_setup_with_config(ClientConfig {
        reaper: ReaperConfig {
            interval_ms: 10,
            ..Default::default()
        },
        ..Default::default()
    });
    let registry = Arc::new(ReaperRegistry::new(Arc::clone(&ctx)));
    let _lease = registry.acquire("orders").unwrap();
    let q = queue(&ctx, "orders");
    let added = add(&q, "x", now_ns());

    let claimed = q.claim(1, Duration::from_millis(20), now_ns()).unwrap();
    assert_eq!(claimed.len(), 1);

    wait_for(|| {
        q.get(&added.id)
            .unwrap()
            .is_some_and(|r| r.state == MessageState::Ready)
    });
    registry.shutdown_all();
}

#[test]
fn last_lease_release_forgets_the_queue_waker() {
    let (ctx, _dir) = test_setup();
    let registry = Arc::new(ReaperRegistry::new(Arc::clone(&ctx)));

    for i in 0..3 {
        let name = format!("tmp-{i}");
        let first = registry.acquire(&name).unwrap();
        let second = registry.acquire(&name).unwrap();
        ctx.wakers.get(&name);

        drop(first);
        assert!(ctx.wakers.contains(&name), "still leased");
        drop(second);
        assert!(!ctx.wakers.contains(&name));
    }
    registry.shutdown_all();
}
