use super::*;

#[test]
fn add_stores_ready_message() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");

    let record = add(&q, "x", T0);

    assert_eq!(record.state, MessageState::Ready);
    assert_eq!(record.delivery_count, 0);
    assert_eq!(record.available_at, T0);
    assert_eq!(record.visibility_deadline, None);
    assert_eq!(q.size().unwrap(), 1);
    assert_eq!(q.get(&record.id).unwrap(), Some(record));
}

#[test]
fn add_with_delay_is_delayed_until_available() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");

    let record = q
        .add(
            NewMessage {
                delay: Duration::from_secs(5),
                ..msg("later")
            },
            T0,
        )
        .unwrap()
        .unwrap();

    assert_eq!(record.state, MessageState::Delayed);
    assert_eq!(record.available_at, T0 + 5 * SEC);
    assert_eq!(q.count_delayed().unwrap(), 1);
    assert!(q.claim(1, VISIBILITY, T0 + SEC).unwrap().is_empty());

    let claimed = claim_one(&q, T0 + 5 * SEC);
    assert_eq!(claimed.id, record.id);
    assert_eq!(q.count_delayed().unwrap(), 0);
    assert_state_exclusive(&q);
}

#[test]
fn producer_supplied_id_is_kept() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");

    let record = q
        .add(
            NewMessage {
                id: Some("order-42".to_string()),
                ..msg("x")
            },
            T0,
        )
        .unwrap()
        .unwrap();

    assert_eq!(record.id, "order-42");
}

#[test]
fn unstorable_producer_ids_are_rejected() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    let with_id = |id: String| NewMessage {
        id: Some(id),
        ..msg("x")
    };

    assert!(matches!(
        q.add(with_id(String::new()), T0),
        Err(AddError::InvalidId(InvalidName::Empty))
    ));

    // Ids that only differ past the first 64 KiB would share a storage key.
    let prefix = "m".repeat(usize::from(u16::MAX));
    for suffix in ["-a", "-b"] {
        assert!(matches!(
            q.add(with_id(format!("{prefix}{suffix}")), T0),
            Err(AddError::InvalidId(InvalidName::TooLong { .. }))
        ));
    }

    let longest = "m".repeat(crate::message::MAX_MESSAGE_ID_LEN);
    assert_eq!(q.add(with_id(longest.clone()), T0).unwrap().unwrap().id, longest);
    assert_eq!(q.size().unwrap(), 1);
}

#[test]
fn duplicate_producer_id_yields_no_message() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    let with_id = |payload: &str| NewMessage {
        id: Some("order-42".to_string()),
        ..msg(payload)
    };

    assert!(q.add(with_id("first"), T0).unwrap().is_some());
    assert!(q.add(with_id("second"), T0 + SEC).unwrap().is_none());

    assert_eq!(q.size().unwrap(), 1);
    assert_eq!(payload(&q.get("order-42").unwrap().unwrap()), "first");
}

#[test]
fn oversized_payload_yields_no_message() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    configure(
        &q,
        QueueConfig {
            message_size_limit: 3,
            ..Default::default()
        },
    );

    assert!(q.add(msg("abcd"), T0).unwrap().is_none());
    assert!(q.add(msg("abc"), T0).unwrap().is_some());
    assert_eq!(q.size().unwrap(), 1);
}

#[test]
fn size_limit_rejects_add_until_a_message_is_acked() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    configure(
        &q,
        QueueConfig {
            size_limit: 2,
            ..Default::default()
        },
    );

    add(&q, "a", T0);
    add(&q, "b", T0 + 1);
    let claimed = q.claim(2, VISIBILITY, T0 + 2).unwrap();
    assert_eq!(claimed.len(), 2);

    assert!(q.add(msg("c"), T0 + 3).unwrap().is_none(), "third add exceeds the limit");

    assert_eq!(q.acknowledge(&[claimed[0].id.clone()]).unwrap(), 1);
    assert!(q.add(msg("d"), T0 + 4).unwrap().is_some());
    assert_eq!(q.size().unwrap(), 2);
}

#[test]
fn add_many_reports_suppressed_positions() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    configure(
        &q,
        QueueConfig {
            size_limit: 2,
            ..Default::default()
        },
    );

    let results = q
        .add_many(vec![msg("a"), msg("b"), msg("c")], T0)
        .unwrap();

    let added: Vec<bool> = results
        .iter()
        .map(|result| result.as_ref().unwrap().is_some())
        .collect();
    assert_eq!(added, vec![true, true, false]);
    assert_eq!(q.size().unwrap(), 2);
}

#[test]
fn ttl_sets_expiry_from_queue_or_message() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    configure(
        &q,
        QueueConfig {
            message_ttl_ms: 1_000,
            ..Default::default()
        },
    );

    let default_ttl = add(&q, "a", T0);
    let custom_ttl = q
        .add(
            NewMessage {
                ttl: Some(Duration::from_secs(60)),
                ..msg("b")
            },
            T0,
        )
        .unwrap()
        .unwrap();

    assert_eq!(default_ttl.expires_at, Some(T0 + SEC));
    assert_eq!(custom_ttl.expires_at, Some(T0 + 60 * SEC));
}

#[test]
fn headers_and_priority_are_stored() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    let mut headers = HashMap::new();
    headers.insert("tenant".to_string(), serde_json::json!("acme"));

    let record = q
        .add(
            NewMessage {
                headers,
                priority: 7,
                ..msg("x")
            },
            T0,
        )
        .unwrap()
        .unwrap();

    let stored = q.get(&record.id).unwrap().unwrap();
    assert_eq!(stored.priority, 7);
    assert_eq!(stored.headers["tenant"], serde_json::json!("acme"));
}

#[test]
fn concurrent_adds_never_exceed_size_limit() {
    let (ctx, _dir) = test_setup();
    let q = queue(&ctx, "orders");
    configure(
        &q,
        QueueConfig {
            size_limit: 5,
            ..Default::default()
        },
    );

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let q = q.clone();
            std::thread::spawn(move || {
                (0..5)
                    .filter(|i| {
                        q.add(msg(&format!("{worker}-{i}")), T0 + i)
                            .unwrap()
                            .is_some()
                    })
                    .count()
            })
        })
        .collect();
    let added: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(added, 5);
    assert_eq!(q.size().unwrap(), 5);
    assert_state_exclusive(&q);
}
