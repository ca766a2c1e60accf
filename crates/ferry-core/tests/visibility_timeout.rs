mod helpers;

use std::time::Duration;

use ferry_core::{MessageState, PollArgs, QueueClient, QueueConfig};
use helpers::Order;

#[tokio::test]
async fn unacknowledged_message_is_redelivered_by_the_reaper() {
    let (client, _dir) = helpers::client();
    let orders = client.json_queue::<Order>("orders").unwrap();
    orders
        .set_config(QueueConfig {
            visibility_timeout_ms: 100,
            ..Default::default()
        })
        .unwrap();
    let added = orders.add_value(Order::new(1, "x")).unwrap().unwrap();

    let first = orders.poll_one().await.unwrap().unwrap();
    assert_eq!(first.delivery_count, 1);
    // The consumer "crashes" here and never acknowledges.

    let second = orders
        .poll(PollArgs::new(1).wait(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, added.id);
    assert_eq!(second[0].delivery_count, 2);
}

#[tokio::test]
async fn poll_visibility_override_applies() {
    let (client, _dir) = helpers::client();
    let orders = client.json_queue::<Order>("orders").unwrap();
    orders.add_value(Order::new(1, "x")).unwrap();

    let polled = orders
        .poll(PollArgs::new(1).visibility(Duration::from_millis(50)))
        .await
        .unwrap();
    let id = polled[0].id.clone();

    helpers::eventually(Duration::from_secs(5), || {
        orders
            .get(&id)
            .unwrap()
            .is_some_and(|m| m.state == MessageState::Ready)
    })
    .await;
}

#[tokio::test]
async fn reaper_of_another_client_recovers_abandoned_messages() {
    let dir = tempfile::tempdir().unwrap();
    let config = helpers::config(dir.path());
    let storage = std::sync::Arc::new(ferry_core::RocksDbStorage::open(dir.path()).unwrap());
    let crashed = QueueClient::new(storage.clone(), config.clone()).unwrap();
    let survivor = QueueClient::new(storage, config).unwrap();

    let doomed = crashed.json_queue::<Order>("orders").unwrap();
    doomed
        .set_config(QueueConfig {
            visibility_timeout_ms: 100,
            ..Default::default()
        })
        .unwrap();
    doomed.add_value(Order::new(1, "x")).unwrap();
    doomed.poll_one().await.unwrap().unwrap();
    drop(doomed);
    crashed.shutdown().unwrap();

    let orders = survivor.json_queue::<Order>("orders").unwrap();
    let recovered = orders
        .poll(PollArgs::new(1).wait(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].delivery_count, 2);
}
