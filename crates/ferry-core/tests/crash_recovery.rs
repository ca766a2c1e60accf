mod helpers;

use ferry_core::{AddArgs, QueueClient, QueueConfig, QueueOperation};
use helpers::Order;

#[tokio::test]
async fn messages_and_settings_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    let mut ids = Vec::new();
    {
        let client = QueueClient::open(helpers::config(dir.path())).unwrap();
        let orders = client.json_queue::<Order>("orders").unwrap();
        orders
            .set_config(QueueConfig {
                size_limit: 100,
                ..Default::default()
            })
            .unwrap();
        orders.disable_operation(QueueOperation::Move).unwrap();
        for i in 0..5 {
            let msg = orders
                .add(AddArgs::new(Order::new(i, "item")).priority(i as i32))
                .unwrap()
                .unwrap();
            ids.push(msg.id);
        }
        drop(orders);
        client.shutdown().unwrap();
    }

    let client = QueueClient::open(helpers::config(dir.path())).unwrap();
    let orders = client.json_queue::<Order>("orders").unwrap();

    assert_eq!(orders.size().unwrap(), 5);
    assert_eq!(orders.contains_many(&ids).unwrap(), 5);
    assert_eq!(orders.config().unwrap().unwrap().size_limit, 100);
    assert_eq!(orders.disabled_operations().unwrap(), vec![QueueOperation::Move]);

    let values: Vec<u32> = orders
        .list_all()
        .unwrap()
        .into_iter()
        .map(|m| m.value.id)
        .collect();
    assert_eq!(values, vec![4, 3, 2, 1, 0]);

    let msg = orders.poll_one().await.unwrap().unwrap();
    assert_eq!(msg.value.id, 4);
    assert!(orders.acknowledge(&msg.id).unwrap());
}
