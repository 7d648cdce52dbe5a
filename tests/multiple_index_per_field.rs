//! One field can carry `#[dynamorm(index = ..., role = ...)]` more than
//! once, putting it on both sides of two different secondary indexes.

mod common;

use std::sync::Arc;

use dynamorm::expr::Operator;
use dynamorm::{AttributeValue, Client, DynamormConfig, DynamormTable, Fetch};

use common::FakeTransport;

#[derive(Debug, Default, Clone, PartialEq, DynamormTable)]
#[dynamorm(table = "orders")]
struct Order {
    #[pk]
    order_id: String,

    #[dynamorm(index = "by_customer", role = "pk")]
    #[dynamorm(index = "by_status_customer", role = "sk")]
    customer_id: String,

    #[dynamorm(index = "by_status_customer", role = "pk")]
    status: String,
}

async fn seeded_client() -> Client {
    let config = DynamormConfig::builder().table_name("orders").build().unwrap();
    let transport = FakeTransport::new().table("orders", "order_id", None);
    let client = Client::new(Arc::new(transport), config);
    let orders = dynamorm::model::<Order>(&client).unwrap();

    orders
        .create(&Order {
            order_id: "o-1".to_string(),
            customer_id: "cust-1".to_string(),
            status: "shipped".to_string(),
        })
        .await
        .unwrap();
    orders
        .create(&Order {
            order_id: "o-2".to_string(),
            customer_id: "cust-1".to_string(),
            status: "pending".to_string(),
        })
        .await
        .unwrap();
    orders
        .create(&Order {
            order_id: "o-3".to_string(),
            customer_id: "cust-2".to_string(),
            status: "shipped".to_string(),
        })
        .await
        .unwrap();
    client
}

#[test]
fn customer_id_serves_both_indexes() {
    let metadata = dynamorm::registry::SchemaRegistry::global()
        .metadata::<Order>()
        .unwrap();
    let customer_id = metadata.field("customer_id").unwrap();
    assert_eq!(customer_id.index_participation.len(), 2);
    assert!(metadata.index("by_customer").is_some());
    assert!(metadata.index("by_status_customer").is_some());
}

#[tokio::test]
async fn queries_by_customer_as_the_partition_key() {
    let client = seeded_client().await;
    let orders = dynamorm::model::<Order>(&client).unwrap();

    let page = orders
        .query()
        .where_(
            "customer_id",
            Operator::Eq,
            vec![AttributeValue::S("cust-1".to_string())],
        )
        .unwrap()
        .send(Fetch::All)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 2);
}

#[tokio::test]
async fn queries_by_status_with_customer_as_the_sort_key() {
    let client = seeded_client().await;
    let orders = dynamorm::model::<Order>(&client).unwrap();

    let page = orders
        .query()
        .where_(
            "status",
            Operator::Eq,
            vec![AttributeValue::S("shipped".to_string())],
        )
        .unwrap()
        .where_(
            "customer_id",
            Operator::Eq,
            vec![AttributeValue::S("cust-1".to_string())],
        )
        .unwrap()
        .send(Fetch::All)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].order_id, "o-1");
}
