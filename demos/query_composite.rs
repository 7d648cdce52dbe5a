mod common;
use crate::common::User;

use dynamorm::expr::Operator;
use dynamorm::{AttributeValue, Client, DynamormConfig, Fetch};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    env_logger::init();

    let config = DynamormConfig::builder()
        .table_name("users")
        .endpoint_override("http://localhost:8000")
        .build()?;

    let client = Client::from_env(config).await;
    let users = dynamorm::model::<User>(&client)?;

    // Composite predicate: base-table equality on the partition key plus a
    // filter on a non-key attribute. The planner picks `Query` on the base
    // table for the `email` equality and filters `name` after the fact.
    let page = users
        .query()
        .where_(
            "email",
            Operator::Eq,
            vec![AttributeValue::S("dan@coderdan.co".to_string())],
        )?
        .where_(
            "name",
            Operator::BeginsWith,
            vec![AttributeValue::S("Dan Drap".to_string())],
        )?
        .send(Fetch::All)
        .await?;

    dbg!(page.items);

    Ok(())
}
