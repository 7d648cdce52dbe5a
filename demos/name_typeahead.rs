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

    let page = users
        .query()
        .index("by_name")
        .where_(
            "name",
            Operator::BeginsWith,
            vec![AttributeValue::S("Dan".to_string())],
        )?
        .send(Fetch::All)
        .await?;

    dbg!(page.items);

    Ok(())
}
