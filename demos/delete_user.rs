mod common;
use crate::common::User;

use dynamorm::{AttributeValue, Client, DynamormConfig, PrimaryKey};

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

    let key = PrimaryKey::partition(AttributeValue::S("jane@smith.org".to_string()));
    users.delete(key.clone(), None).await?;

    // Expected: ExecutorError::ItemNotFound, since the record above no longer exists.
    let res = users.get(key).await;
    println!("{res:#?}");

    Ok(())
}
