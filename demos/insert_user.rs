mod common;
use crate::common::User;

use dynamorm::{Client, DynamormConfig};

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

    users.create(&User::new("dan@coderdan.co", "Dan Draper")).await?;
    users.create(&User::new("jane@smith.org", "Jane Smith")).await?;
    users
        .create(&User::new("daniel@example.com", "Daniel Johnson"))
        .await?;

    Ok(())
}
