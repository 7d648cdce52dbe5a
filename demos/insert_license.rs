mod common;
use crate::common::License;

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
        .table_name("licenses")
        .endpoint_override("http://localhost:8000")
        .kms_key_ref("alias/dynamorm-demo")
        .build()?;

    let client = Client::from_env(config).await;
    let licenses = dynamorm::model::<License>(&client)?;

    licenses
        .create(&License::new("dan@coderdan.co", "1234567", "2027-01-10"))
        .await?;

    Ok(())
}
