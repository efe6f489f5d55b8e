//! Publishes a handful of jobs to a queue named on the command line (or
//! "emails" by default), then exits. Pairs with `broker-consume`.

use std::time::Duration;

use redis_broker::Producer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Email {
    to: String,
    subject: String,
    body: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let queue_name = std::env::args().nth(1).unwrap_or_else(|| "emails".into());
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

    let conn = redis_broker::connect(redis_url.as_str()).await?;
    let producer = Producer::<Email>::new(conn, queue_name.clone());

    for i in 0..5 {
        let id = producer
            .produce(Email {
                to: format!("user{i}@example.com"),
                subject: "Hello from broker-produce".into(),
                body: format!("This is message #{i}"),
            })
            .await?;
        log::info!("published {id} to {queue_name}");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Ok(())
}
