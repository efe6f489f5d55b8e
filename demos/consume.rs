//! Runs a single consumer against a queue named on the command line (or
//! "emails" by default) until Ctrl-C, then shuts down gracefully.

use std::time::Duration;

use redis_broker::{Consumer, ConsumerOptions, FnHandler};
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

    let conn_blocking = redis_broker::connect(redis_url.as_str()).await?;
    let conn_control = redis_broker::connect(redis_url.as_str()).await?;

    let options = ConsumerOptions {
        message_consume_timeout: Some(Duration::from_secs(30)),
        ..Default::default()
    };

    let consumer = Consumer::new(
        conn_blocking,
        conn_control,
        queue_name.clone(),
        options,
        FnHandler(|email: Email| async move {
            log::info!("sending {} to {}", email.subject, email.to);
            Ok(())
        }),
    );

    log::info!("consumer {} starting on queue {queue_name}", consumer.id());
    let handle = consumer.run().await?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    handle.shutdown().await?;
    Ok(())
}
