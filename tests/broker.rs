//! End-to-end tests against a live Redis instance.
//!
//! `REDIS_URL` must be set, and tests flush the selected database on the
//! way out since connections (and therefore keyspaces) are not shared
//! across the per-test runtimes `#[tokio::test]` spins up. Run with
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test broker --
//! --test-threads=1`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis_broker::{connect, Consumer, ConsumerOptions, FnHandler, Producer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Job {
    n: u32,
}

async fn setup() -> ConnectionManager {
    let redis_url = std::env::var("REDIS_URL").expect("REDIS_URL must be set to run broker tests");
    connect(redis_url).await.expect("failed to connect to redis")
}

async fn cleanup(mut conn: ConnectionManager) {
    let _: String = redis::cmd("FLUSHDB")
        .query_async(&mut conn)
        .await
        .expect("failed to flushdb");
}

fn unique_queue(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
async fn produced_message_is_delivered_and_acked() {
    let conn = setup().await;
    let queue = unique_queue("delivery");

    let producer = Producer::<Job>::new(conn.clone(), queue.clone());
    producer.produce(Job { n: 1 }).await.expect("produce failed");

    let delivered = Arc::new(std::sync::Mutex::new(None));
    let delivered_clone = delivered.clone();

    let consumer = Consumer::new(
        conn.clone(),
        conn.clone(),
        queue.clone(),
        ConsumerOptions::default(),
        FnHandler(move |job: Job| {
            let delivered_clone = delivered_clone.clone();
            async move {
                *delivered_clone.lock().unwrap() = Some(job);
                Ok(())
            }
        }),
    );
    let handle = consumer.run().await.expect("run failed");

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.shutdown().await.expect("shutdown failed");

    assert_eq!(*delivered.lock().unwrap(), Some(Job { n: 1 }));
    cleanup(conn).await;
}

#[tokio::test]
async fn failed_message_is_retried_up_to_threshold_then_dead_lettered() {
    let conn = setup().await;
    let queue = unique_queue("retry");

    let producer = Producer::<Job>::new(conn.clone(), queue.clone());
    producer.produce(Job { n: 7 }).await.expect("produce failed");

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = attempts.clone();

    let options = ConsumerOptions {
        message_retry_threshold: 2,
        pull_timeout: Duration::from_millis(200),
        heartbeat_interval: Duration::from_millis(200),
        gc_tick_interval: Duration::from_millis(200),
        ..Default::default()
    };

    let consumer = Consumer::new(
        conn.clone(),
        conn.clone(),
        queue.clone(),
        options,
        FnHandler(move |_job: Job| {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err("synthetic failure".to_string()) }
        }),
    );
    let handle = consumer.run().await.expect("run failed");

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.shutdown().await.expect("shutdown failed");

    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let keys = redis_broker::QueueKeys::new(&queue);
    let mut c = conn.clone();
    let dlq_len: i64 = redis::cmd("LLEN")
        .arg(keys.dlq())
        .query_async(&mut c)
        .await
        .expect("llen failed");
    assert_eq!(dlq_len, 1);

    cleanup(conn).await;
}

#[tokio::test]
async fn expired_message_is_discarded_not_dead_lettered() {
    let conn = setup().await;
    let queue = unique_queue("ttl");

    let producer = Producer::<Job>::new(conn.clone(), queue.clone());
    producer
        .produce_with_ttl(Job { n: 42 }, 50)
        .await
        .expect("produce failed");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let handled = Arc::new(AtomicU32::new(0));
    let handled_clone = handled.clone();

    let options = ConsumerOptions {
        pull_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    let consumer = Consumer::new(
        conn.clone(),
        conn.clone(),
        queue.clone(),
        options,
        FnHandler(move |_job: Job| {
            handled_clone.fetch_add(1, Ordering::SeqCst);
            async move { Ok(()) }
        }),
    );
    let handle = consumer.run().await.expect("run failed");

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.shutdown().await.expect("shutdown failed");

    assert_eq!(handled.load(Ordering::SeqCst), 0, "expired message must never reach the handler");

    let keys = redis_broker::QueueKeys::new(&queue);
    let mut c = conn.clone();
    let dlq_len: i64 = redis::cmd("LLEN")
        .arg(keys.dlq())
        .query_async(&mut c)
        .await
        .expect("llen failed");
    assert_eq!(dlq_len, 0, "expired message must be discarded, not dead-lettered");

    cleanup(conn).await;
}

#[tokio::test]
async fn crashed_consumer_in_flight_message_is_reclaimed_by_gc() {
    let conn = setup().await;
    let queue = unique_queue("crash-recovery");
    let keys = redis_broker::QueueKeys::new(&queue);

    let producer = Producer::<Job>::new(conn.clone(), queue.clone());
    producer.produce(Job { n: 99 }).await.expect("produce failed");

    // Simulate a consumer that pulled the message and then vanished
    // without ever registering a liveness token or a heartbeat.
    let inflight = keys.inflight("dead-consumer");
    let mut c = conn.clone();
    let _: Option<String> = redis::cmd("BLMOVE")
        .arg(keys.pending())
        .arg(&inflight)
        .arg("LEFT")
        .arg("RIGHT")
        .arg(1.0)
        .query_async(&mut c)
        .await
        .expect("blmove failed");
    let _: () = redis::cmd("SADD")
        .arg(keys.consumers())
        .arg("dead-consumer")
        .query_async(&mut c)
        .await
        .expect("sadd failed");

    let gc = redis_broker::GarbageCollector::new(conn.clone(), queue.clone(), 3, Duration::from_millis(100));
    assert!(gc.acquire_lease("gc-test").await.expect("acquire_lease failed"));
    let outcomes = gc.tick().await.expect("gc tick failed");
    assert_eq!(outcomes, vec![redis_broker::ReclaimOutcome::Requeued]);

    let pending_len: i64 = redis::cmd("LLEN")
        .arg(keys.pending())
        .query_async(&mut c)
        .await
        .expect("llen failed");
    assert_eq!(pending_len, 1, "reclaimed message must land back in pending");

    let inflight_len: i64 = redis::cmd("LLEN")
        .arg(&inflight)
        .query_async(&mut c)
        .await
        .expect("llen failed");
    assert_eq!(inflight_len, 0);

    cleanup(conn).await;
}

#[tokio::test]
async fn only_one_consumer_ever_observes_a_given_message() {
    let conn = setup().await;
    let queue = unique_queue("exclusivity");

    let producer = Producer::<Job>::new(conn.clone(), queue.clone());
    for i in 0..10 {
        producer.produce(Job { n: i }).await.expect("produce failed");
    }

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    let options = ConsumerOptions {
        pull_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    for _ in 0..3 {
        let seen = seen.clone();
        let consumer = Consumer::new(
            conn.clone(),
            conn.clone(),
            queue.clone(),
            options.clone(),
            FnHandler(move |job: Job| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(job.n);
                    Ok(())
                }
            }),
        );
        handles.push(consumer.run().await.expect("run failed"));
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    for handle in handles {
        handle.shutdown().await.expect("shutdown failed");
    }

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>(), "every message must be delivered exactly once, total");

    cleanup(conn).await;
}
