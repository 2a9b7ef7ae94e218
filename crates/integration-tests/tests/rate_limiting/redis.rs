//! These tests need a Redis server on localhost:6379.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indoc::formatdoc;
use integration_tests::TestServer;

fn unique_prefix(test: &str) -> String {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
    format!("test_{test}_{timestamp}:")
}

fn redis_config(prefix: &str, window: &str, limit: u32) -> String {
    formatdoc! {r#"
        [server.rate_limit]
        enabled = true
        window = "{window}"
        limit = {limit}

        [server.rate_limit.storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"
    "#}
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn basic_redis_rate_limiting() {
    let config = redis_config(&unique_prefix("basic"), "60s", 3);
    let server = TestServer::builder().build(&config).await;

    let mut statuses = Vec::new();
    let mut remaining = Vec::new();

    for _ in 0..4 {
        let response = server.client.get("/").await;

        statuses.push(response.status().as_u16());
        remaining.push(response.headers()["x-ratelimit-remaining"].to_str().unwrap().to_string());
    }

    assert_eq!(statuses, [200, 200, 200, 429]);
    assert_eq!(remaining, ["2", "1", "0", "0"]);
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn instances_share_one_budget() {
    let config = redis_config(&unique_prefix("shared"), "60s", 2);

    let first = TestServer::builder().build(&config).await;
    let second = TestServer::builder().build(&config).await;

    assert_eq!(first.client.get("/").await.status(), 200);
    assert_eq!(second.client.get("/").await.status(), 200);
    assert_eq!(first.client.get("/").await.status(), 429);
    assert_eq!(second.client.get("/").await.status(), 429);
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn redis_window_expires() {
    let config = redis_config(&unique_prefix("expiry"), "1s", 1);
    let server = TestServer::builder().build(&config).await;

    assert_eq!(server.client.get("/").await.status(), 200);
    assert_eq!(server.client.get("/").await.status(), 429);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(server.client.get("/").await.status(), 200);
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn reset_time_is_fixed_for_the_window() {
    let config = redis_config(&unique_prefix("reset_time"), "60s", 10);

    let first = TestServer::builder().build(&config).await;
    let second = TestServer::builder().build(&config).await;

    let opening = first.client.get("/").await;
    let opening_reset = opening.headers()["x-ratelimit-reset"].to_str().unwrap().to_string();

    // Cross at least one second boundary before the later hits.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let later = first.client.get("/").await;
    let elsewhere = second.client.get("/").await;

    assert_eq!(later.headers()["x-ratelimit-reset"], opening_reset.as_str());
    assert_eq!(elsewhere.headers()["x-ratelimit-reset"], opening_reset.as_str());
}
