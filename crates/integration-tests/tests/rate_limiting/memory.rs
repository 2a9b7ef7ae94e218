use std::time::Duration;

use futures::future::join_all;
use indoc::indoc;
use integration_tests::TestServer;

#[tokio::test]
async fn new_window_after_expiry() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        window = "1s"
        limit = 1
    "#};

    let server = TestServer::builder().build(config).await;

    assert_eq!(server.client.get("/").await.status(), 200);
    assert_eq!(server.client.get("/").await.status(), 429);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = server.client.get("/").await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
}

#[tokio::test]
async fn sweeping_does_not_change_decisions() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        window = "1s"
        limit = 1

        [server.rate_limit.storage]
        type = "memory"
        sweep_interval = "100ms"
    "#};

    let server = TestServer::builder().build(config).await;

    assert_eq!(server.client.get("/").await.status(), 200);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.client.get("/").await.status(), 429);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(server.client.get("/").await.status(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_counter() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        window = "60s"
        limit = 10
    "#};

    let server = TestServer::builder().build(config).await;

    let responses = join_all((0..50).map(|_| server.client.get("/"))).await;

    let admitted = responses.iter().filter(|response| response.status() == 200).count();
    let rejected = responses.iter().filter(|response| response.status() == 429).count();

    assert_eq!(admitted, 10);
    assert_eq!(rejected, 40);

    let mut remaining: Vec<u64> = responses
        .iter()
        .filter(|response| response.status() == 200)
        .map(|response| response.headers()["x-ratelimit-remaining"].to_str().unwrap().parse().unwrap())
        .collect();

    remaining.sort_unstable();

    assert_eq!(remaining, (0..10).collect::<Vec<u64>>());
}
