//! End-to-end tests for rate limiting over HTTP.

mod memory;
mod redis;

use indoc::indoc;
use integration_tests::TestServer;
use serde_json::json;

fn header(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|value| value.to_str().unwrap_or("invalid").to_string())
}

#[tokio::test]
async fn sixth_request_is_rejected() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        window = "60s"
        limit = 5
    "#};

    let server = TestServer::builder().build(config).await;

    let mut results = Vec::new();

    for i in 1..=6 {
        let response = server.client.get("/").await;

        results.push(json!({
            "limit": header(&response, "x-ratelimit-limit"),
            "remaining": header(&response, "x-ratelimit-remaining"),
            "request": i,
            "retry_after": header(&response, "retry-after"),
            "status": response.status().as_u16(),
        }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "limit": "5",
        "remaining": "4",
        "request": 1,
        "retry_after": null,
        "status": 200
      },
      {
        "limit": "5",
        "remaining": "3",
        "request": 2,
        "retry_after": null,
        "status": 200
      },
      {
        "limit": "5",
        "remaining": "2",
        "request": 3,
        "retry_after": null,
        "status": 200
      },
      {
        "limit": "5",
        "remaining": "1",
        "request": 4,
        "retry_after": null,
        "status": 200
      },
      {
        "limit": "5",
        "remaining": "0",
        "request": 5,
        "retry_after": null,
        "status": 200
      },
      {
        "limit": "5",
        "remaining": "0",
        "request": 6,
        "retry_after": "60",
        "status": 429
      }
    ]
    "#);
}

#[tokio::test]
async fn default_rejection_body() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 0
    "#};

    let server = TestServer::builder().build(config).await;

    let response = server.client.get("/").await;

    assert_eq!(response.status(), 429);
    assert_eq!(
        header(&response, "content-type").as_deref(),
        Some("text/plain; charset=utf-8")
    );

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @"Too many requests, please try again later.");
}

#[tokio::test]
async fn structured_message_and_custom_status() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 0
        status_code = 503

        [server.rate_limit.message]
        detail = "Slow down"
        error = "rate_limited"
    "#};

    let server = TestServer::builder().build(config).await;

    let response = server.client.get("/").await;

    assert_eq!(response.status(), 503);
    assert_eq!(header(&response, "content-type").as_deref(), Some("application/json"));

    let body: serde_json::Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "detail": "Slow down",
      "error": "rate_limited"
    }
    "#);
}

#[tokio::test]
async fn headers_can_be_disabled() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 1
        headers = false
    "#};

    let server = TestServer::builder().build(config).await;

    let admitted = server.client.get("/").await;
    let rejected = server.client.get("/").await;

    assert_eq!(admitted.status(), 200);
    assert_eq!(rejected.status(), 429);

    for response in [admitted, rejected] {
        assert!(header(&response, "x-ratelimit-limit").is_none());
        assert!(header(&response, "x-ratelimit-remaining").is_none());
        assert!(header(&response, "x-ratelimit-reset").is_none());
        assert!(header(&response, "retry-after").is_none());
    }
}

#[tokio::test]
async fn reset_header_is_epoch_seconds() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        window = "60s"
    "#};

    let server = TestServer::builder().build(config).await;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let response = server.client.get("/").await;
    let reset: u64 = header(&response, "x-ratelimit-reset").unwrap().parse().unwrap();

    assert!((now + 59..=now + 62).contains(&reset), "reset {reset} is not about a minute after {now}");
}

#[tokio::test]
async fn skip_paths_are_not_counted() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 1
        skip_paths = ["/metrics"]
    "#};

    let server = TestServer::builder().build(config).await;

    for _ in 0..5 {
        let response = server.client.get("/metrics").await;

        assert_eq!(response.status(), 200);
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }

    let response = server.client.get("/").await;

    assert_eq!(response.status(), 200);
    assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("0"));
}

#[tokio::test]
async fn health_endpoint_is_not_limited() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 0
    "#};

    let server = TestServer::builder().build(config).await;

    for _ in 0..3 {
        let response = server.client.get("/health").await;

        assert_eq!(response.status(), 200);
        assert!(header(&response, "x-ratelimit-limit").is_none());

        assert_eq!(response.text().await.unwrap(), r#"{"status":"healthy"}"#);
    }

    assert_eq!(server.client.get("/").await.status(), 429);
}

#[tokio::test]
async fn disabled_rate_limit_passes_everything() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = false
        limit = 0
    "#};

    let server = TestServer::builder().build(config).await;

    for _ in 0..10 {
        let response = server.client.get("/").await;

        assert_eq!(response.status(), 200);
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn header_key_separates_clients() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 1

        [server.rate_limit.key]
        source = "header"
        name = "x-api-key"
    "#};

    let server = TestServer::builder().build(config).await;

    let first = server.client.get_with_headers("/", &[("x-api-key", "alpha")]).await;
    let second = server.client.get_with_headers("/", &[("x-api-key", "alpha")]).await;
    let other = server.client.get_with_headers("/", &[("x-api-key", "beta")]).await;

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 429);
    assert_eq!(other.status(), 200);

    // Without the header no key can be derived.
    let missing = server.client.get("/").await;

    assert_eq!(missing.status(), 500);
    insta::assert_snapshot!(missing.text().await.unwrap(), @"Internal server error");
}

#[tokio::test]
async fn forwarded_addresses_are_trusted_when_configured() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 1

        [server.rate_limit.key]
        source = "client_ip"
        trust_forwarded_headers = true
    "#};

    let server = TestServer::builder().build(config).await;

    let first = server
        .client
        .get_with_headers("/", &[("x-forwarded-for", "203.0.113.7, 10.0.0.1")])
        .await;

    let other = server
        .client
        .get_with_headers("/", &[("x-forwarded-for", "203.0.113.8")])
        .await;

    let repeat = server
        .client
        .get_with_headers("/", &[("x-real-ip", "203.0.113.7")])
        .await;

    assert_eq!(first.status(), 200);
    assert_eq!(other.status(), 200);
    assert_eq!(repeat.status(), 429);
}

#[tokio::test]
async fn forwarded_addresses_are_ignored_by_default() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = true
        limit = 1
    "#};

    let server = TestServer::builder().build(config).await;

    let first = server.client.get_with_headers("/", &[("x-forwarded-for", "203.0.113.7")]).await;
    let second = server.client.get_with_headers("/", &[("x-forwarded-for", "203.0.113.8")]).await;

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 429);
}
