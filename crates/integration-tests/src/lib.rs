//! Helpers for end-to-end tests over real HTTP.

use std::{
    net::SocketAddr,
    str::FromStr,
    sync::Once,
    time::Duration,
};

use axum::{Router, routing::get};
use config::Config;
use logforth::{append::Stdout, filter::EnvFilter};
use server::ServeConfig;
use tokio::net::{TcpListener, TcpStream};

static INIT: Once = Once::new();

/// Route logs to stdout, filtered by `THROTTLE_TEST_LOG` (default `off`).
fn init_logger() {
    INIT.call_once(|| {
        let filter = std::env::var("THROTTLE_TEST_LOG").unwrap_or_else(|_| "off".to_string());
        let filter = EnvFilter::from_str(&filter).unwrap_or_else(|_| EnvFilter::from_str("off").unwrap());

        logforth::builder()
            .dispatch(|d| d.filter(filter).append(Stdout::default()))
            .apply();
    });
}

/// The application served when a test does not bring its own.
pub fn default_app() -> Router {
    Router::new()
        .route("/", get(|| async { "hello" }))
        .route("/metrics", get(|| async { "requests_total 1" }))
}

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(path).send().await.unwrap()
    }

    /// Send a GET request with extra headers
    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> reqwest::Response {
        let mut request = self.request(path);

        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        request.send().await.unwrap()
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path))
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start configuring a test server.
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder { app: default_app() }
    }
}

/// Builder for [`TestServer`].
pub struct TestServerBuilder {
    app: Router,
}

impl TestServerBuilder {
    /// Serve `app` instead of [`default_app`].
    pub fn app(mut self, app: Router) -> Self {
        self.app = app;
        self
    }

    /// Start the server with the given TOML configuration
    pub async fn build(self, config_toml: &str) -> TestServer {
        init_logger();

        let config: Config = toml::from_str(config_toml).unwrap();
        config.validate().unwrap();

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
            app: self.app,
        };

        let (tx, mut rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            let _ = tx.send(server::serve(serve_config).await);
        });

        // Wait until the port accepts connections. A plain TCP connect is not
        // an HTTP request, so it does not count against any limit.
        for _ in 0..50 {
            if let Ok(Err(e)) = rx.try_recv() {
                eprintln!("Server failed to start: {e}");
                std::process::exit(1);
            }

            if TcpStream::connect(address).await.is_ok() {
                break;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestServer {
            client: TestClient::new(format!("http://{address}")),
            address,
            _handle: handle,
        }
    }
}
