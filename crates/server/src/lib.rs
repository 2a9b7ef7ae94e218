//! HTTP integration for fixed-window rate limiting.
//!
//! Wraps a host [`axum::Router`] with [`RateLimitLayer`], or serves it with
//! the configured limits through [`serve`].

#![deny(missing_docs)]

mod health;
mod rate_limit;
mod rejection;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::anyhow;
use axum::Router;
use config::Config;
use tokio::net::TcpListener;

pub use rate_limit::{RateLimitLayer, RateLimitService};
pub use rejection::{DefaultRejectionHandler, Next, Rejection, RejectionHandler, RejectionOptions};

/// Address used when the configuration does not name one.
pub const DEFAULT_LISTEN_ADDRESS: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);

/// Configuration for serving a router.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized TOML configuration.
    pub config: Config,
    /// The host application. Every route in it is rate limited.
    pub app: Router,
}

impl ServeConfig {
    /// Serve `app` on the address from `config`, or [`DEFAULT_LISTEN_ADDRESS`].
    pub fn new(config: Config, app: Router) -> Self {
        Self {
            listen_address: config.server.listen_address.unwrap_or(DEFAULT_LISTEN_ADDRESS),
            config,
            app,
        }
    }
}

/// Starts and runs the server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config, app }: ServeConfig) -> anyhow::Result<()> {
    let mut app = app;

    if config.server.rate_limit.enabled {
        log::debug!("Applying rate limiting middleware");
        app = app.layer(RateLimitLayer::from_config(&config.server.rate_limit).await?);
    } else {
        log::debug!("Rate limiting disabled");
    }

    // Add health endpoint (unprotected - added AFTER rate limiting)
    if config.server.health.enabled {
        app = app.merge(health::router(&config.server.health));
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!("Listening on http://{listen_address}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    Ok(())
}
