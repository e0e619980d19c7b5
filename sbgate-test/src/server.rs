//! Test server management

use portpicker::pick_unused_port;
use sbgate::{Config, Gateway};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::client::SbgateClient;
use crate::STARTUP_TIMEOUT_SECS;

/// Errors that can occur with test server
#[derive(Debug, Error)]
pub enum TestError {
    #[error("No available port found")]
    NoPortAvailable,

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("Failed to start server: {0}")]
    StartFailed(String),

    #[error("Server startup timed out")]
    StartupTimeout,
}

/// An sbgate instance running in-process against the in-memory broker
pub struct TestServer {
    port: u16,
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server on a random available port
    pub async fn start() -> Result<Self, TestError> {
        Self::start_with(Self::default_config()).await
    }

    /// Configuration used by [`TestServer::start`]: memory broker, short receive wait
    pub fn default_config() -> Config {
        let mut config = Config::default();
        config.broker.connection_string = Some("Endpoint=memory://test".to_string());
        config.broker.receive_wait_ms = 200;
        config.retry.max_retries = 0;
        config
    }

    /// Start a server with a custom configuration; host and port are overridden
    pub async fn start_with(mut config: Config) -> Result<Self, TestError> {
        let port = pick_unused_port().ok_or(TestError::NoPortAvailable)?;
        config.server.host = "127.0.0.1".to_string();
        config.server.port = port;

        info!(port = port, "Starting sbgate test server");

        let gateway = Gateway::new(&config).map_err(|e| TestError::StartFailed(e.to_string()))?;
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|_| TestError::PortInUse(port))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = gateway.serve(listener, shutdown).await {
                tracing::error!(error = %e, "Test server failed");
            }
        });

        let base_url = format!("http://127.0.0.1:{}", port);
        let server = Self {
            port,
            base_url,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        };

        // Wait for server to be ready
        let client = server.client();
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_secs(STARTUP_TIMEOUT_SECS) {
            if client.health().await.unwrap_or(false) {
                info!(port = port, "sbgate ready");
                return Ok(server);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Err(TestError::StartupTimeout)
    }

    /// Get the base URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a client for the running server
    pub fn client(&self) -> SbgateClient {
        SbgateClient::new(self.base_url.clone())
    }

    /// Stop the server and wait for pooled clients to close
    pub async fn stop(&mut self) {
        info!("Stopping sbgate test server");
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("sbgate test server stopped");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
