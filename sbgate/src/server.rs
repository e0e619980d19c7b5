//! Server startup and graceful shutdown

use anyhow::Context;
use sbgate_broker::{connect, BackendKind, ConnectionString};
use sbgate_facade::FacadeState;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::router::{build_state, create_router};

/// Broker clients and facades, ready to serve
pub struct Gateway {
    backend: BackendKind,
    state: Arc<FacadeState>,
}

impl Gateway {
    /// Connect to the broker named by the configured connection string
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let Some(raw) = config.broker.connection_string.as_deref() else {
            anyhow::bail!(
                "No connection string configured (use --connection-string, \
                 SBGATE_CONNECTION_STRING or broker.connection_string)"
            );
        };
        let connection: ConnectionString =
            raw.parse().context("Invalid broker connection string")?;
        let clients = connect(&connection, &config.client_settings())
            .context("Failed to create broker clients")?;

        Ok(Self {
            backend: clients.backend,
            state: build_state(&clients, config),
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> &Arc<FacadeState> {
        &self.state
    }

    /// Serve until `shutdown` resolves, then close pooled clients
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(self.state.clone());
        info!(
            addr = %listener.local_addr()?,
            backend = self.backend.as_str(),
            "Listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.state.transfer.close().await;
        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_connection_string_is_fatal() {
        let err = Gateway::new(&Config::default()).err().unwrap();
        assert!(err.to_string().contains("No connection string"));
    }

    #[test]
    fn test_malformed_connection_string_is_fatal() {
        let mut config = Config::default();
        config.broker.connection_string = Some("Endpoint=ftp://nowhere".to_string());
        assert!(Gateway::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_memory_gateway() {
        let mut config = Config::default();
        config.broker.connection_string = Some("Endpoint=memory://local".to_string());
        let gateway = Gateway::new(&config).unwrap();
        assert_eq!(gateway.backend(), BackendKind::Memory);
        assert_eq!(gateway.state().transfer.sender_count(), 0);
    }
}
