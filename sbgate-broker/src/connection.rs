//! Connection string parsing and backend selection
//!
//! Format: `Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=...;SharedAccessKey=...`
//! Keys are case-insensitive. `Endpoint=memory://<name>` selects the
//! in-process broker.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::client::{AdminClient, MessagingClient};
use crate::error::BrokerError;
use crate::memory::MemoryBroker;
use crate::rest::{RestAdmin, RestMessaging, RestTransport, SasCredential};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("Connection string is empty")]
    Empty,

    #[error("Malformed connection string segment: {0}")]
    MalformedSegment(String),

    #[error("Connection string has no Endpoint")]
    MissingEndpoint,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Connection string needs SharedAccessKeyName and SharedAccessKey, or SharedAccessSignature")]
    MissingCredentials,

    #[error("Connection string is scoped to entity '{0}'; a namespace-level connection string is required")]
    EntityScoped(String),
}

/// Which client implementation a connection string selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Rest,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Rest => "rest",
        }
    }
}

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub endpoint: Url,
    pub shared_access_key_name: Option<String>,
    pub shared_access_key: Option<String>,
    pub shared_access_signature: Option<String>,
}

impl ConnectionString {
    pub fn backend(&self) -> BackendKind {
        if self.endpoint.scheme() == "memory" {
            BackendKind::Memory
        } else {
            BackendKind::Rest
        }
    }

    /// HTTPS base URL for the REST surface (`sb://` is rewritten to `https://`)
    pub fn rest_base_url(&self) -> Result<Url, ConnectionStringError> {
        let mut base = match self.endpoint.scheme() {
            "sb" => {
                let host = self
                    .endpoint
                    .host_str()
                    .ok_or_else(|| ConnectionStringError::InvalidEndpoint(self.endpoint.to_string()))?;
                let mut url = format!("https://{}", host);
                if let Some(port) = self.endpoint.port() {
                    url.push_str(&format!(":{}", port));
                }
                Url::parse(&url)
                    .map_err(|e| ConnectionStringError::InvalidEndpoint(e.to_string()))?
            }
            _ => self.endpoint.clone(),
        };
        base.set_path("/");
        base.set_query(None);
        Ok(base)
    }

    /// Credential used to sign REST requests
    pub fn credential(&self) -> Result<SasCredential, ConnectionStringError> {
        if let Some(signature) = &self.shared_access_signature {
            return Ok(SasCredential::Token(signature.clone()));
        }
        match (&self.shared_access_key_name, &self.shared_access_key) {
            (Some(key_name), Some(key)) => Ok(SasCredential::Key {
                key_name: key_name.clone(),
                key: key.clone(),
            }),
            _ => Err(ConnectionStringError::MissingCredentials),
        }
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConnectionStringError::Empty);
        }

        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;

        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            // Values (base64 keys, SAS tokens) may contain '='
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            let value = value.trim().to_string();

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(value),
                "sharedaccesssignature" => signature = Some(value),
                "entitypath" if !value.is_empty() => {
                    return Err(ConnectionStringError::EntityScoped(value))
                }
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or(ConnectionStringError::MissingEndpoint)?;
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| ConnectionStringError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

        match endpoint.scheme() {
            "memory" => {}
            "sb" | "https" | "http" => {
                if endpoint.host_str().map_or(true, str::is_empty) {
                    return Err(ConnectionStringError::InvalidEndpoint(endpoint.to_string()));
                }
                if signature.is_none() && (key_name.is_none() || key.is_none()) {
                    return Err(ConnectionStringError::MissingCredentials);
                }
            }
            other => return Err(ConnectionStringError::UnsupportedScheme(other.to_string())),
        }

        Ok(Self {
            endpoint,
            shared_access_key_name: key_name,
            shared_access_key: key,
            shared_access_signature: signature,
        })
    }
}

/// Settings for the REST backend's HTTP client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub sas_token_ttl: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            sas_token_ttl: Duration::from_secs(3600),
        }
    }
}

/// Long-lived clients shared by every request
#[derive(Clone)]
pub struct BrokerClients {
    pub backend: BackendKind,
    pub admin: Arc<dyn AdminClient>,
    pub messaging: Arc<dyn MessagingClient>,
}

/// Build the administrative and messaging clients for a connection string
pub fn connect(
    connection: &ConnectionString,
    settings: &ClientSettings,
) -> Result<BrokerClients, BrokerError> {
    match connection.backend() {
        BackendKind::Memory => {
            info!(endpoint = %connection.endpoint, "Using in-memory broker");
            let broker = MemoryBroker::new();
            Ok(BrokerClients {
                backend: BackendKind::Memory,
                admin: Arc::new(broker.clone()),
                messaging: Arc::new(broker),
            })
        }
        BackendKind::Rest => {
            let base = connection
                .rest_base_url()
                .map_err(|e| BrokerError::BadRequest(e.to_string()))?;
            let credential = connection
                .credential()
                .map_err(|e| BrokerError::Unauthorized(e.to_string()))?;
            info!(endpoint = %base, "Using Service Bus REST backend");

            let transport = Arc::new(RestTransport::new(base, credential, settings)?);
            Ok(BrokerClients {
                backend: BackendKind::Rest,
                admin: Arc::new(RestAdmin::new(transport.clone())),
                messaging: Arc::new(RestMessaging::new(transport)),
            })
        }
    }
}
