//! Azure Service Bus REST backend
//!
//! Management goes through Atom XML entries under the namespace root,
//! messaging through the `messages` and `messages/head` endpoints.
//! Every request carries a SAS token in the `Authorization` header.

mod admin;
mod atom;
mod messaging;
mod sas;

pub use admin::RestAdmin;
pub use messaging::RestMessaging;
pub use sas::{generate_sas_token, SasCredential};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::connection::ClientSettings;
use crate::error::BrokerError;
use sas::SasSigner;

pub const API_VERSION: &str = "2021-05";

/// Characters left alone by JavaScript's `encodeURIComponent`
pub(crate) const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const PATH: &AsciiSet = &COMPONENT.remove(b'/');

/// Percent-encode an entity path, keeping `/` separators
pub(crate) fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}

/// Shared HTTP client, base URL and signer
pub struct RestTransport {
    client: reqwest::Client,
    base: Url,
    signer: SasSigner,
}

impl RestTransport {
    pub fn new(
        base: Url,
        credential: SasCredential,
        settings: &ClientSettings,
    ) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        let signer = SasSigner::new(credential, base.as_str(), settings.sas_token_ttl);

        Ok(Self {
            client,
            base,
            signer,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Request against `<base><path>?api-version=...`; `path` must already be encoded
    pub(crate) fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<RequestBuilder, BrokerError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| BrokerError::BadRequest(format!("{}: {}", path, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api-version", API_VERSION);
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }

        debug!(method = %method, url = %url, "Service Bus request");
        Ok(self
            .client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, self.signer.authorization()?))
    }

    /// Send and turn non-success statuses into errors
    pub(crate) async fn execute(&self, request: RequestBuilder) -> Result<Response, BrokerError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }
}

/// Map a failed response onto a broker error
pub(crate) fn status_error(status: StatusCode, body: String) -> BrokerError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };

    match status.as_u16() {
        400 => BrokerError::BadRequest(message),
        401 | 403 => BrokerError::Unauthorized(message),
        404 => BrokerError::NotFound(message),
        409 => BrokerError::AlreadyExists(message),
        410 => BrokerError::LockLost(message),
        408 | 504 => BrokerError::Timeout(message),
        429 | 503 => BrokerError::ServerBusy(message),
        s if (500..600).contains(&s) => BrokerError::Transport(message),
        s => BrokerError::Unexpected { status: s, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn transport() -> RestTransport {
        RestTransport::new(
            Url::parse("https://ns.example.net/").unwrap(),
            SasCredential::Key {
                key_name: "k".into(),
                key: "v".into(),
            },
            &ClientSettings {
                request_timeout: Duration::from_secs(5),
                sas_token_ttl: Duration::from_secs(3600),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("events/Subscriptions/audit"), "events/Subscriptions/audit");
        assert_eq!(encode_path("my queue"), "my%20queue");
        assert_eq!(encode_path("a&b"), "a%26b");
    }

    #[test]
    fn test_request_url_and_auth() {
        let request = transport()
            .request(Method::GET, "orders", &[("timeout", "5".to_string())])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://ns.example.net/orders?api-version=2021-05&timeout=5"
        );
        let auth = request
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(auth.starts_with("SharedAccessSignature "));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            BrokerError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, "exists".into()),
            BrokerError::AlreadyExists(m) if m == "exists"
        ));
        assert!(matches!(
            status_error(StatusCode::GONE, String::new()),
            BrokerError::LockLost(_)
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!status_error(StatusCode::FORBIDDEN, String::new()).is_transient());
        assert!(matches!(
            status_error(StatusCode::IM_A_TEAPOT, String::new()),
            BrokerError::Unexpected { status: 418, .. }
        ));
    }
}
