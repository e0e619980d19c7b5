//! Shared Access Signature tokens
//!
//! Token format:
//! `SharedAccessSignature sr=<uri>&sig=<signature>&se=<expiry>&skn=<key name>`
//! where the signature is base64 HMAC-SHA256 over `"<uri>\n<expiry>"` and
//! `<uri>` is the lowercased, URL-encoded resource URI.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use percent_encoding::utf8_percent_encode;
use sha2::Sha256;
use std::time::Duration;

use super::COMPONENT;
use crate::error::BrokerError;

type HmacSha256 = Hmac<Sha256>;

/// Longest a cached token is reused before its expiry
const MAX_REFRESH_MARGIN_SECS: i64 = 300;

/// Credential taken from a connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SasCredential {
    /// Key name and key, used to mint tokens
    Key { key_name: String, key: String },
    /// Pre-issued token, used verbatim
    Token(String),
}

/// Build a SAS token for `resource_uri` expiring at `expiry` (unix seconds)
pub fn generate_sas_token(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expiry: i64,
) -> Result<String, BrokerError> {
    let encoded_uri = utf8_percent_encode(&resource_uri.to_lowercase(), COMPONENT).to_string();
    let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| BrokerError::Unauthorized(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        encoded_uri,
        utf8_percent_encode(&signature, COMPONENT),
        expiry,
        utf8_percent_encode(key_name, COMPONENT),
    ))
}

struct CachedToken {
    token: String,
    expiry: i64,
}

/// Produces the `Authorization` header value for REST requests
pub(crate) struct SasSigner {
    credential: SasCredential,
    resource_uri: String,
    ttl_secs: i64,
    cached: Mutex<Option<CachedToken>>,
}

impl SasSigner {
    pub fn new(credential: SasCredential, resource_uri: impl Into<String>, ttl: Duration) -> Self {
        Self {
            credential,
            resource_uri: resource_uri.into(),
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1),
            cached: Mutex::new(None),
        }
    }

    /// Current token, minting a new one when the cached one is near expiry
    pub fn authorization(&self) -> Result<String, BrokerError> {
        let (key_name, key) = match &self.credential {
            SasCredential::Token(token) => return Ok(token.clone()),
            SasCredential::Key { key_name, key } => (key_name, key),
        };

        let now = Utc::now().timestamp();
        let margin = (self.ttl_secs / 4).min(MAX_REFRESH_MARGIN_SECS);

        let mut cached = self.cached.lock();
        if let Some(current) = cached.as_ref() {
            if now + margin < current.expiry {
                return Ok(current.token.clone());
            }
        }

        let expiry = now.saturating_add(self.ttl_secs);
        let token = generate_sas_token(&self.resource_uri, key_name, key, expiry)?;
        *cached = Some(CachedToken {
            token: token.clone(),
            expiry,
        });
        Ok(token)
    }
}
