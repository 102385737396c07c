//! Shared access signature tokens
//!
//! `SharedAccessSignature sr=<uri>&sig=<signature>&se=<expiry>&skn=<key name>`
//! where the signature is the base64 HMAC-SHA256, keyed with the shared
//! access key, of the URL-encoded resource URI and the expiry (unix seconds)
//! separated by a newline.

use crate::queue::{QueueError, QueueResult};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of each generated token
pub(crate) const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub(crate) struct SasCredentials {
    key_name: String,
    key: String,
}

impl fmt::Debug for SasCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SasCredentials")
            .field("key_name", &self.key_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SasCredentials {
    pub(crate) fn new(key_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            key: key.into(),
        }
    }

    /// Token for `resource_uri` valid for [`TOKEN_TTL`] from `now`
    pub(crate) fn token(&self, resource_uri: &str, now: DateTime<Utc>) -> QueueResult<String> {
        let expiry = now.timestamp() + TOKEN_TTL.as_secs() as i64;
        self.token_expiring_at(resource_uri, expiry)
    }

    pub(crate) fn token_expiring_at(&self, resource_uri: &str, expiry: i64) -> QueueResult<String> {
        let encoded_uri = url_encode(resource_uri);
        let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

        let mut mac =
            HmacSha256::new_from_slice(self.key.as_bytes()).map_err(|e| QueueError::Configuration {
                message: format!("Invalid shared access key: {}", e),
            })?;
        mac.update(string_to_sign.as_bytes());
        let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri,
            url_encode(&signature),
            expiry,
            url_encode(&self.key_name)
        ))
    }
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
