//! Service Bus connection string parsing

use crate::queue::{QueueError, QueueResult};
use std::str::FromStr;

/// Namespace endpoint and shared access credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// `https://` base URL of the namespace, without a trailing slash
    pub endpoint: String,
    pub key_name: String,
    pub key: String,
}

impl ConnectionSettings {
    /// Parse `Endpoint=sb://…;SharedAccessKeyName=…;SharedAccessKey=…`
    ///
    /// Keys are case-insensitive; `SharedSecretIssuer` and `SharedSecretValue`
    /// are accepted in place of the key name and key.
    pub fn parse(connection: &str) -> QueueResult<Self> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;

        for part in connection.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                invalid(format!("Malformed connection string element '{}'", part))
            })?;

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim()),
                "sharedaccesskeyname" | "sharedsecretissuer" => key_name = Some(value.trim()),
                "sharedaccesskey" | "sharedsecretvalue" => key = Some(value.trim()),
                other => log::debug!("Ignoring connection string element '{}'", other),
            }
        }

        let endpoint = endpoint.ok_or_else(|| invalid("Connection string has no Endpoint"))?;
        let key_name =
            key_name.ok_or_else(|| invalid("Connection string has no SharedAccessKeyName"))?;
        let key = key.ok_or_else(|| invalid("Connection string has no SharedAccessKey"))?;

        Ok(Self {
            endpoint: https_endpoint(endpoint)?,
            key_name: key_name.to_string(),
            key: key.to_string(),
        })
    }
}

impl FromStr for ConnectionSettings {
    type Err = QueueError;

    fn from_str(s: &str) -> QueueResult<Self> {
        Self::parse(s)
    }
}

// sb://ns.servicebus.windows.net/ -> https://ns.servicebus.windows.net
fn https_endpoint(endpoint: &str) -> QueueResult<String> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| invalid(format!("Invalid Endpoint '{}': {}", endpoint, e)))?;

    if !matches!(url.scheme(), "sb" | "https" | "http") {
        return Err(invalid(format!(
            "Unsupported Endpoint scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| invalid(format!("Endpoint '{}' has no host", endpoint)))?;

    let scheme = if url.scheme() == "http" { "http" } else { "https" };
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", scheme, host, port),
        None => format!("{}://{}", scheme, host),
    })
}

fn invalid(message: impl Into<String>) -> QueueError {
    QueueError::Configuration {
        message: message.into(),
    }
}
