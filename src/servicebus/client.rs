//! ServiceBusBroker - QueueBroker over the Service Bus REST API

use super::connection::ConnectionSettings;
use super::properties::{
    batch_body, event_from_message, is_entity_entry, subscription_description, topic_description,
    BrokerProperties, ReceivedHeaders, ATOM_CONTENT_TYPE, BATCH_CONTENT_TYPE,
    BROKER_PROPERTIES_HEADER, EVENT_TIMESTAMP_PROPERTY, QUEUE_NAME_PROPERTY,
};
use super::sas::SasCredentials;
use crate::core::version::{build_time, servicebus_api_version, user_agent};
use crate::queue::{
    ensure_within_ceiling, Event, LockToken, OperatorConfig, QueueBroker, QueueError, QueueKind,
    QueueName, QueueResult, ReceivedMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use std::time::Duration;

/// Extra time allowed on top of the server-side receive wait
const RECEIVE_GRACE: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Peek-lock broker backed by an Azure Service Bus namespace
///
/// Lock duration and maximum delivery count are entity settings on Service
/// Bus, so they are fixed when a subscription is created by this client; the
/// per-call lease duration of `receive_one`/`renew_lease` is not sent.
#[derive(Debug, Clone)]
pub struct ServiceBusBroker {
    client: Client,
    endpoint: Url,
    credentials: SasCredentials,
    lock_duration: Duration,
    receive_timeout: Duration,
    max_delivery_count: u32,
}

impl ServiceBusBroker {
    pub fn new(
        settings: ConnectionSettings,
        lock_duration: Duration,
        receive_timeout: Duration,
        max_delivery_count: u32,
    ) -> QueueResult<Self> {
        let endpoint = Url::parse(&settings.endpoint).map_err(|e| QueueError::Configuration {
            message: format!("Invalid namespace endpoint '{}': {}", settings.endpoint, e),
        })?;

        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QueueError::Configuration {
                message: format!("HTTP client build failed: {}", e),
            })?;

        log::debug!(
            "Service Bus broker for {} (api-version {}, {} built {})",
            endpoint,
            servicebus_api_version(),
            user_agent(),
            build_time()
        );

        Ok(Self {
            client,
            endpoint,
            credentials: SasCredentials::new(settings.key_name, settings.key),
            lock_duration,
            receive_timeout,
            max_delivery_count,
        })
    }

    /// Build from the connection string and lease settings of `config`
    pub fn from_config(config: &OperatorConfig) -> QueueResult<Self> {
        let connection = config
            .connection
            .as_deref()
            .ok_or_else(|| QueueError::Configuration {
                message: format!(
                    "No broker connection string configured (set 'connection' or {})",
                    crate::queue::CONNECTION_ENV_VAR
                ),
            })?;

        Self::new(
            ConnectionSettings::parse(connection)?,
            config.lease_duration,
            config.receive_timeout,
            config.max_delivery_count,
        )
    }

    /// `{endpoint}/{topic}[/subscriptions/{subscription}]/{suffix…}`
    pub(crate) fn entity_url(&self, name: &QueueName, suffix: &[&str]) -> QueueResult<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| QueueError::Configuration {
                message: format!("Endpoint {} cannot carry a path", self.endpoint),
            })?;
            segments.pop_if_empty().push(name.topic_segment());
            if let Some(subscription) = name.subscription_segment() {
                segments.push("subscriptions").push(subscription);
            }
            segments.extend(suffix);
        }
        url.query_pairs_mut()
            .append_pair("api-version", servicebus_api_version());
        Ok(url)
    }

    fn lock_url(&self, token: &LockToken) -> QueueResult<Url> {
        self.entity_url(token.queue(), &["messages", token.message_id(), token.as_str()])
    }

    fn request(&self, method: Method, url: Url) -> QueueResult<RequestBuilder> {
        let signature = self.credentials.token(self.endpoint.as_str(), Utc::now())?;
        Ok(self
            .client
            .request(method, url)
            .header(AUTHORIZATION, signature))
    }

    async fn execute(&self, operation: &str, request: RequestBuilder) -> QueueResult<Response> {
        request.send().await.map_err(|e| QueueError::TransportFailure {
            message: format!("{} request failed: {}", operation, e),
        })
    }

    fn next_expiry(&self) -> DateTime<Utc> {
        let lock = chrono::Duration::from_std(self.lock_duration).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(lock)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    async fn lock_operation(
        &self,
        operation: &str,
        method: Method,
        token: &LockToken,
    ) -> QueueResult<Response> {
        let request = self.request(method, self.lock_url(token)?)?;
        let response = self.execute(operation, request).await?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(QueueError::LeaseLost {
                token: token.to_string(),
            }),
            status => Err(unexpected_status(operation, token.queue(), status)),
        }
    }
}

/// Map a status no operation expects
///
/// Throttling, timeouts and server errors are transient; bad credentials are
/// a configuration problem; anything else is a failed operation.
pub(crate) fn unexpected_status(
    operation: &str,
    queue: &QueueName,
    status: StatusCode,
) -> QueueError {
    let message = format!("{} on {} returned {}", operation, queue, status);

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        QueueError::TransportFailure { message }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        QueueError::Configuration {
            message: format!("{} (check the shared access key)", message),
        }
    } else {
        QueueError::OperationFailed { message }
    }
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl QueueBroker for ServiceBusBroker {
    async fn create_queue(&self, name: &QueueName) -> QueueResult<()> {
        let description = match name.kind() {
            QueueKind::Topic => topic_description(),
            QueueKind::Subscription => {
                subscription_description(self.lock_duration, self.max_delivery_count)
            }
        };

        let request = self
            .request(Method::PUT, self.entity_url(name, &[])?)?
            .header(CONTENT_TYPE, ATOM_CONTENT_TYPE)
            .body(description);
        let response = self.execute("Create queue", request).await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                log::debug!("Created queue {}", name);
                Ok(())
            }
            StatusCode::CONFLICT => Err(QueueError::QueueAlreadyExists {
                queue: name.clone(),
            }),
            // A subscription cannot be created under a missing topic
            StatusCode::NOT_FOUND => Err(QueueError::QueueNotFound {
                queue: name.topic_queue(),
            }),
            status => Err(unexpected_status("Create queue", name, status)),
        }
    }

    async fn queue_exists(&self, name: &QueueName) -> QueueResult<bool> {
        let request = self.request(Method::GET, self.entity_url(name, &[])?)?;
        let response = self.execute("Queue exists", request).await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await.map_err(|e| QueueError::TransportFailure {
                    message: format!("Queue exists response for {} unreadable: {}", name, e),
                })?;
                Ok(is_entity_entry(&body))
            }
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected_status("Queue exists", name, status)),
        }
    }

    async fn delete_queue(&self, name: &QueueName) -> QueueResult<()> {
        let request = self.request(Method::DELETE, self.entity_url(name, &[])?)?;
        let response = self.execute("Delete queue", request).await?;

        match response.status() {
            status if status.is_success() => {
                log::debug!("Deleted queue {}", name);
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(QueueError::QueueNotFound {
                queue: name.clone(),
            }),
            status => Err(unexpected_status("Delete queue", name, status)),
        }
    }

    async fn send_batch(&self, name: &QueueName, events: &[Event]) -> QueueResult<()> {
        ensure_within_ceiling(events)?;

        let request = self
            .request(Method::POST, self.entity_url(name, &["messages"])?)?
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .body(batch_body(events)?);
        let response = self.execute("Send batch", request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(QueueError::QueueNotFound {
                queue: name.clone(),
            }),
            status => Err(unexpected_status("Send batch", name, status)),
        }
    }

    async fn receive_one(
        &self,
        name: &QueueName,
        _lease_duration: Duration,
    ) -> QueueResult<Option<ReceivedMessage>> {
        if name.is_topic() {
            return Err(QueueError::OperationFailed {
                message: format!("Cannot receive from topic queue {}; use a subscription", name),
            });
        }

        let mut url = self.entity_url(name, &["messages", "head"])?;
        url.query_pairs_mut()
            .append_pair("timeout", &self.receive_timeout.as_secs().to_string());

        let request = self
            .request(Method::POST, url)?
            .timeout(self.receive_timeout + RECEIVE_GRACE);
        let response = self.execute("Receive", request).await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {}
            StatusCode::NO_CONTENT => return Ok(None),
            StatusCode::NOT_FOUND => {
                return Err(QueueError::QueueNotFound {
                    queue: name.clone(),
                })
            }
            status => return Err(unexpected_status("Receive", name, status)),
        }

        let properties = header_string(&response, BROKER_PROPERTIES_HEADER)
            .ok_or_else(|| QueueError::OperationFailed {
                message: format!("Message received from {} has no broker properties", name),
            })
            .and_then(|raw| BrokerProperties::from_header(&raw))?;
        let headers = ReceivedHeaders {
            content_type: header_string(&response, CONTENT_TYPE.as_str()),
            event_timestamp: header_string(&response, EVENT_TIMESTAMP_PROPERTY),
            queue_name: header_string(&response, QUEUE_NAME_PROPERTY),
        };
        let body = response.text().await.map_err(|e| QueueError::TransportFailure {
            message: format!("Message body from {} unreadable: {}", name, e),
        })?;

        let (message_id, lock) = match (&properties.message_id, &properties.lock_token) {
            (Some(message_id), Some(lock)) => (message_id.clone(), lock.clone()),
            _ => {
                return Err(QueueError::OperationFailed {
                    message: format!("Message received from {} is not locked", name),
                })
            }
        };

        Ok(Some(ReceivedMessage {
            event: event_from_message(name, &properties, &headers, body),
            lock_token: LockToken::new(name.clone(), message_id, lock),
            locked_until: properties.locked_until().unwrap_or_else(|| self.next_expiry()),
            delivery_count: properties.delivery_count.unwrap_or(1),
            sequence_number: properties.sequence_number.unwrap_or_default(),
        }))
    }

    async fn renew_lease(
        &self,
        token: &LockToken,
        _lease_duration: Duration,
    ) -> QueueResult<DateTime<Utc>> {
        let response = self.lock_operation("Renew lock", Method::POST, token).await?;

        let renewed = header_string(&response, BROKER_PROPERTIES_HEADER)
            .and_then(|raw| BrokerProperties::from_header(&raw).ok())
            .and_then(|properties| properties.locked_until());
        Ok(renewed.unwrap_or_else(|| self.next_expiry()))
    }

    async fn complete(&self, token: &LockToken) -> QueueResult<()> {
        self.lock_operation("Complete", Method::DELETE, token).await?;
        Ok(())
    }

    async fn release_lease(&self, token: &LockToken) -> QueueResult<()> {
        self.lock_operation("Unlock", Method::PUT, token).await?;
        Ok(())
    }
}
