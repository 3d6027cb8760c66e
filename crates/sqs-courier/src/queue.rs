//! Queue and message lifecycle as named service actions.
//!
//! [`QueueClient`] maps each queue operation onto one
//! [`SignedHttpClient::action`] call and the response fields it needs.
//! [`Queue`] pairs a client with a queue URL and carries the convenience
//! surface used by listeners and applications.

use crate::batch::{BatchFailure, BatchResult, BatchSuccess, MessageBatch, MAX_BATCH_SIZE};
use crate::config::{ClientConfig, MAX_WAIT_SECONDS};
use crate::error::{QueueError, ValidationError};
use crate::http::{Response, SignedHttpClient};
use crate::message::{md5_hex, Message, SentMessage};
use crate::xml::{attribute_pairs, XmlPath};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Attribute returned by `GetQueueAttributes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
}

impl AttributeValue {
    /// All-digit strings become integers, anything else stays text.
    pub fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(number) = raw.parse() {
                return Self::Integer(number);
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One attribute when exactly one was asked for, otherwise a map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAttributes {
    Single(AttributeValue),
    Map(HashMap<String, AttributeValue>),
}

impl QueueAttributes {
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        match self {
            Self::Single(value) => Some(value),
            Self::Map(map) => map.get(name),
        }
    }
}

// ============================================================================
// Queue Client
// ============================================================================

/// Queue operations over a shared [`SignedHttpClient`]
#[derive(Clone)]
pub struct QueueClient {
    http: Arc<SignedHttpClient>,
}

impl QueueClient {
    /// Build a client with its own signed HTTP client.
    pub fn new(config: &ClientConfig) -> Result<Self, QueueError> {
        Ok(Self::from_http(Arc::new(SignedHttpClient::new(config)?)))
    }

    /// Compose over an existing signed HTTP client.
    pub fn from_http(http: Arc<SignedHttpClient>) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &SignedHttpClient {
        &self.http
    }

    /// Handle for a queue URL; no remote call is made.
    pub fn queue(&self, url: Url) -> Queue {
        Queue {
            client: self.clone(),
            url,
        }
    }

    /// Handle for a queue URL given as text.
    pub fn queue_from_url(&self, url: &str) -> Result<Queue, QueueError> {
        let url = Url::parse(url).map_err(|e| ValidationError::InvalidFormat {
            field: "queue_url".to_string(),
            message: e.to_string(),
        })?;
        Ok(self.queue(url))
    }

    pub async fn create_queue(
        &self,
        name: &str,
        visibility_timeout: Option<u32>,
    ) -> Result<Queue, QueueError> {
        require_name(name)?;

        let mut params = BTreeMap::new();
        params.insert("QueueName".to_string(), name.to_string());
        if let Some(seconds) = visibility_timeout {
            params.insert("Attribute.1.Name".to_string(), "VisibilityTimeout".to_string());
            params.insert("Attribute.1.Value".to_string(), seconds.to_string());
        }

        let response = self.http.action("CreateQueue", "/", params).await?;
        let queue = self.queue_in(&response)?;
        info!(queue = %queue.name(), "Created queue");
        Ok(queue)
    }

    /// Look a queue up by name; `None` when the service says it does not exist.
    pub async fn get_queue(&self, name: &str) -> Result<Option<Queue>, QueueError> {
        require_name(name)?;

        let mut params = BTreeMap::new();
        params.insert("QueueName".to_string(), name.to_string());

        match self.http.action("GetQueueUrl", "/", params).await {
            Ok(response) => Ok(Some(self.queue_in(&response)?)),
            Err(QueueError::Action(e)) if e.is_queue_missing() => {
                debug!(queue = name, code = %e.code, "Queue does not exist");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_or_create_queue(
        &self,
        name: &str,
        visibility_timeout: Option<u32>,
    ) -> Result<Queue, QueueError> {
        match self.get_queue(name).await? {
            Some(queue) => Ok(queue),
            None => self.create_queue(name, visibility_timeout).await,
        }
    }

    pub async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<Queue>, QueueError> {
        let mut params = BTreeMap::new();
        if let Some(prefix) = prefix {
            params.insert("QueueNamePrefix".to_string(), prefix.to_string());
        }

        let response = self.http.action("ListQueues", "/", params).await?;
        response
            .document()?
            .find_texts(XmlPath::ListedQueueUrl)
            .iter()
            .map(|url| self.queue_from_url(url.trim()))
            .collect()
    }

    pub async fn delete_queue(&self, queue_url: &Url) -> Result<(), QueueError> {
        self.http
            .action("DeleteQueue", queue_url.path(), BTreeMap::new())
            .await?;
        info!(queue = %queue_name(queue_url), "Deleted queue");
        Ok(())
    }

    pub async fn purge_queue(&self, queue_url: &Url) -> Result<(), QueueError> {
        self.http
            .action("PurgeQueue", queue_url.path(), BTreeMap::new())
            .await?;
        Ok(())
    }

    /// Fetch attributes; an empty `names` asks for all of them.
    pub async fn queue_attributes(
        &self,
        queue_url: &Url,
        names: &[&str],
    ) -> Result<QueueAttributes, QueueError> {
        let mut params = BTreeMap::new();
        if names.is_empty() {
            params.insert("AttributeName.1".to_string(), "All".to_string());
        }
        for (i, name) in names.iter().enumerate() {
            params.insert(format!("AttributeName.{}", i + 1), name.to_string());
        }

        let response = self
            .http
            .action("GetQueueAttributes", queue_url.path(), params)
            .await?;
        let pairs = response.document()?.attribute_pairs();

        if let [single] = names {
            if *single != "All" {
                return pairs
                    .into_iter()
                    .find(|(name, _)| name == single)
                    .map(|(_, value)| QueueAttributes::Single(AttributeValue::parse(&value)))
                    .ok_or(QueueError::MissingField {
                        field: XmlPath::AttributeValue.field_name(),
                    });
            }
        }

        Ok(QueueAttributes::Map(
            pairs
                .into_iter()
                .map(|(name, value)| {
                    let value = AttributeValue::parse(&value);
                    (name, value)
                })
                .collect(),
        ))
    }

    pub async fn set_queue_attribute(
        &self,
        queue_url: &Url,
        name: &str,
        value: &str,
    ) -> Result<(), QueueError> {
        let mut params = BTreeMap::new();
        params.insert("Attribute.Name".to_string(), name.to_string());
        params.insert("Attribute.Value".to_string(), value.to_string());

        self.http
            .action("SetQueueAttributes", queue_url.path(), params)
            .await?;
        Ok(())
    }

    /// Send one message and verify the body digest the service reports.
    ///
    /// A digest mismatch repeats the whole send once; a second mismatch is
    /// returned as [`QueueError::Integrity`].
    pub async fn send_message(
        &self,
        queue_url: &Url,
        body: &str,
        delay_seconds: Option<u32>,
    ) -> Result<SentMessage, QueueError> {
        let expected = md5_hex(body);

        let mut params = BTreeMap::new();
        params.insert("MessageBody".to_string(), body.to_string());
        if let Some(delay) = delay_seconds {
            params.insert("DelaySeconds".to_string(), delay.to_string());
        }

        let mut attempt = 1;
        loop {
            let response = self
                .http
                .action("SendMessage", queue_url.path(), params.clone())
                .await?;
            let document = response.document()?;
            let got = document
                .find_text(XmlPath::Md5OfMessageBody)
                .unwrap_or_default();

            if got.trim().eq_ignore_ascii_case(&expected) {
                return Ok(SentMessage {
                    message_id: document.required_text(XmlPath::MessageId)?,
                    md5_of_body: expected,
                });
            }

            if attempt >= 2 {
                return Err(QueueError::Integrity {
                    body: body.to_string(),
                    expected,
                    got,
                });
            }

            warn!(
                queue = %queue_name(queue_url),
                expected = %expected,
                got = %got,
                "Message digest mismatch, sending again"
            );
            attempt += 1;
        }
    }

    /// Send 1..=10 bodies in one `SendMessageBatch` call.
    ///
    /// Entry ids are `msg-<offset + index>` so results from several calls can
    /// be told apart.
    pub async fn send_message_batch(
        &self,
        queue_url: &Url,
        bodies: &[String],
        id_offset: usize,
    ) -> Result<BatchResult, QueueError> {
        if bodies.is_empty() || bodies.len() > MAX_BATCH_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "bodies".to_string(),
                message: format!(
                    "batch must hold 1 to {} messages, got {}",
                    MAX_BATCH_SIZE,
                    bodies.len()
                ),
            }
            .into());
        }

        let mut params = BTreeMap::new();
        for (i, body) in bodies.iter().enumerate() {
            let n = i + 1;
            params.insert(
                format!("SendMessageBatchRequestEntry.{}.Id", n),
                format!("msg-{}", id_offset + i),
            );
            params.insert(
                format!("SendMessageBatchRequestEntry.{}.MessageBody", n),
                body.clone(),
            );
        }

        let response = self
            .http
            .action("SendMessageBatch", queue_url.path(), params)
            .await?;
        let document = response.document()?;

        let successful = document
            .find_all(XmlPath::BatchResultEntry)
            .into_iter()
            .map(|entry| {
                Ok(BatchSuccess {
                    id: entry.required_child_text(XmlPath::EntryId)?,
                    sent: SentMessage {
                        message_id: entry.required_child_text(XmlPath::MessageId)?,
                        md5_of_body: entry
                            .child_text(XmlPath::Md5OfMessageBody)
                            .unwrap_or_default(),
                    },
                })
            })
            .collect::<Result<Vec<_>, QueueError>>()?;

        let failed = document
            .find_all(XmlPath::BatchErrorEntry)
            .into_iter()
            .map(|entry| {
                Ok(BatchFailure {
                    id: entry.required_child_text(XmlPath::EntryId)?,
                    code: entry.child_text(XmlPath::EntryCode).unwrap_or_default(),
                    message: entry.child_text(XmlPath::EntryMessage).unwrap_or_default(),
                    sender_fault: entry
                        .child_text(XmlPath::EntrySenderFault)
                        .is_some_and(|v| v.trim() == "true"),
                })
            })
            .collect::<Result<Vec<_>, QueueError>>()?;

        if !failed.is_empty() {
            warn!(
                queue = %queue_name(queue_url),
                failed = failed.len(),
                "Some batch entries were rejected"
            );
        }

        Ok(BatchResult { successful, failed })
    }

    /// Long-poll for at most one message.
    pub async fn receive_message(
        &self,
        queue_url: &Url,
        wait_seconds: u32,
        visibility_timeout: Option<u32>,
    ) -> Result<Option<Message>, QueueError> {
        if wait_seconds > MAX_WAIT_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "wait_seconds".to_string(),
                message: format!("must be at most {}, got {}", MAX_WAIT_SECONDS, wait_seconds),
            }
            .into());
        }

        let mut params = BTreeMap::new();
        params.insert("MaxNumberOfMessages".to_string(), "1".to_string());
        params.insert("WaitTimeSeconds".to_string(), wait_seconds.to_string());
        params.insert("AttributeName.1".to_string(), "All".to_string());
        if let Some(seconds) = visibility_timeout {
            params.insert("VisibilityTimeout".to_string(), seconds.to_string());
        }

        let response = match self
            .http
            .action("ReceiveMessage", queue_url.path(), params)
            .await
        {
            Ok(response) => response,
            Err(QueueError::Action(e)) if e.status == 404 || e.is_queue_missing() => {
                return Err(QueueError::QueueNotFound {
                    queue: queue_url.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let document = response.document()?;
        let Some(element) = document.find_all(XmlPath::Message).into_iter().next() else {
            return Ok(None);
        };

        let message = Message::new(
            self.queue(queue_url.clone()),
            element.required_child_text(XmlPath::MessageId)?,
            element.required_child_text(XmlPath::ReceiptHandle)?,
            element.child_text(XmlPath::Body).unwrap_or_default(),
            attribute_pairs(element).into_iter().collect(),
        );
        debug!(queue = %queue_name(queue_url), message_id = %message.id(), "Received message");
        Ok(Some(message))
    }

    pub async fn delete_message(
        &self,
        queue_url: &Url,
        receipt_handle: &str,
    ) -> Result<(), QueueError> {
        let mut params = BTreeMap::new();
        params.insert("ReceiptHandle".to_string(), receipt_handle.to_string());

        self.http
            .action("DeleteMessage", queue_url.path(), params)
            .await?;
        Ok(())
    }

    /// Change how long a received message stays hidden; 0 makes it visible now.
    pub async fn change_message_visibility(
        &self,
        queue_url: &Url,
        receipt_handle: &str,
        visibility_seconds: u32,
    ) -> Result<(), QueueError> {
        let mut params = BTreeMap::new();
        params.insert("ReceiptHandle".to_string(), receipt_handle.to_string());
        params.insert(
            "VisibilityTimeout".to_string(),
            visibility_seconds.to_string(),
        );

        self.http
            .action("ChangeMessageVisibility", queue_url.path(), params)
            .await?;
        Ok(())
    }

    fn queue_in(&self, response: &Response) -> Result<Queue, QueueError> {
        let url = response.document()?.required_text(XmlPath::QueueUrl)?;
        self.queue_from_url(url.trim())
    }
}

impl fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClient")
            .field("http", &self.http)
            .finish()
    }
}

fn require_name(name: &str) -> Result<(), QueueError> {
    if name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "queue_name".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Last non-empty path segment of a queue URL
fn queue_name(url: &Url) -> &str {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("")
}

// ============================================================================
// Queue
// ============================================================================

/// A queue URL bound to a client
///
/// Equality and hashing use the URL only.
#[derive(Clone)]
pub struct Queue {
    client: QueueClient,
    url: Url,
}

impl Queue {
    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn name(&self) -> &str {
        queue_name(&self.url)
    }

    pub async fn send(&self, body: &str) -> Result<SentMessage, QueueError> {
        self.client.send_message(&self.url, body, None).await
    }

    pub async fn send_with_delay(
        &self,
        body: &str,
        delay_seconds: u32,
    ) -> Result<SentMessage, QueueError> {
        self.client
            .send_message(&self.url, body, Some(delay_seconds))
            .await
    }

    /// Send `object` encoded as JSON.
    pub async fn post<T: Serialize + ?Sized>(&self, object: &T) -> Result<SentMessage, QueueError> {
        let body = serde_json::to_string(object)?;
        self.send(&body).await
    }

    /// Send every object as JSON, in batches of up to ten.
    ///
    /// A failure part way through returns [`QueueError::BatchInterrupted`]
    /// with the results already delivered and the encoded bodies left unsent.
    /// Objects after the failing one are not encoded.
    pub async fn post_messages<T, I>(&self, objects: I) -> Result<BatchResult, QueueError>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let mut batch = MessageBatch::new(self);
        let outcome = async {
            for object in objects {
                batch.push_object(&object).await?;
            }
            batch.finish().await
        }
        .await;

        outcome.map_err(|source| {
            let (delivered, unsent) = batch.into_parts();
            QueueError::BatchInterrupted {
                delivered,
                unsent,
                source: Box::new(source),
            }
        })
    }

    /// Wait up to `poll_time` seconds for one message.
    pub async fn retrieve(&self, poll_time: u32) -> Result<Option<Message>, QueueError> {
        self.client.receive_message(&self.url, poll_time, None).await
    }

    pub async fn retrieve_with_visibility(
        &self,
        poll_time: u32,
        visibility_timeout: u32,
    ) -> Result<Option<Message>, QueueError> {
        self.client
            .receive_message(&self.url, poll_time, Some(visibility_timeout))
            .await
    }

    /// Approximate number of visible messages
    pub async fn size(&self) -> Result<i64, QueueError> {
        let attributes = self
            .client
            .queue_attributes(&self.url, &["ApproximateNumberOfMessages"])
            .await?;
        attributes
            .get("ApproximateNumberOfMessages")
            .and_then(AttributeValue::as_integer)
            .ok_or(QueueError::MissingField {
                field: "ApproximateNumberOfMessages",
            })
    }

    pub async fn attributes(&self, names: &[&str]) -> Result<QueueAttributes, QueueError> {
        self.client.queue_attributes(&self.url, names).await
    }

    pub async fn set_visibility_timeout(&self, seconds: u32) -> Result<(), QueueError> {
        self.client
            .set_queue_attribute(&self.url, "VisibilityTimeout", &seconds.to_string())
            .await
    }

    pub async fn purge(&self) -> Result<(), QueueError> {
        self.client.purge_queue(&self.url).await
    }

    pub async fn delete(&self) -> Result<(), QueueError> {
        self.client.delete_queue(&self.url).await
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Queue {}

impl Hash for Queue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("url", &self.url.as_str())
            .finish()
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
