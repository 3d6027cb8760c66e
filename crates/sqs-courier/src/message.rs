//! Received and sent message types.

use crate::error::QueueError;
use crate::queue::Queue;
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

/// Hex MD5 of a message body, as the service reports it in `MD5OfMessageBody`
pub fn md5_hex(body: &str) -> String {
    hex::encode(Md5::digest(body.as_bytes()))
}

/// Acknowledgement returned by a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub md5_of_body: String,
}

/// A message delivered by a receive call
///
/// The receipt handle is only valid until the visibility timeout elapses or
/// the message is deleted or returned; that is enforced by the service, not
/// locally.
#[derive(Clone)]
pub struct Message {
    queue: Queue,
    id: String,
    receipt_handle: String,
    body: String,
    attributes: HashMap<String, String>,
    object: OnceLock<serde_json::Value>,
}

impl Message {
    pub fn new(
        queue: Queue,
        id: String,
        receipt_handle: String,
        body: String,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            queue,
            id,
            receipt_handle,
            body,
            attributes,
            object: OnceLock::new(),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// How many times the service has handed out this message
    pub fn receive_count(&self) -> Option<u32> {
        self.attribute("ApproximateReceiveCount")?.parse().ok()
    }

    /// The body decoded as JSON; decoded once and cached.
    pub fn object(&self) -> Result<&serde_json::Value, QueueError> {
        if let Some(value) = self.object.get() {
            return Ok(value);
        }
        let value: serde_json::Value = serde_json::from_str(&self.body)?;
        Ok(self.object.get_or_init(|| value))
    }

    /// Deserialize the cached JSON payload into `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_value(self.object()?.clone())?)
    }

    /// Delete this delivery from its queue
    pub async fn delete(&self) -> Result<(), QueueError> {
        self.queue
            .client()
            .delete_message(self.queue.url(), &self.receipt_handle)
            .await
    }

    /// Make the message visible again after `visibility_seconds` (0 = now)
    pub async fn return_to_queue(&self, visibility_seconds: u32) -> Result<(), QueueError> {
        self.queue
            .client()
            .change_message_visibility(self.queue.url(), &self.receipt_handle, visibility_seconds)
            .await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("queue", &self.queue.name())
            .field("id", &self.id)
            .field("body_length", &self.body.len())
            .field("attributes", &self.attributes)
            .finish()
    }
}
