//! Accumulate-then-flush batch sending.

use crate::error::QueueError;
use crate::message::SentMessage;
use crate::queue::Queue;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;

/// Largest number of entries one `SendMessageBatch` call accepts
pub const MAX_BATCH_SIZE: usize = 10;

/// Entry accepted by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSuccess {
    pub id: String,
    pub sent: SentMessage,
}

/// Entry rejected by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

/// Outcome of one or more batch calls, in send order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub successful: Vec<BatchSuccess>,
    pub failed: Vec<BatchFailure>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn extend(&mut self, other: BatchResult) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
    }
}

/// Batch of outgoing bodies for one queue
///
/// Every complete group of [`MAX_BATCH_SIZE`] bodies is sent as soon as it
/// fills, including the body that filled it. [`MessageBatch::finish`] sends
/// whatever partial group remains.
pub struct MessageBatch<'a> {
    queue: &'a Queue,
    pending: Vec<String>,
    sent: usize,
    flushes: usize,
    result: BatchResult,
}

impl<'a> MessageBatch<'a> {
    pub fn new(queue: &'a Queue) -> Self {
        Self {
            queue,
            pending: Vec::with_capacity(MAX_BATCH_SIZE),
            sent: 0,
            flushes: 0,
            result: BatchResult::default(),
        }
    }

    /// Bodies waiting for the next flush
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Batch calls made so far
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Results of the batch calls that have succeeded so far
    pub fn result(&self) -> &BatchResult {
        &self.result
    }

    /// Queue `body`, sending a group once [`MAX_BATCH_SIZE`] bodies are waiting.
    ///
    /// When that send fails the bodies stay queued and the next push or
    /// [`MessageBatch::finish`] sends them again.
    pub async fn push(&mut self, body: impl Into<String>) -> Result<(), QueueError> {
        self.pending.push(body.into());
        if self.pending.len() >= MAX_BATCH_SIZE {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn push_object<T: Serialize + ?Sized>(&mut self, object: &T) -> Result<(), QueueError> {
        let body = serde_json::to_string(object)?;
        self.push(body).await
    }

    /// Send everything still queued and return every result.
    ///
    /// On error the unsent bodies and earlier results are kept, so `finish`
    /// can be called again.
    pub async fn finish(&mut self) -> Result<BatchResult, QueueError> {
        while !self.pending.is_empty() {
            self.flush().await?;
        }
        Ok(std::mem::take(&mut self.result))
    }

    /// Results so far and the bodies not yet accepted by a batch call.
    pub(crate) fn into_parts(self) -> (BatchResult, Vec<String>) {
        (self.result, self.pending)
    }

    async fn flush(&mut self) -> Result<(), QueueError> {
        let count = self.pending.len().min(MAX_BATCH_SIZE);

        let result = self
            .queue
            .client()
            .send_message_batch(self.queue.url(), &self.pending[..count], self.sent)
            .await?;

        self.pending.drain(..count);
        self.sent += count;
        self.flushes += 1;
        self.result.extend(result);
        debug!(
            queue = %self.queue.name(),
            entries = count,
            flush = self.flushes,
            "Flushed message batch"
        );
        Ok(())
    }
}
