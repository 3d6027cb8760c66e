//! # SQS Courier
//!
//! Client for SQS-style queue services: request signing, signed HTTP actions,
//! queue and message lifecycle, and concurrent long-poll listeners.
//!
//! This library provides:
//! - Signature V4 request signing
//! - Named service actions with bounded retries on server errors
//! - Digest-checked message sends and single-message receives
//! - Accumulate-then-flush batch sending
//! - Single and multi-queue listeners with cooperative shutdown
//!
//! ## Module Organization
//!
//! - [auth] - Canonical requests, signing keys and the `Authorization` header
//! - [http] - Signed, single-use requests and the action layer
//! - [xml] - Namespace-free response documents and field lookup
//! - [queue] - Queue client and queue handles
//! - [message] - Received and sent messages
//! - [batch] - Batch sending
//! - [poller] - Long-poll listeners
//! - [config] - Client and listener configuration
//! - [error] - Error types
//! - [retry] - Action retry policy
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqs_courier::{handler_fn, ClientConfig, Credentials, ListenerConfig, QueueClient, QueueListener};
//!
//! # async fn run() -> Result<(), sqs_courier::QueueError> {
//! let config = ClientConfig::new("us-east-1", Credentials::new("AKID", "SECRET"));
//! let client = QueueClient::new(&config)?;
//! let queue = client.get_or_create_queue("jobs", None).await?;
//!
//! queue.send("hello").await?;
//!
//! let mut listener = QueueListener::new(queue, ListenerConfig::default())?;
//! listener.listen(handler_fn(|message| async move {
//!     println!("{}", message.body());
//!     message.delete().await?;
//!     Ok::<(), sqs_courier::HandlerError>(())
//! }));
//! listener.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod http;
pub mod message;
pub mod poller;
pub mod queue;
pub mod retry;
pub mod xml;

pub use batch::{BatchFailure, BatchResult, BatchSuccess, MessageBatch, MAX_BATCH_SIZE};
pub use config::{ClientConfig, Credentials, ListenerConfig, ENV_PREFIX, MAX_WAIT_SECONDS};
pub use error::{ActionError, ConfigurationError, QueueError, TransportError, ValidationError};
pub use http::{HttpTransport, OutgoingRequest, ReqwestTransport, RequestBody, Response, SignedHttpClient};
pub use message::{Message, SentMessage};
pub use poller::{
    handler_fn, HandlerError, MessageHandler, MultiQueueListener, QueueListener, StopSignal,
};
pub use queue::{AttributeValue, Queue, QueueAttributes, QueueClient};
pub use retry::RetryPolicy;
