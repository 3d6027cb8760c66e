//! Long-poll listeners.
//!
//! A [`QueueListener`] owns one worker thread that repeatedly long-polls a
//! single queue and hands each message to a [`MessageHandler`]. A
//! [`MultiQueueListener`] fans the same contract out over several queues;
//! each child runs independently, so a failing queue never stalls the others.
//!
//! Stopping is cooperative. [`QueueListener::stop`] clears the listening flag
//! and waits for the worker, which exits after its in-flight receive (bounded
//! by `poll_time`) and the current handler call complete.
//!
//! Handler errors are logged and the worker moves on to the next message; the
//! failed message is not deleted and becomes visible again once its
//! visibility timeout expires. A handler that panics ends only its own
//! queue's worker.

use crate::config::ListenerConfig;
use crate::error::QueueError;
use crate::message::Message;
use crate::queue::Queue;
use async_trait::async_trait;
use std::error::Error;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;

/// Error type returned by message handlers
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Application-provided message processing.
///
/// The handler runs on the listener's worker task; the next receive does not
/// start until it returns. Deleting the message on success is the handler's
/// job (see [`Message::delete`]).
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use sqs_courier::{HandlerError, Message, MessageHandler};
///
/// struct Printer;
///
/// #[async_trait]
/// impl MessageHandler for Printer {
///     async fn handle(&self, message: Message) -> Result<(), HandlerError> {
///         println!("{}", message.body());
///         message.delete().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// [`MessageHandler`] wrapping an async closure
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `Fn(Message) -> Future` as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self.f)(message).await
    }
}

// ============================================================================
// Listener State
// ============================================================================

/// Flag shared between a listener and its worker
///
/// `generation` increments on every `listen` so a worker left over from an
/// earlier run cannot be revived by a later one.
#[derive(Debug, Default)]
struct ListenerState {
    listening: AtomicBool,
    generation: AtomicU64,
    wake: Notify,
}

impl ListenerState {
    fn start(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.listening.store(true, Ordering::Release);
        generation
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_listening() && self.generation.load(Ordering::Acquire) == generation
    }

    fn stop(&self) {
        self.listening.store(false, Ordering::Release);
        // Wakes only workers already waiting; no permit is left for a later run.
        self.wake.notify_waiters();
    }

    /// Called by a worker that ends on its own.
    fn finish(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) == generation {
            self.listening.store(false, Ordering::Release);
        }
    }
}

/// Handle that asks a listener to stop without waiting for it
///
/// Safe to call from inside a handler running on the listener's own worker.
#[derive(Debug, Clone)]
pub struct StopSignal {
    state: Arc<ListenerState>,
}

impl StopSignal {
    pub fn stop(&self) {
        self.state.stop();
    }

    pub fn is_stopped(&self) -> bool {
        !self.state.is_listening()
    }
}

// ============================================================================
// Single Queue Listener
// ============================================================================

/// Long-poll listener for one queue
///
/// States are `idle -> listening -> idle`.
pub struct QueueListener {
    queue: Queue,
    config: ListenerConfig,
    state: Arc<ListenerState>,
    worker: Option<JoinHandle<()>>,
}

impl QueueListener {
    /// # Errors
    ///
    /// Returns a configuration error if `poll_time` exceeds the service
    /// maximum.
    pub fn new(queue: Queue, config: ListenerConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self::with_valid_config(queue, config))
    }

    fn with_valid_config(queue: Queue, config: ListenerConfig) -> Self {
        Self {
            queue,
            config,
            state: Arc::new(ListenerState::default()),
            worker: None,
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn is_listening(&self) -> bool {
        self.state.is_listening()
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            state: Arc::clone(&self.state),
        }
    }

    /// Start the worker; does nothing while already listening.
    ///
    /// Must be called from within a tokio runtime. The worker runs on a
    /// dedicated blocking-pool thread and drives its futures through the
    /// caller's runtime, so a current-thread runtime only makes progress while
    /// its owner is inside `block_on`.
    pub fn listen<H>(&mut self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.listen_with(Arc::new(handler));
    }

    /// Like [`QueueListener::listen`] with a handler shared across listeners.
    pub fn listen_with(&mut self, handler: Arc<dyn MessageHandler>) {
        if self.is_listening() {
            return;
        }

        let generation = self.state.start();
        let worker = Worker {
            queue: self.queue.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            generation,
            handler,
        };
        // Each worker gets a thread of its own, so a handler that blocks
        // cannot starve other queues. A worker from an earlier run that ended
        // on its own is detached here.
        let runtime = Handle::current();
        self.worker = Some(tokio::task::spawn_blocking(move || {
            runtime.block_on(worker.run())
        }));
    }

    /// Clear the listening flag and wait for the worker to exit.
    pub async fn stop(&mut self) {
        self.state.stop();

        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Err(e) = worker.await {
            if e.is_panic() {
                error!(queue = %self.queue.name(), "Listener worker panicked");
            } else {
                warn!(queue = %self.queue.name(), error = %e, "Listener worker cancelled");
            }
        }
    }
}

impl std::fmt::Debug for QueueListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueListener")
            .field("queue", &self.queue.name())
            .field("config", &self.config)
            .field("listening", &self.is_listening())
            .finish()
    }
}

struct Worker {
    queue: Queue,
    config: ListenerConfig,
    state: Arc<ListenerState>,
    generation: u64,
    handler: Arc<dyn MessageHandler>,
}

impl Worker {
    async fn run(self) {
        let queue_name = self.queue.name().to_string();
        info!(queue = %queue_name, poll_time = self.config.poll_time, "Listener started");

        while self.state.is_current(self.generation) {
            let received = match self.config.visibility_timeout {
                Some(visibility) => {
                    self.queue
                        .retrieve_with_visibility(self.config.poll_time, visibility)
                        .await
                }
                None => self.queue.retrieve(self.config.poll_time).await,
            };

            match received {
                Ok(Some(message)) => {
                    let message_id = message.id().to_string();
                    debug!(queue = %queue_name, message_id = %message_id, "Dispatching message");
                    if let Err(e) = self.handler.handle(message).await {
                        warn!(
                            queue = %queue_name,
                            message_id = %message_id,
                            error = %e,
                            "Message handler failed; message left on queue"
                        );
                    }
                }
                Ok(None) => {}
                Err(QueueError::QueueNotFound { .. }) => {
                    error!(queue = %queue_name, "Queue no longer exists, listener stopping");
                    self.state.finish(self.generation);
                    break;
                }
                Err(e) => {
                    warn!(
                        queue = %queue_name,
                        error = %e,
                        backoff_ms = self.config.error_backoff_ms,
                        "Receive failed, backing off"
                    );
                    self.back_off().await;
                }
            }
        }

        info!(queue = %queue_name, "Listener stopped");
    }

    /// Sleep for the error back-off unless stopped first.
    async fn back_off(&self) {
        let woken = self.state.wake.notified();
        tokio::pin!(woken);
        // Register before the check so a concurrent stop cannot be missed.
        woken.as_mut().enable();

        if !self.state.is_current(self.generation) {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.config.error_backoff()) => {}
            _ = woken => {}
        }
    }
}

// ============================================================================
// Multi Queue Listener
// ============================================================================

/// One [`QueueListener`] per queue behind a single listen/stop contract
pub struct MultiQueueListener {
    queues: Vec<Queue>,
    config: ListenerConfig,
    listeners: Vec<QueueListener>,
}

impl MultiQueueListener {
    pub fn new(queues: Vec<Queue>, config: ListenerConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            queues,
            config,
            listeners: Vec::new(),
        })
    }

    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// True while any child listener is active.
    pub fn is_listening(&self) -> bool {
        self.listeners.iter().any(QueueListener::is_listening)
    }

    /// Start one listener per queue; does nothing if already composed.
    pub fn listen<H>(&mut self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.listen_with(Arc::new(handler));
    }

    pub fn listen_with(&mut self, handler: Arc<dyn MessageHandler>) {
        if !self.listeners.is_empty() {
            return;
        }

        for queue in &self.queues {
            let mut listener = QueueListener::with_valid_config(queue.clone(), self.config.clone());
            listener.listen_with(Arc::clone(&handler));
            self.listeners.push(listener);
        }
        info!(queues = self.listeners.len(), "Multi-queue listener started");
    }

    /// Stop every child and drop them so a later `listen` starts afresh.
    pub async fn stop(&mut self) {
        for listener in &self.listeners {
            listener.state.stop();
        }
        for listener in &mut self.listeners {
            listener.stop().await;
        }
        self.listeners.clear();
    }
}

impl std::fmt::Debug for MultiQueueListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiQueueListener")
            .field("queues", &self.queues)
            .field("listeners", &self.listeners.len())
            .field("listening", &self.is_listening())
            .finish()
    }
}
