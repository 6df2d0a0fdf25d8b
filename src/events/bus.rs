//! Ordered publish/subscribe registry.
//!
//! Handlers for one event run sequentially in registration order and the
//! result of the last one is returned. A failing or `false` handler never
//! stops the remaining ones.
//!
//! `publish_sync` runs the chain on a dedicated background thread with its
//! own tokio runtime, so blocking callers (e.g. AUTH validation on the
//! blocking pool) can drive async handlers without touching the main
//! runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::auth::AuthAttempt;
use crate::error::EventError;
use crate::graph::DraftMessage;
use crate::pipeline::types::SharedMessage;

/// What a handler answers. Only `skip_send` interprets the value.
pub type HandlerResult = anyhow::Result<bool>;

/// Arguments passed to every handler of an event.
#[derive(Debug, Clone)]
pub enum EventArgs {
    None,
    /// `before_auth` / `after_auth`.
    Auth(AuthAttempt),
    /// `sender`: the envelope sender.
    Sender(String),
    /// `before_send` / `recipients`: the outbound message, mutable in place.
    Message(SharedMessage),
    /// `skip_send` / `after_send`: the draft being delivered.
    Draft(DraftMessage),
}

impl EventArgs {
    /// Short human-readable form for logs.
    pub fn summary(&self) -> String {
        match self {
            EventArgs::None => "-".to_string(),
            EventArgs::Auth(attempt) => format!(
                "{} user={}",
                attempt.mechanism,
                attempt.username.as_deref().unwrap_or("?")
            ),
            EventArgs::Sender(sender) => sender.clone(),
            EventArgs::Message(message) => {
                let guard = message.lock().unwrap_or_else(PoisonError::into_inner);
                format!(
                    "subject={:?} to={} cc={} bcc={} attachments={}",
                    guard.subject.as_deref().unwrap_or(""),
                    guard.recipients.to.len(),
                    guard.recipients.cc.len(),
                    guard.recipients.bcc.len(),
                    guard.content.attachments.len()
                )
            }
            EventArgs::Draft(draft) => format!("draft={} mailbox={}", draft.id, draft.mailbox),
        }
    }
}

/// A subscriber. Sync closures and async closures both implement it via
/// [`handler`] and [`async_handler`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, args: &EventArgs) -> HandlerResult;
}

/// Adapter for synchronous closures.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventArgs) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, args: &EventArgs) -> HandlerResult {
        (self.0)(args)
    }
}

/// Adapter for closures returning a future. The closure gets its own clone
/// of the arguments.
pub struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for AsyncFnHandler<F>
where
    F: Fn(EventArgs) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, args: &EventArgs) -> HandlerResult {
        (self.0)(args.clone()).await
    }
}

/// Wrap a synchronous closure as a handler.
pub fn handler<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&EventArgs) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap an async closure as a handler.
pub fn async_handler<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(AsyncFnHandler(f))
}

type HandlerList = Vec<Arc<dyn EventHandler>>;

/// Background runtime used by `publish_sync`.
struct Worker {
    handle: Handle,
    thread_id: ThreadId,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn() -> Result<Self, EventError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("event-bus".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                // Runs until shutdown() or until the bus is dropped.
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                debug!("Event worker stopped");
            })
            .map_err(|e| EventError::WorkerUnavailable(e.to_string()))?;

        let handle = ready_rx
            .recv()
            .map_err(|e| EventError::WorkerUnavailable(e.to_string()))?
            .map_err(EventError::WorkerUnavailable)?;

        debug!("Event worker started");
        Ok(Self {
            handle,
            thread_id: thread.thread().id(),
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

#[derive(Default)]
struct Inner {
    handlers: Mutex<HashMap<String, HandlerList>>,
    worker: Mutex<Option<Worker>>,
}

/// Named event registry. Cheap to clone; clones share handlers and worker.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = lock(&self.inner.handlers);
        f.debug_struct("EventBus")
            .field("events", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the event's list.
    pub fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) {
        lock(&self.inner.handlers)
            .entry(event.to_string())
            .or_default()
            .push(handler);
        debug!(event, "Subscribed handler");
    }

    /// Remove the first registration of this exact handler. No-op if absent.
    pub fn unsubscribe(&self, event: &str, handler: &Arc<dyn EventHandler>) {
        let mut handlers = lock(&self.inner.handlers);
        if let Some(list) = handlers.get_mut(event)
            && let Some(pos) = list.iter().position(|h| same_handler(h, handler))
        {
            list.remove(pos);
            debug!(event, "Unsubscribed handler");
        }
    }

    /// Number of handlers currently registered for an event.
    pub fn handler_count(&self, event: &str) -> usize {
        lock(&self.inner.handlers).get(event).map_or(0, Vec::len)
    }

    fn snapshot(&self, event: &str) -> HandlerList {
        lock(&self.inner.handlers)
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Run every handler of `event` in order and return the last result.
    ///
    /// Returns `Ok(false)` when nobody is subscribed. The handler list is
    /// snapshotted first; changes made while handlers run apply to the next
    /// publish only.
    pub async fn publish(&self, event: &str, args: EventArgs) -> Result<bool, EventError> {
        let handlers = self.snapshot(event);
        if handlers.is_empty() {
            return Ok(false);
        }

        debug!(event, handlers = handlers.len(), args = %args.summary(), "Publishing event");

        let mut result = Ok(false);
        for handler in handlers {
            result = handler.handle(&args).await.map_err(|e| {
                warn!(event, error = %format!("{e:#}"), "Event handler failed");
                EventError::Handler {
                    event: event.to_string(),
                    reason: format!("{e:#}"),
                }
            });
        }
        result
    }

    /// Blocking variant of [`publish`](Self::publish) for callers outside the
    /// bus runtime.
    ///
    /// Starts the background worker on first use and blocks the calling
    /// thread until the handler chain completes.
    pub fn publish_sync(&self, event: &str, args: EventArgs) -> Result<bool, EventError> {
        let handle = {
            let mut worker = lock(&self.inner.worker);
            if let Some(w) = worker.as_ref()
                && w.thread_id == std::thread::current().id()
            {
                return Err(EventError::ReentrantSync {
                    event: event.to_string(),
                });
            }
            if !worker.as_ref().is_some_and(Worker::is_alive) {
                *worker = Some(Worker::spawn()?);
            }
            match worker.as_ref() {
                Some(w) => w.handle.clone(),
                None => {
                    return Err(EventError::WorkerUnavailable(
                        "worker missing after start".into(),
                    ));
                }
            }
        };

        let bus = self.clone();
        let name = event.to_string();
        let (tx, rx) = mpsc::channel();
        handle.spawn(async move {
            let result = bus.publish(&name, args).await;
            let _ = tx.send(result);
        });

        rx.recv().map_err(|_| {
            EventError::WorkerUnavailable("worker stopped before the publish completed".into())
        })?
    }

    /// Whether the `publish_sync` worker is running.
    pub fn worker_running(&self) -> bool {
        lock(&self.inner.worker)
            .as_ref()
            .is_some_and(Worker::is_alive)
    }

    /// Stop the background worker, waiting at most `timeout` for it to exit.
    ///
    /// Returns `true` when no worker is left running. Calling it again, or
    /// before the worker ever started, is a no-op.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let Some(mut worker) = lock(&self.inner.worker).take() else {
            return true;
        };
        if let Some(stop) = worker.stop.take() {
            let _ = stop.send(());
        }
        let Some(thread) = worker.thread.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(?timeout, "Event worker did not stop in time");
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = thread.join();
        true
    }
}

/// Identity comparison on the handler allocation (vtable pointers are not
/// compared).
fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
