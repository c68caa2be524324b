//! Worker: consumes entries from its own pending list, classifies them,
//! and routes them to the local ledger or the user's request handler.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::entry::{Entry, Status};
use crate::error::Result;
use crate::facade::RedisFacade;
use crate::ledger::{Ledger, MailboxValue};
use crate::metrics::WORKER_ENTRIES_TOTAL;

/// Handle passed to a request handler alongside the entry, so it can
/// publish a reply without needing the full coordinator.
#[derive(Clone)]
pub struct Replier {
    facade: Arc<RedisFacade>,
    stream: Arc<str>,
}

impl Replier {
    pub(crate) fn new(facade: Arc<RedisFacade>, stream: Arc<str>) -> Self {
        Replier { facade, stream }
    }

    /// Publish the fulfilled reply to `request`.
    pub async fn fulfill(&self, request: &Entry, content: impl Into<String>) -> Result<()> {
        self.facade
            .add_to_stream(&self.stream, request.fulfilled(content))
            .await?;
        Ok(())
    }

    /// Publish the rejected reply to `request`.
    pub async fn reject(&self, request: &Entry, content: impl Into<String>) -> Result<()> {
        self.facade
            .add_to_stream(&self.stream, request.rejected(content))
            .await?;
        Ok(())
    }
}

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// User-supplied handler for inbound requests. Expected to call
/// `replier.fulfill` or `replier.reject` before returning; the worker
/// acks and deletes the original request regardless of what the handler
/// does.
pub type RequestHandler = Arc<dyn Fn(Entry, Replier) -> BoxFuture<'static> + Send + Sync>;

/// User-supplied handler invoked when classification or the request
/// handler itself fails.
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// A periodic task bound to one consumer name within one group instance.
pub struct Worker {
    facade: Arc<RedisFacade>,
    stream: Arc<str>,
    group: Arc<str>,
    consumer_name: String,
    availability_key: String,
    ledger: Arc<Ledger>,
    tick_interval: Duration,
    on_request: RequestHandler,
    on_error: ErrorHandler,
    state: Mutex<WorkerState>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        facade: Arc<RedisFacade>,
        stream: Arc<str>,
        group: Arc<str>,
        instance: &str,
        consumer_name: String,
        ledger: Arc<Ledger>,
        tick_interval: Duration,
        on_request: RequestHandler,
        on_error: ErrorHandler,
    ) -> Self {
        let availability_key = RedisFacade::availability_key(&stream, &group, instance);
        Worker {
            facade,
            stream,
            group,
            consumer_name,
            availability_key,
            ledger,
            tick_interval,
            on_request,
            on_error,
            state: Mutex::new(WorkerState::Idle),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.lock().await
    }

    /// Register in the availability list, then run the tick loop until
    /// `shutdown` fires. Returns the task handle; await it to join.
    pub fn listen(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            {
                let mut state = self.state.lock().await;
                *state = WorkerState::Running;
            }

            if let Err(e) = self
                .facade
                .make_consumer_available(&self.availability_key, &self.consumer_name)
                .await
            {
                error!(error = %e, consumer = %self.consumer_name, "failed to register availability");
            }

            let mut interval = tokio::time::interval(self.tick_interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            (self.on_error)(e.to_string());
                        }
                    }
                }
            }

            {
                let mut state = self.state.lock().await;
                *state = WorkerState::Stopping;
            }

            if let Err(e) = self
                .facade
                .make_consumer_unavailable(&self.availability_key, &self.consumer_name)
                .await
            {
                warn!(error = %e, consumer = %self.consumer_name, "failed to deregister availability");
            }

            let mut state = self.state.lock().await;
            *state = WorkerState::Stopped;
        })
    }

    /// One iteration: read this consumer's own pending list, classify,
    /// and route exactly one entry.
    async fn tick(&self) -> Result<()> {
        let Some(entry) = self
            .facade
            .next_pending_entry(&self.stream, &self.group, &self.consumer_name)
            .await?
        else {
            return Ok(());
        };

        if let Err(e) = self.handle(&entry).await {
            (self.on_error)(e.to_string());
        }

        self.facade.acknowledge_entry(&self.stream, &self.group, &entry).await?;
        self.facade.delete_entry(&self.stream, &entry).await?;
        Ok(())
    }

    async fn handle(&self, entry: &Entry) -> Result<()> {
        if entry.destination_group() != &*self.group || entry.is_invalid() {
            WORKER_ENTRIES_TOTAL.with_label_values(&["invalid"]).inc();
            debug!(id = %entry.id(), status = ?entry.status(), "dropping invalid entry");
            return Ok(());
        }

        if entry.is_terminal() {
            match self.ledger.take(entry.id()) {
                Some(sender) => {
                    WORKER_ENTRIES_TOTAL.with_label_values(&["response"]).inc();
                    let _ = sender.send(MailboxValue::Reply(entry.clone()));
                }
                None => {
                    WORKER_ENTRIES_TOTAL.with_label_values(&["stale"]).inc();
                    debug!(id = %entry.id(), "dropping stale/redundant reply");
                }
            }
            return Ok(());
        }

        debug_assert!(matches!(entry.status(), Status::Pending));
        WORKER_ENTRIES_TOTAL.with_label_values(&["request"]).inc();
        let replier = Replier::new(self.facade.clone(), self.stream.clone());

        // The handler runs on its own task so a panic inside it unwinds
        // only that task, not this worker's tick loop. No exception from
        // classification or handler invocation is allowed to cross the
        // worker boundary: it is always turned into an `on_error` call
        // plus a rejected reply, and the original request is still
        // acked+deleted by `tick` regardless of the outcome here.
        let handler = self.on_request.clone();
        let handler_entry = entry.clone();
        let handler_replier = replier.clone();
        let task = tokio::spawn(async move { (handler)(handler_entry, handler_replier).await });

        if let Err(join_err) = task.await {
            let message = match join_err.try_into_panic() {
                Ok(payload) => panic_message(payload),
                Err(_) => "request handler task was cancelled".to_string(),
            };
            (self.on_error)(message.clone());
            if let Err(e) = replier.reject(entry, message).await {
                warn!(error = %e, id = %entry.id(), "failed to publish rejection after handler panic");
            }
        }

        Ok(())
    }
}

/// Extract a human-readable message from a caught panic payload, the way
/// `std::panic::catch_unwind` callers conventionally do.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "request handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replier_is_cloneable_and_sendable() {
        fn assert_send<T: Send>() {}
        assert_send::<Replier>();
    }

    #[test]
    fn panic_message_unwraps_str_and_string_payloads() {
        let str_payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(str_payload), "boom");

        let string_payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(string_payload), "boom");

        let other_payload: Box<dyn Any + Send> = Box::new(42_i32);
        assert_eq!(panic_message(other_payload), "request handler panicked");
    }
}
