//! `StreamCoordinator`: lifecycle façade wiring the Redis façade, the
//! ledger, and the worker/dispatcher pools together, plus the
//! request/response API callers actually use.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use streamipc_config::Config;

use crate::dispatcher::Dispatcher;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::facade::RedisFacade;
use crate::ledger::{Ledger, MailboxValue};
use crate::metrics::REQUESTS_COMPLETED_TOTAL;
use crate::response::{Response, TIMEOUT_REASON};
use crate::worker::{ErrorHandler, RequestHandler, Worker};

fn generate_instance_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 6] = rng.r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

struct Connected {
    facade: Arc<RedisFacade>,
    ledger: Arc<Ledger>,
    dispatcher_shutdown_tx: broadcast::Sender<()>,
    worker_shutdown_tx: broadcast::Sender<()>,
    dispatcher_handles: Vec<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    entry_timeout: Duration,
}

/// The coordinator for one (stream, group) pair in one process. Multiple
/// coordinators in different processes can share a group name; each gets
/// its own randomly generated instance id.
pub struct StreamCoordinator {
    stream: Arc<str>,
    group: Arc<str>,
    instance: Arc<str>,
    on_request: Option<RequestHandler>,
    on_error: Option<ErrorHandler>,
    connected: Option<Connected>,
}

impl StreamCoordinator {
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        StreamCoordinator {
            stream: stream.into().into(),
            group: group.into().into(),
            instance: generate_instance_id().into(),
            on_request: None,
            on_error: None,
            connected: None,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    pub fn on_request(&mut self, handler: RequestHandler) -> &mut Self {
        self.on_request = Some(handler);
        self
    }

    pub fn on_error(&mut self, handler: ErrorHandler) -> &mut Self {
        self.on_error = Some(handler);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    /// Build the façade, the ledger, and the worker/dispatcher pools, then
    /// start them — workers first, so the dispatcher pool never starts
    /// with an empty availability list.
    pub async fn connect(&mut self, cfg: &Config) -> Result<()> {
        if self.connected.is_some() {
            return Err(Error::Configuration("already connected".into()));
        }
        let on_request = self
            .on_request
            .clone()
            .ok_or_else(|| Error::Configuration("on_request handler not set".into()))?;
        let on_error = self
            .on_error
            .clone()
            .ok_or_else(|| Error::Configuration("on_error handler not set".into()))?;

        let facade = Arc::new(RedisFacade::connect(
            &cfg.redis.url,
            cfg.redis.pool_size,
            cfg.redis.max_pool_size.max(cfg.pool_capacity()),
        )?);

        facade.create_group(&self.stream, &self.group).await?;

        let ledger = Arc::new(Ledger::new(Duration::from_millis(cfg.ledger.cleanup_interval_ms)));
        // Separate shutdown channels for dispatchers and workers: disconnect
        // must stop dispatchers (so nothing claims a new entry into a
        // worker) and fully join them *before* telling workers to stop,
        // per the documented shutdown order. One shared channel could not
        // express that ordering.
        let (dispatcher_shutdown_tx, _) = broadcast::channel(1);
        let (worker_shutdown_tx, _) = broadcast::channel(1);
        let mut worker_handles = Vec::new();
        let mut dispatcher_handles = Vec::new();

        for i in 0..cfg.consumer.pool_size {
            let consumer_name = format!("{}-worker-{i}", self.instance);
            let worker = Arc::new(Worker::new(
                facade.clone(),
                self.stream.clone(),
                self.group.clone(),
                &self.instance,
                consumer_name,
                ledger.clone(),
                Duration::from_millis(cfg.consumer.execution_interval_ms),
                on_request.clone(),
                on_error.clone(),
            ));
            worker_handles.push(worker.listen(worker_shutdown_tx.subscribe()));
        }

        // Give the just-spawned workers a chance to register themselves
        // in the availability list before the dispatcher pool starts
        // demanding candidates to route to.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let availability_key =
            RedisFacade::availability_key(&self.stream, &self.group, &self.instance);
        if facade.available_consumer_names(&availability_key).await?.is_empty()
            && cfg.consumer.pool_size > 0
        {
            // Workers register asynchronously; poll briefly rather than
            // failing a connect that is about to succeed.
            for _ in 0..20 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if !facade.available_consumer_names(&availability_key).await?.is_empty() {
                    break;
                }
            }
        }
        if facade.available_consumer_names(&availability_key).await?.is_empty() {
            return Err(Error::Configuration(
                "no workers available to start the dispatcher pool".into(),
            ));
        }

        for i in 0..cfg.dispatcher.pool_size {
            let consumer_name = format!("{}-dispatcher-{i}", self.instance);
            let dispatcher = Arc::new(Dispatcher::new(
                facade.clone(),
                self.stream.clone(),
                self.group.clone(),
                self.instance.clone(),
                consumer_name,
                Duration::from_millis(cfg.dispatcher.execution_interval_ms),
                Duration::from_millis(cfg.dispatcher.min_idle_ms),
            ));
            dispatcher_handles.push(dispatcher.listen(dispatcher_shutdown_tx.subscribe()));
        }

        info!(
            stream = %self.stream,
            group = %self.group,
            instance = %self.instance,
            workers = cfg.consumer.pool_size,
            dispatchers = cfg.dispatcher.pool_size,
            "stream coordinator connected"
        );

        self.connected = Some(Connected {
            facade,
            ledger,
            dispatcher_shutdown_tx,
            worker_shutdown_tx,
            dispatcher_handles,
            worker_handles,
            entry_timeout: Duration::from_millis(cfg.ledger.entry_timeout_ms),
        });
        Ok(())
    }

    /// Orderly shutdown: dispatchers first (and fully joined), so nothing
    /// can claim a fresh entry into a worker that is simultaneously
    /// exiting, then workers, then the ledger and the pool are dropped.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(connected) = self.connected.take() else {
            return Ok(());
        };

        let _ = connected.dispatcher_shutdown_tx.send(());
        for handle in connected.dispatcher_handles {
            let _ = handle.await;
        }

        let _ = connected.worker_shutdown_tx.send(());
        for handle in connected.worker_handles {
            let _ = handle.await;
        }

        drop(connected.ledger);
        drop(connected.facade);
        info!(stream = %self.stream, group = %self.group, "stream coordinator disconnected");
        Ok(())
    }

    /// Current stream length (`XLEN`). Exposed mainly so callers (and
    /// tests) can confirm no orphan entries are left behind.
    pub async fn stream_len(&self) -> Result<u64> {
        let connected = self
            .connected
            .as_ref()
            .ok_or_else(|| Error::Connection("coordinator is not connected".into()))?;
        connected.facade.stream_len(&self.stream).await
    }

    /// Total pending entry count across the group (`XPENDING` summary).
    pub async fn pending_count(&self) -> Result<u64> {
        let connected = self
            .connected
            .as_ref()
            .ok_or_else(|| Error::Connection("coordinator is not connected".into()))?;
        connected.facade.pending_count(&self.stream, &self.group).await
    }

    /// Send `content` to group `to` and await its reply, up to the
    /// configured entry timeout. Only the "must be connected" precondition
    /// raises `Err`; every protocol-level outcome is a `Response`.
    pub async fn send_to_group(&self, content: impl Into<String>, to: impl Into<String>) -> Result<Response> {
        let connected = self
            .connected
            .as_ref()
            .ok_or_else(|| Error::Connection("coordinator is not connected".into()))?;

        let request = Entry::new_request(content, &*self.group, to, Some(self.instance.to_string()));
        let mailbox = connected.ledger.store(&request, connected.entry_timeout);

        let published = connected.facade.add_to_stream(&self.stream, request).await?;

        let response = match tokio::time::timeout(connected.entry_timeout, mailbox).await {
            Ok(Ok(MailboxValue::Reply(reply))) => match reply.status() {
                crate::entry::Status::Fulfilled => {
                    REQUESTS_COMPLETED_TOTAL.with_label_values(&["fulfilled"]).inc();
                    Response::fulfilled(reply.content().to_string())
                }
                _ => {
                    REQUESTS_COMPLETED_TOTAL.with_label_values(&["rejected"]).inc();
                    Response::rejected(reply.content().to_string())
                }
            },
            Ok(Ok(MailboxValue::Error(reason))) => {
                REQUESTS_COMPLETED_TOTAL.with_label_values(&["rejected"]).inc();
                Response::rejected(reason)
            }
            Ok(Err(_recv_error)) => {
                REQUESTS_COMPLETED_TOTAL.with_label_values(&["rejected"]).inc();
                Response::rejected("ledger mailbox dropped before a reply arrived")
            }
            Err(_elapsed) => {
                REQUESTS_COMPLETED_TOTAL.with_label_values(&["timeout"]).inc();
                Response::rejected(TIMEOUT_REASON)
            }
        };

        connected.ledger.delete(published.id());
        Ok(response)
    }

    /// Publish the fulfilled reply to `request` without blocking.
    pub async fn fulfill_request(&self, request: &Entry, content: impl Into<String>) -> Result<()> {
        let connected = self
            .connected
            .as_ref()
            .ok_or_else(|| Error::Connection("coordinator is not connected".into()))?;
        connected.facade.add_to_stream(&self.stream, request.fulfilled(content)).await?;
        Ok(())
    }

    /// Publish the rejected reply to `request` without blocking.
    pub async fn reject_request(&self, request: &Entry, content: impl Into<String>) -> Result<()> {
        let connected = self
            .connected
            .as_ref()
            .ok_or_else(|| Error::Connection("coordinator is not connected".into()))?;
        connected.facade.add_to_stream(&self.stream, request.rejected(content)).await?;
        Ok(())
    }
}
