//! Dispatcher: routes unread (and reclaimed, and its own stuck pending)
//! entries to the least-busy worker in the correct target instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::balance;
use crate::entry::Entry;
use crate::error::Result;
use crate::facade::RedisFacade;
use crate::metrics::DISPATCH_OUTCOMES_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// A periodic task that never keeps an entry for itself; it hands every
/// entry it reads off to a worker.
pub struct Dispatcher {
    facade: Arc<RedisFacade>,
    stream: Arc<str>,
    group: Arc<str>,
    instance: Arc<str>,
    consumer_name: String,
    tick_interval: Duration,
    min_idle: Duration,
    state: Mutex<DispatcherState>,
}

impl Dispatcher {
    pub fn new(
        facade: Arc<RedisFacade>,
        stream: Arc<str>,
        group: Arc<str>,
        instance: Arc<str>,
        consumer_name: String,
        tick_interval: Duration,
        min_idle: Duration,
    ) -> Self {
        Dispatcher {
            facade,
            stream,
            group,
            instance,
            consumer_name,
            tick_interval,
            min_idle,
            state: Mutex::new(DispatcherState::Idle),
        }
    }

    pub async fn state(&self) -> DispatcherState {
        *self.state.lock().await
    }

    /// Run the tick loop until `shutdown` fires.
    pub fn listen(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            {
                let mut state = self.state.lock().await;
                *state = DispatcherState::Running;
            }

            let mut interval = tokio::time::interval(self.tick_interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            warn!(error = %e, dispatcher = %self.consumer_name, "dispatcher tick failed");
                        }
                    }
                }
            }

            let mut state = self.state.lock().await;
            *state = DispatcherState::Stopped;
        })
    }

    /// One iteration: try reclaimed, then unread, then this dispatcher's
    /// own pending list (a failsafe for entries it claimed for itself but
    /// never handed off), in that order.
    async fn tick(&self) -> Result<()> {
        let entry = match self
            .facade
            .next_reclaimed_entry(&self.stream, &self.group, &self.consumer_name, self.min_idle)
            .await?
        {
            Some(entry) => Some(entry),
            None => match self
                .facade
                .next_unread_entry(&self.stream, &self.group, &self.consumer_name, None)
                .await?
            {
                Some(entry) => Some(entry),
                None => {
                    self.facade
                        .next_pending_entry(&self.stream, &self.group, &self.consumer_name)
                        .await?
                }
            },
        };

        let Some(entry) = entry else {
            return Ok(());
        };

        self.route(entry).await
    }

    async fn route(&self, entry: Entry) -> Result<()> {
        if entry.destination_group() != &*self.group {
            // Invalid: addressed to a group this dispatcher does not serve
            // (including one that does not exist at all). Acked out of
            // this group's pending list and deleted from the stream
            // outright rather than requeued, so it never comes back on a
            // future unread read.
            self.facade
                .acknowledge_entry(&self.stream, &self.group, &entry)
                .await?;
            self.facade.delete_entry(&self.stream, &entry).await?;
            DISPATCH_OUTCOMES_TOTAL
                .with_label_values(&["dropped_wrong_group"])
                .inc();
            debug!(id = %entry.id(), group = %self.group, "dropping entry for another group");
            return Ok(());
        }

        let target_instance: Arc<str> = if entry.is_terminal() {
            match entry.instance_id() {
                Some(id) => id.into(),
                None => {
                    warn!(id = %entry.id(), "reply missing instance_id, cannot route");
                    self.facade
                        .acknowledge_entry(&self.stream, &self.group, &entry)
                        .await?;
                    DISPATCH_OUTCOMES_TOTAL
                        .with_label_values(&["missing_instance_id"])
                        .inc();
                    return Ok(());
                }
            }
        } else {
            self.instance.clone()
        };

        let availability_key =
            RedisFacade::availability_key(&self.stream, &self.group, &target_instance);
        let names = self.facade.available_consumer_names(&availability_key).await?;

        if names.is_empty() {
            self.facade
                .acknowledge_entry(&self.stream, &self.group, &entry)
                .await?;
            DISPATCH_OUTCOMES_TOTAL.with_label_values(&["no_workers"]).inc();
            debug!(id = %entry.id(), instance = %target_instance, "no workers available, dropping");
            return Ok(());
        }

        let snapshot = self.facade.consumer_info(&self.stream, &self.group).await?;
        let chosen = balance::select_worker(&names, &snapshot).unwrap_or(&names[0]);

        self.facade.claim_entry(&self.stream, &self.group, chosen, &entry).await?;
        DISPATCH_OUTCOMES_TOTAL.with_label_values(&["claimed"]).inc();
        Ok(())
    }
}
