//! Named-event convenience facade over `streamipc-core`.
//!
//! Layers typed event handlers on top of a [`StreamCoordinator`]: instead
//! of one `on_request` handler matching on content, register a handler per
//! named event and dispatch to it automatically.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use streamipc_core::{Entry, Error, Replier, Response, Result, StreamCoordinator};

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Handler for one named event: receives the event's payload (the part of
/// `content` after the `event_name\n` prefix) and a replier.
pub type EventHandler = Arc<dyn Fn(String, Entry, Replier) -> BoxFuture<'static> + Send + Sync>;

const SEPARATOR: char = '\n';

/// Encode an event name and payload into the wire content string.
fn encode(event_name: &str, payload: &str) -> String {
    format!("{event_name}{SEPARATOR}{payload}")
}

/// Split wire content back into `(event_name, payload)`. Content with no
/// separator is treated as an event with an empty payload.
fn decode(content: &str) -> (&str, &str) {
    match content.split_once(SEPARATOR) {
        Some((name, payload)) => (name, payload),
        None => (content, ""),
    }
}

/// Registry of named-event handlers wired to one [`StreamCoordinator`].
pub struct EventRouter {
    coordinator: StreamCoordinator,
    handlers: Arc<RwLock<HashMap<String, EventHandler>>>,
}

impl EventRouter {
    /// Wrap `coordinator`, which must not have had `on_request` configured
    /// yet — `EventRouter` installs its own dispatching handler.
    pub fn new(mut coordinator: StreamCoordinator) -> Self {
        let handlers: Arc<RwLock<HashMap<String, EventHandler>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let dispatch_handlers = handlers.clone();
        coordinator.on_request(Arc::new(move |entry: Entry, replier: Replier| {
            let handlers = dispatch_handlers.clone();
            Box::pin(async move {
                let (event_name, payload) = decode(entry.content());
                let handler = handlers.read().expect("handler registry poisoned").get(event_name).cloned();
                match handler {
                    Some(handler) => handler(payload.to_string(), entry, replier).await,
                    None => {
                        let message = match missing_handler_error(event_name) {
                            Error::Configuration(message) => message,
                            other => other.to_string(),
                        };
                        let _ = replier.reject(&entry, message).await;
                    }
                }
            })
        }));

        EventRouter {
            coordinator,
            handlers,
        }
    }

    pub fn on_error(&mut self, handler: streamipc_core::ErrorHandler) -> &mut Self {
        self.coordinator.on_error(handler);
        self
    }

    /// Register (or replace) the handler for `event_name`.
    pub fn on(&mut self, event_name: impl Into<String>, handler: EventHandler) -> &mut Self {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .insert(event_name.into(), handler);
        self
    }

    pub async fn connect(&mut self, cfg: &streamipc_config::Config) -> Result<()> {
        self.coordinator.connect(cfg).await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.coordinator.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.coordinator.is_connected()
    }

    /// Send `event_name` with `payload` to group `to` and await its reply.
    pub async fn send_event(
        &self,
        event_name: &str,
        payload: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<Response> {
        self.coordinator
            .send_to_group(encode(event_name, &payload.into()), to)
            .await
    }

    /// Access the underlying coordinator, e.g. to call `fulfill_request`
    /// directly from outside a registered handler.
    pub fn coordinator(&self) -> &StreamCoordinator {
        &self.coordinator
    }
}

/// The error `EventRouter` itself reports (as a rejection) when no handler
/// is registered for an incoming event name. Public so a caller building
/// its own router-like dispatch can reuse the exact same message instead
/// of inventing a second one that could drift from this one.
pub fn missing_handler_error(event_name: &str) -> Error {
    Error::Configuration(format!("no handler registered for event `{event_name}`"))
}
