//! The correlation ledger: a concurrent map from outstanding request id to
//! the waiting caller's mailbox, with absolute-deadline expiry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::entry::Entry;
use crate::metrics::LEDGER_SIZE;

/// What a mailbox can be filled with: either the reply entry or an error
/// message describing why none will ever arrive. Single-assignment — only
/// one of these, or the timeout sentinel observed independently by the
/// waiter, will ever be seen for a given request id.
#[derive(Debug)]
pub enum MailboxValue {
    Reply(Entry),
    Error(String),
}

/// The sending half stashed in a ledger row; [`Ledger::take`] hands this
/// out at most once per id.
pub type MailboxSender = oneshot::Sender<MailboxValue>;

/// The receiving half returned to the caller that created the row.
pub type MailboxReceiver = oneshot::Receiver<MailboxValue>;

struct Row {
    sender: Option<MailboxSender>,
    expires_at: Instant,
}

/// Thread-safe request-id -> mailbox correlation table, with a background
/// sweeper that drops rows whose deadline has passed.
pub struct Ledger {
    rows: Arc<DashMap<String, Row>>,
    sweeper: Option<JoinHandle<()>>,
}

impl Ledger {
    /// Build a ledger and start its background sweeper, which scans for
    /// expired rows every `cleanup_interval`.
    pub fn new(cleanup_interval: Duration) -> Self {
        let rows: Arc<DashMap<String, Row>> = Arc::new(DashMap::new());
        let sweeper_rows = rows.clone();

        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                interval.tick().await;
                let now = Instant::now();
                sweeper_rows.retain(|_, row| row.expires_at > now);
                LEDGER_SIZE.set(sweeper_rows.len() as i64);
            }
        });

        Ledger {
            rows,
            sweeper: Some(sweeper),
        }
    }

    /// Register a fresh row for `entry.id()` and return the receiving half
    /// of its mailbox. Must be called, and must complete, before the
    /// request is published — otherwise a fast reply could arrive before
    /// anyone is listening for it.
    ///
    /// Panics if a row already exists for this id; request ids are
    /// generated fresh per `send_to_group` call and collisions indicate a
    /// caller bug, not a runtime condition.
    pub fn store(&self, entry: &Entry, timeout: Duration) -> MailboxReceiver {
        let (tx, rx) = oneshot::channel();
        let row = Row {
            sender: Some(tx),
            expires_at: Instant::now() + timeout,
        };
        if self.rows.insert(entry.id().to_string(), row).is_some() {
            panic!("ledger already has a row for id {}", entry.id());
        }
        LEDGER_SIZE.set(self.rows.len() as i64);
        rx
    }

    /// True if a (non-expired) row exists for this id.
    pub fn contains(&self, id: &str) -> bool {
        match self.rows.get(id) {
            Some(row) => row.expires_at > Instant::now(),
            None => false,
        }
    }

    /// Atomically remove the row for `id` and return its sender, so that
    /// at most one caller can ever deliver into the mailbox. Returns
    /// `None` if the id is unknown or already expired.
    pub fn take(&self, id: &str) -> Option<MailboxSender> {
        let (_, mut row) = self.rows.remove(id)?;
        LEDGER_SIZE.set(self.rows.len() as i64);
        if row.expires_at <= Instant::now() {
            return None;
        }
        row.sender.take()
    }

    /// Remove the row for `id` without returning anything. Idempotent.
    pub fn delete(&self, id: &str) {
        self.rows.remove(id);
        LEDGER_SIZE.set(self.rows.len() as i64);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}
