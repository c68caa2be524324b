//! `streamipc-core`: Redis Stream consumer-group based request/response
//! communication between independently deployed application groups.
//!
//! An application group publishes requests onto a shared stream; a
//! dispatcher pool owned by the recipient group load-balances each entry
//! to one of its own worker pool members, which runs the registered
//! handler and publishes the reply back onto the same stream for the
//! caller's own worker pool to pick up and route to the mailbox awaiting
//! it in the caller's ledger.

pub mod balance;
pub mod coordinator;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod facade;
pub mod ledger;
pub mod metrics;
pub mod response;
pub mod worker;

pub use coordinator::StreamCoordinator;
pub use entry::{Entry, Status};
pub use error::{Error, Result};
pub use facade::{ConsumerInfo, RedisFacade};
pub use ledger::Ledger;
pub use metrics::render_metrics;
pub use response::{Response, TIMEOUT_REASON};
pub use worker::{ErrorHandler, Replier, RequestHandler, Worker};

pub use dispatcher::Dispatcher;
