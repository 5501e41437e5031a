//! Callback-driven HTTP connections and a bounded-concurrency connection queue.
//!
//! A [`Connection`] wraps one request/response exchange and reports its
//! lifecycle through handlers; a [`ConnectionQueue`] admits many connections
//! while capping how many run at once. Every handler runs on the session's
//! [`Notifier`] thread.

pub mod background;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod notify;
pub mod queue;
pub mod request;
pub mod session;
pub mod transport;

pub use background::{BackgroundExecution, BackgroundTask, CountingBackground, NoopBackground};
pub use connection::{Connection, ConnectionId, ConnectionState, UNKNOWN_QUOTA};
pub use error::{FetchError, UsageError};
pub use notify::Notifier;
pub use queue::{ConnectionQueue, DEFAULT_MAX_CONCURRENT_CONNECTIONS};
pub use request::{Request, Response};
pub use session::{ConnectionDefaults, Session};
pub use transport::{EventSink, Transport, TransportTask};
