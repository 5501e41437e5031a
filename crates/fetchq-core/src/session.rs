//! Collaborators shared by connections and queues.

use std::io;
use std::sync::Arc;

use crate::background::{BackgroundExecution, NoopBackground};
use crate::config::FetchConfig;
use crate::connection::Connection;
use crate::notify::Notifier;
use crate::queue::{ConnectionQueue, DEFAULT_MAX_CONCURRENT_CONNECTIONS};
use crate::request::Request;
use crate::transport::{CurlTransport, Transport};

/// Name of the notification thread spawned by [`Session::new`].
const NOTIFIER_NAME: &str = "fetchq-notify";

/// Initial settings for connections and queues created from a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionDefaults {
    pub uses_buffer: bool,
    pub runs_in_background: bool,
    pub max_concurrent_connections: Option<usize>,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            uses_buffer: true,
            runs_in_background: false,
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
        }
    }
}

/// Transport, background service, notifier and defaults, shared by every
/// connection and queue built from it. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    background: Arc<dyn BackgroundExecution>,
    notifier: Notifier,
    defaults: ConnectionDefaults,
}

impl Session {
    /// Session over `transport` with its own notifier thread and no
    /// background service.
    pub fn new(transport: impl Transport + 'static) -> io::Result<Self> {
        Ok(Self::with_transport(Arc::new(transport), Notifier::spawn(NOTIFIER_NAME)?))
    }

    /// Session over a shared transport, e.g. one the caller keeps a handle to.
    pub fn with_transport(transport: Arc<dyn Transport>, notifier: Notifier) -> Self {
        Self {
            transport,
            background: Arc::new(NoopBackground),
            notifier,
            defaults: ConnectionDefaults::default(),
        }
    }

    /// Curl-backed session configured from `config`.
    pub fn from_config(config: &FetchConfig) -> anyhow::Result<Self> {
        let transport = CurlTransport::new(config.curl_options())?;
        let session = Self::new(transport)?.with_defaults(config.connection_defaults());
        tracing::debug!(defaults = ?session.defaults, "session created from config");
        Ok(session)
    }

    pub fn with_background(mut self, background: Arc<dyn BackgroundExecution>) -> Self {
        self.background = background;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_defaults(mut self, defaults: ConnectionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn background(&self) -> &Arc<dyn BackgroundExecution> {
        &self.background
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn defaults(&self) -> ConnectionDefaults {
        self.defaults
    }

    /// New idle connection for `request`.
    pub fn connection(&self, request: Request) -> Connection {
        Connection::new(self, request)
    }

    /// New empty queue.
    pub fn queue(&self) -> ConnectionQueue {
        ConnectionQueue::new(self)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("notifier", &self.notifier)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
