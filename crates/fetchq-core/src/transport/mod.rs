//! Transport adapters: the code that actually moves bytes.
//!
//! A [`Transport`] begins an exchange for a request and reports what happens
//! through the [`EventSink`] it is given. The sink forwards each event to the
//! connection's notifier, so transports may call it from any thread.

pub mod libcurl;
pub mod scripted;

use crate::connection::{Connection, ConnectionId};
use crate::error::FetchError;
use crate::request::{Request, Response};

pub use libcurl::{CurlOptions, CurlTransport};
pub use scripted::{HeldExchange, ScriptedTransport};

/// Performs network exchanges on behalf of connections.
pub trait Transport: Send + Sync {
    /// Begins sending `request`. Events must be delivered in order: at most
    /// one `finish`/`fail`, after any `response`/`data` events.
    fn begin(&self, request: &Request, events: EventSink) -> Result<Box<dyn TransportTask>, FetchError>;
}

/// One running exchange. Dropping it releases its transport resources.
pub trait TransportTask: Send {
    /// Stops event delivery. Must be harmless on an exchange that already ended.
    fn cancel(&mut self);
}

/// Where a transport reports the events of one exchange.
#[derive(Clone)]
pub struct EventSink {
    connection: Connection,
}

impl EventSink {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Response head received. A new response restarts counters and buffer.
    pub fn response(&self, response: Response) {
        let conn = self.connection.clone();
        self.connection
            .notifier()
            .post(move || conn.did_receive_response(response));
    }

    /// A chunk of body bytes.
    pub fn data(&self, chunk: Vec<u8>) {
        let conn = self.connection.clone();
        self.connection
            .notifier()
            .post(move || conn.did_receive_data(chunk));
    }

    /// Asks whether to follow a redirect and blocks until the connection's
    /// redirect handler answers. `None` means do not follow.
    pub fn redirect(&self, proposed: Request, response: Response) -> Option<Request> {
        let conn = self.connection.clone();
        self.connection
            .notifier()
            .call(move || conn.will_send_request(proposed, &response))
            .flatten()
    }

    /// The exchange completed successfully.
    pub fn finish(&self) {
        let conn = self.connection.clone();
        self.connection.notifier().post(move || conn.did_finish_loading());
    }

    /// The exchange failed.
    pub fn fail(&self, error: FetchError) {
        let conn = self.connection.clone();
        self.connection.notifier().post(move || conn.did_fail(error));
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("connection", &self.connection.id())
            .finish()
    }
}
