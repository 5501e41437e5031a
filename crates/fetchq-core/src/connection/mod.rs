//! A single request/response exchange with a callback-driven lifecycle.
//!
//! ```text
//! Idle --start()--> Active --finish--> Finished
//!                          --fail----> Failed
//!                          --cancel()-> Cancelled
//! ```
//!
//! The transport drives the connection through an [`EventSink`]; every event
//! is processed on the session's notifier, where the matching handler runs.
//! Unless buffering is disabled, the body received since the last response is
//! kept in memory until the connection terminates. The completion handler is
//! the last chance to read it with [`Connection::buffered_data`].

mod events;
mod handlers;
mod state;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::background::BackgroundTask;
use crate::error::{FetchError, UsageError};
use crate::notify::Notifier;
use crate::queue::QueueId;
use crate::request::{Request, Response};
use crate::session::Session;
use crate::transport::EventSink;

pub use handlers::{CompletionHandler, ProgressHandler, RedirectHandler, ResponseHandler};
pub use state::{ConnectionState, UNKNOWN_QUOTA};

use handlers::Handlers;
use state::{Exchange, Owner, OwnerHook};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier, used in logs and queue bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to one exchange. Clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    session: Session,
    exchange: Mutex<Exchange>,
    handlers: Mutex<Handlers>,
}

impl Connection {
    /// Creates an idle connection for `request` using the session's defaults.
    pub fn new(session: &Session, request: Request) -> Self {
        let defaults = session.defaults();
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(Inner {
                id,
                session: session.clone(),
                exchange: Mutex::new(Exchange::new(
                    request,
                    defaults.uses_buffer,
                    defaults.runs_in_background,
                )),
                handlers: Mutex::new(Handlers::default()),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        self.exchange().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn request(&self) -> Option<Request> {
        self.exchange().request.clone()
    }

    /// Replaces the request used by the next `start()`.
    pub fn set_request(&self, request: Option<Request>) {
        self.exchange().request = request;
    }

    pub fn uses_buffer(&self) -> bool {
        self.exchange().uses_buffer
    }

    /// Whether received chunks are kept in memory. Takes effect at the next response.
    pub fn set_uses_buffer(&self, uses_buffer: bool) {
        self.exchange().uses_buffer = uses_buffer;
    }

    pub fn runs_in_background(&self) -> bool {
        self.exchange().runs_in_background
    }

    /// Whether `start()` begins a background task, held until the connection terminates.
    pub fn set_runs_in_background(&self, runs_in_background: bool) {
        self.exchange().runs_in_background = runs_in_background;
    }

    /// Bytes received since the last response; reset to 0 by `cancel()`.
    pub fn received_bytes_count(&self) -> u64 {
        self.exchange().received
    }

    /// Declared length of the current response; `None` when unknown.
    pub fn expected_bytes_count(&self) -> Option<u64> {
        self.exchange().expected
    }

    pub fn user_info(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.exchange().user_info.clone()
    }

    pub fn set_user_info(&self, info: Option<Arc<dyn Any + Send + Sync>>) {
        self.exchange().user_info = info;
    }

    pub fn set_response_handler<F>(&self, handler: F)
    where
        F: FnMut(&Response) + Send + 'static,
    {
        Handlers::set(&self.inner.handlers, Handlers::response, Some(Box::new(handler)));
    }

    pub fn set_redirect_handler<F>(&self, handler: F)
    where
        F: FnMut(Request, &Response) -> Option<Request> + Send + 'static,
    {
        Handlers::set(&self.inner.handlers, Handlers::redirect, Some(Box::new(handler)));
    }

    pub fn set_progress_handler<F>(&self, handler: F)
    where
        F: FnMut(&[u8], f32) + Send + 'static,
    {
        Handlers::set(&self.inner.handlers, Handlers::progress, Some(Box::new(handler)));
    }

    pub fn set_completion_handler<F>(&self, handler: F)
    where
        F: FnMut(Result<(), FetchError>) + Send + 'static,
    {
        Handlers::set(&self.inner.handlers, Handlers::completion, Some(Box::new(handler)));
    }

    /// Removes every handler.
    pub fn clear_handlers(&self) {
        let previous = std::mem::take(&mut *self.inner.handlers.lock().unwrap());
        drop(previous);
    }

    /// Starts the exchange.
    ///
    /// Fails if the connection has no request, is not idle, or belongs to a
    /// queue (the queue starts it when admitted). A transport that cannot
    /// begin reports through the completion handler instead.
    pub fn start(&self) -> Result<(), UsageError> {
        self.start_as(None)
    }

    /// Starts a member on behalf of the queue that owns it.
    pub(crate) fn start_admitted(&self, queue: QueueId) -> Result<(), UsageError> {
        self.start_as(Some(queue))
    }

    fn start_as(&self, starter: Option<QueueId>) -> Result<(), UsageError> {
        let (request, in_background) = {
            let mut ex = self.exchange();
            if ex.state != ConnectionState::Idle {
                return Err(UsageError::NotIdle(ex.state));
            }
            if let Some(owner) = ex.owner.as_ref() {
                if starter != Some(owner.queue) {
                    return Err(UsageError::AlreadyQueued);
                }
            }
            let request = ex.request.clone().ok_or(UsageError::MissingRequest)?;
            ex.state = ConnectionState::Active;
            (request, ex.runs_in_background)
        };
        tracing::debug!(
            connection = %self.id(),
            method = %request.method,
            url = %request.url,
            "connection started"
        );

        if in_background {
            let task = BackgroundTask::begin(
                self.inner.session.background(),
                &format!("fetchq connection {}", self.id()),
            );
            let mut ex = self.exchange();
            if ex.state == ConnectionState::Active {
                ex.background = Some(task);
            } else {
                drop(ex);
                drop(task);
            }
        }

        let sink = EventSink::new(self.clone());
        match self.inner.session.transport().begin(&request, sink) {
            Ok(mut task) => {
                let mut ex = self.exchange();
                if ex.state == ConnectionState::Active && ex.task.is_none() {
                    ex.task = Some(task);
                } else {
                    // Cancelled (or already concluded) before the task was recorded.
                    drop(ex);
                    task.cancel();
                }
            }
            Err(error) => {
                tracing::warn!(connection = %self.id(), %error, "transport could not begin");
                let this = self.clone();
                self.notifier().post(move || this.did_fail(error));
            }
        }
        Ok(())
    }

    /// Cancels an active exchange.
    ///
    /// The buffer is discarded and both byte counters reset before this
    /// returns. The completion handler later receives
    /// `Err(FetchError::Cancelled)` on the notifier.
    pub fn cancel(&self) -> Result<(), UsageError> {
        let (task, background) = {
            let mut ex = self.exchange();
            if ex.state != ConnectionState::Active {
                return Err(UsageError::NotActive(ex.state));
            }
            ex.state = ConnectionState::Cancelled;
            ex.reset_progress();
            (ex.task.take(), ex.background.take())
        };
        if let Some(mut task) = task {
            task.cancel();
        }
        drop(background);
        tracing::debug!(connection = %self.id(), "connection cancelled");

        let this = self.clone();
        self.notifier()
            .post(move || this.report_termination(Err(FetchError::Cancelled)));
        Ok(())
    }

    /// Copy of the bytes buffered since the last response, or `None` when no
    /// buffer exists (buffering disabled, no response yet, or terminated).
    pub fn buffered_data(&self) -> Option<Vec<u8>> {
        self.exchange().buffer.clone()
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        self.inner.session.notifier()
    }

    /// Records `queue` as owner. Only idle connections without an owner qualify.
    pub(crate) fn claim(&self, queue: QueueId, on_terminate: OwnerHook) -> Result<(), UsageError> {
        let mut ex = self.exchange();
        if ex.state != ConnectionState::Idle {
            return Err(UsageError::NotIdle(ex.state));
        }
        if ex.owner.is_some() {
            return Err(UsageError::AlreadyQueued);
        }
        ex.owner = Some(Owner {
            queue,
            on_terminate,
        });
        Ok(())
    }

    /// Drops the owner hook if `queue` still owns this connection.
    pub(crate) fn release_claim(&self, queue: QueueId) -> bool {
        let owner = {
            let mut ex = self.exchange();
            match ex.owner.as_ref() {
                Some(owner) if owner.queue == queue => ex.owner.take(),
                _ => None,
            }
        };
        owner.is_some()
    }

    fn exchange(&self) -> MutexGuard<'_, Exchange> {
        self.inner.exchange.lock().unwrap()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
