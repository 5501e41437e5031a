//! Bounded-concurrency queue of connections.
//!
//! Say you have to download 20 images: starting 20 connections at once is
//! wasteful. Add them to a queue instead; it starts them in FIFO order while
//! keeping at most `maximum_concurrent_connections` running, and reports each
//! one through `will_start` / `did_finish` on the notifier.
//!
//! Members keep the queue's shared state alive, so dropping the last
//! `ConnectionQueue` handle does not orphan their `did_finish` notifications.

mod admission;
mod members;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connection::Connection;
use crate::error::{FetchError, UsageError};
use crate::notify::guarded;
use crate::session::Session;

use members::{Phase, QueueState};

/// No application-level bound: admission is limited only by pending members
/// and suspension.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: Option<usize> = None;

pub type WillStartHandler = Box<dyn FnMut(&Connection) + Send>;
/// Receives the connection, whether it was cancelled, and its failure if any.
pub type DidFinishHandler = Box<dyn FnMut(&Connection, bool, Option<&FetchError>) + Send>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct QueueId(u64);

/// Handle to a connection queue. Clones share the same queue.
#[derive(Clone)]
pub struct ConnectionQueue {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    id: QueueId,
    session: Session,
    state: Mutex<QueueState>,
    handlers: Mutex<QueueHandlers>,
}

#[derive(Default)]
struct QueueHandlers {
    will_start: Option<WillStartHandler>,
    did_finish: Option<DidFinishHandler>,
}

impl ConnectionQueue {
    /// Creates an empty queue bounded by the session's default.
    pub fn new(session: &Session) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)),
                session: session.clone(),
                state: Mutex::new(QueueState::new(session.defaults().max_concurrent_connections)),
                handlers: Mutex::new(QueueHandlers::default()),
            }),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.shared.state().name.clone()
    }

    /// Names the queue in logs and background-task names.
    pub fn set_name(&self, name: impl Into<String>) {
        self.shared.state().name = Some(name.into());
    }

    pub fn maximum_concurrent_connections(&self) -> Option<usize> {
        self.shared.state().max_concurrent
    }

    /// Sets the admission bound; `None` removes it. Raising the bound admits
    /// pending members at once; lowering it never stops running ones.
    pub fn set_maximum_concurrent_connections(&self, max: Option<usize>) {
        self.shared.state().max_concurrent = max;
        self.shared.admit();
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state().suspended
    }

    /// While suspended, pending members are not started. Running members are
    /// unaffected. Resuming admits immediately.
    pub fn set_suspended(&self, suspended: bool) {
        self.shared.state().suspended = suspended;
        tracing::debug!(queue = self.shared.state().label(), suspended, "queue suspension changed");
        if !suspended {
            self.shared.admit();
        }
    }

    /// Called on the notifier right before a member is started.
    pub fn set_will_start_handler<F>(&self, handler: F)
    where
        F: FnMut(&Connection) + Send + 'static,
    {
        let previous = self.shared.handlers.lock().unwrap().will_start.replace(Box::new(handler));
        drop(previous);
    }

    /// Called on the notifier once a member has left the queue.
    pub fn set_did_finish_handler<F>(&self, handler: F)
    where
        F: FnMut(&Connection, bool, Option<&FetchError>) + Send + 'static,
    {
        let previous = self.shared.handlers.lock().unwrap().did_finish.replace(Box::new(handler));
        drop(previous);
    }

    /// Enqueues one connection. See [`add_connections`](Self::add_connections).
    pub fn add_connection(&self, connection: &Connection) -> Result<(), UsageError> {
        self.add_connections(std::slice::from_ref(connection))
    }

    /// Enqueues `connections` in order.
    ///
    /// All or nothing: if any connection is not idle, already belongs to a
    /// queue, or appears twice, none is added and the first error is returned.
    pub fn add_connections(&self, connections: &[Connection]) -> Result<(), UsageError> {
        {
            let mut st = self.shared.state();
            let mut claimed: Vec<&Connection> = Vec::with_capacity(connections.len());
            for connection in connections {
                if let Err(error) = connection.claim(self.shared.id, self.shared.termination_hook()) {
                    for done in claimed {
                        done.release_claim(self.shared.id);
                    }
                    tracing::debug!(queue = st.label(), connection = %connection.id(), %error, "add rejected");
                    return Err(error);
                }
                claimed.push(connection);
            }
            st.pending.extend(connections.iter().cloned());
            tracing::debug!(
                queue = st.label(),
                added = connections.len(),
                pending = st.pending.len(),
                "connections enqueued"
            );
        }
        self.shared.admit();
        Ok(())
    }

    /// Members at this instant: running ones first, then pending in FIFO order.
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.state().snapshot()
    }

    /// Admitted members (started or about to start).
    pub fn active_count(&self) -> usize {
        self.shared.state().admitted.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Cancels every member.
    ///
    /// Pending members are dropped from the queue at once and never start.
    /// Every member is reported through `did_finish(_, true, _)` later on the
    /// notifier, not from within this call.
    pub fn cancel_all_connections(&self) {
        let (pending, running) = {
            let mut st = self.shared.state();
            let pending: Vec<Connection> = st.pending.drain(..).collect();
            let mut running = Vec::new();
            for member in st.admitted.iter_mut() {
                member.cancel_requested = true;
                if member.phase == Phase::Running {
                    running.push(member.connection.clone());
                }
            }
            tracing::debug!(
                queue = st.label(),
                pending = pending.len(),
                admitted = st.admitted.len(),
                "cancelling all connections"
            );
            (pending, running)
        };

        for connection in pending {
            connection.release_claim(self.shared.id);
            let shared = Arc::clone(&self.shared);
            self.shared.session.notifier().post(move || {
                shared.invoke_did_finish(&connection, true, None);
            });
        }
        for connection in running {
            // Not yet active means start() is in progress; the start path
            // checks `cancel_requested` once it returns.
            let _ = connection.cancel();
        }
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap()
    }

    fn invoke_will_start(&self, connection: &Connection) {
        let handler = self.handlers.lock().unwrap().will_start.take();
        if let Some(mut handler) = handler {
            guarded("will_start", || handler(connection));
            let mut handlers = self.handlers.lock().unwrap();
            if handlers.will_start.is_none() {
                handlers.will_start = Some(handler);
            }
        }
    }

    fn invoke_did_finish(&self, connection: &Connection, cancelled: bool, error: Option<&FetchError>) {
        let handler = self.handlers.lock().unwrap().did_finish.take();
        if let Some(mut handler) = handler {
            guarded("did_finish", || handler(connection, cancelled, error));
            let mut handlers = self.handlers.lock().unwrap();
            if handlers.did_finish.is_none() {
                handlers.did_finish = Some(handler);
            }
        }
    }
}

impl std::fmt::Debug for ConnectionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.state();
        f.debug_struct("ConnectionQueue")
            .field("name", &st.name)
            .field("max_concurrent", &st.max_concurrent)
            .field("suspended", &st.suspended)
            .field("admitted", &st.admitted.len())
            .field("pending", &st.pending.len())
            .finish()
    }
}
