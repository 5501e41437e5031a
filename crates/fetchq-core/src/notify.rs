//! The notification context: one named thread that runs posted jobs in order.
//!
//! Every caller-visible handler runs here, so handlers never run concurrently
//! with each other and consumers can update their own state without locking.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a notification thread. Cloning shares the same thread; the thread
/// exits once every handle is dropped and the queued jobs have run.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    tx: mpsc::UnboundedSender<Job>,
    thread: ThreadId,
    name: String,
}

impl Notifier {
    /// Starts a new notification thread called `name`.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        tracing::error!(
                            notifier = %thread_name,
                            panic = %panic_message(payload.as_ref()),
                            "handler panicked"
                        );
                    }
                }
                tracing::trace!(notifier = %thread_name, "notifier stopped");
            })?;
        Ok(Self {
            inner: Arc::new(NotifierInner {
                tx,
                thread: handle.thread().id(),
                name: name.to_string(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True when called from this notifier's thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// Queues `job` to run after every job posted before it.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.tx.send(Box::new(job)).is_err() {
            tracing::warn!(notifier = %self.inner.name, "notifier stopped; job dropped");
        }
    }

    /// Runs `f` on the notifier and waits for its result.
    ///
    /// Runs inline when already on the notifier thread. Returns `None` if the
    /// job panicked. Blocks the calling thread, so never call this from async
    /// code.
    pub fn call<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Some(f());
        }
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.post(move || {
            let _ = tx.send(f());
        });
        rx.recv().ok()
    }

    /// Blocks until every job posted so far has run.
    pub fn flush(&self) {
        let _ = self.call(|| ());
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("name", &self.inner.name).finish()
    }
}

/// Runs a caller-supplied handler, catching a panic so the bookkeeping that
/// follows it still happens. Returns `None` if `f` panicked.
pub(crate) fn guarded<R>(handler: &str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(out) => Some(out),
        Err(payload) => {
            tracing::error!(
                handler,
                panic = %panic_message(payload.as_ref()),
                "handler panicked"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    }
}
