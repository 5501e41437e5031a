//! Caller-supplied handlers and the take/restore discipline used to call them.
//!
//! A handler is taken out of its slot, called with no lock held, then put
//! back unless the slot was filled again while it ran. This lets a handler
//! replace itself or call back into its connection.

use std::sync::Mutex;

use crate::error::FetchError;
use crate::notify::guarded;
use crate::request::{Request, Response};

pub type ResponseHandler = Box<dyn FnMut(&Response) + Send>;
/// Returns the request to send instead, or `None` to block the redirect.
pub type RedirectHandler = Box<dyn FnMut(Request, &Response) -> Option<Request> + Send>;
/// Receives each chunk and the quota (`0.0..=1.0` or [`UNKNOWN_QUOTA`](super::UNKNOWN_QUOTA)).
pub type ProgressHandler = Box<dyn FnMut(&[u8], f32) + Send>;
pub type CompletionHandler = Box<dyn FnMut(Result<(), FetchError>) + Send>;

type Slot<H> = fn(&mut Handlers) -> &mut Option<H>;

#[derive(Default)]
pub(crate) struct Handlers {
    response: Option<ResponseHandler>,
    redirect: Option<RedirectHandler>,
    progress: Option<ProgressHandler>,
    completion: Option<CompletionHandler>,
}

impl Handlers {
    pub(crate) fn response(&mut self) -> &mut Option<ResponseHandler> {
        &mut self.response
    }

    pub(crate) fn redirect(&mut self) -> &mut Option<RedirectHandler> {
        &mut self.redirect
    }

    pub(crate) fn progress(&mut self) -> &mut Option<ProgressHandler> {
        &mut self.progress
    }

    pub(crate) fn completion(&mut self) -> &mut Option<CompletionHandler> {
        &mut self.completion
    }

    pub(crate) fn set<H>(cell: &Mutex<Handlers>, slot: Slot<H>, handler: Option<H>) {
        let previous = std::mem::replace(slot(&mut cell.lock().unwrap()), handler);
        drop(previous);
    }

    pub(crate) fn take<H>(cell: &Mutex<Handlers>, slot: Slot<H>) -> Option<H> {
        slot(&mut cell.lock().unwrap()).take()
    }

    pub(crate) fn restore<H>(cell: &Mutex<Handlers>, slot: Slot<H>, handler: H) {
        let mut guard = cell.lock().unwrap();
        let current = slot(&mut guard);
        if current.is_none() {
            *current = Some(handler);
        }
    }

    /// Calls the handler in `slot` if one is set. A panicking handler is
    /// logged, put back like any other, and yields `None`.
    pub(crate) fn invoke<H, R>(
        cell: &Mutex<Handlers>,
        slot: Slot<H>,
        call: impl FnOnce(&mut H) -> R,
    ) -> Option<R> {
        let mut handler = Self::take(cell, slot)?;
        let out = guarded("connection", || call(&mut handler));
        Self::restore(cell, slot, handler);
        out
    }
}
