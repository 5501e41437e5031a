//! Transport event processing. Everything here runs on the notifier.

use crate::error::FetchError;
use crate::notify::guarded;
use crate::request::{Request, Response};

use super::handlers::Handlers;
use super::{Connection, ConnectionState};

impl Connection {
    /// Restarts the counters from the response's declared length, replaces the
    /// buffer, then calls the response handler.
    pub(crate) fn did_receive_response(&self, response: Response) {
        {
            let mut ex = self.exchange();
            if ex.state != ConnectionState::Active {
                return;
            }
            ex.begin_response(response.expected_content_length());
        }
        tracing::debug!(
            connection = %self.id(),
            status = response.status,
            expected = ?response.expected_content_length(),
            "response received"
        );
        Handlers::invoke(&self.inner.handlers, Handlers::response, |h| h(&response));
    }

    /// Counts and buffers `chunk` before the progress handler sees it.
    pub(crate) fn did_receive_data(&self, chunk: Vec<u8>) {
        let quota = {
            let mut ex = self.exchange();
            if ex.state != ConnectionState::Active {
                return;
            }
            ex.record_chunk(&chunk)
        };
        Handlers::invoke(&self.inner.handlers, Handlers::progress, |h| h(&chunk, quota));
    }

    /// Decides a redirect: the redirect handler's answer, or the proposed
    /// request unchanged when no handler is set. A connection that is no
    /// longer active blocks it.
    pub(crate) fn will_send_request(&self, proposed: Request, response: &Response) -> Option<Request> {
        if !self.is_active() {
            return None;
        }
        // A panicking redirect handler blocks the redirect.
        let decision = match Handlers::take(&self.inner.handlers, Handlers::redirect) {
            Some(mut handler) => {
                let decision = guarded("redirect", || handler(proposed, response)).flatten();
                Handlers::restore(&self.inner.handlers, Handlers::redirect, handler);
                decision
            }
            None => Some(proposed),
        };
        tracing::debug!(
            connection = %self.id(),
            status = response.status,
            to = decision.as_ref().map(|r| r.url.as_str()).unwrap_or("<blocked>"),
            "redirect"
        );
        decision
    }

    pub(crate) fn did_finish_loading(&self) {
        self.conclude(Ok(()));
    }

    pub(crate) fn did_fail(&self, error: FetchError) {
        self.conclude(Err(error));
    }

    /// Terminal transition for finish/fail. The buffer survives the completion
    /// handler and is discarded right after it.
    fn conclude(&self, outcome: Result<(), FetchError>) {
        let next = if outcome.is_ok() {
            ConnectionState::Finished
        } else {
            ConnectionState::Failed
        };
        let (task, background) = {
            let mut ex = self.exchange();
            if ex.state != ConnectionState::Active {
                return;
            }
            ex.state = next;
            (ex.task.take(), ex.background.take())
        };
        match &outcome {
            Ok(()) => tracing::debug!(
                connection = %self.id(),
                received = self.received_bytes_count(),
                "connection finished"
            ),
            Err(error) => tracing::info!(connection = %self.id(), %error, "connection failed"),
        }

        Handlers::invoke(&self.inner.handlers, Handlers::completion, |h| h(outcome.clone()));
        self.exchange().buffer = None;
        drop(task);
        drop(background);
        self.notify_owner(outcome);
    }

    /// Completion for a connection whose terminal transition already happened
    /// (cancellation).
    pub(crate) fn report_termination(&self, outcome: Result<(), FetchError>) {
        Handlers::invoke(&self.inner.handlers, Handlers::completion, |h| h(outcome.clone()));
        self.notify_owner(outcome);
    }

    fn notify_owner(&self, outcome: Result<(), FetchError>) {
        let owner = self.exchange().owner.take();
        if let Some(owner) = owner {
            (owner.on_terminate)(self, outcome);
        }
    }
}
