//! Admission, start and completion of queue members.
//!
//! Membership changes happen under the queue lock; handlers and
//! `Connection::start` run on the notifier with no queue lock held.

use std::sync::Arc;

use crate::background::BackgroundTask;
use crate::connection::{Connection, ConnectionState};
use crate::error::{FetchError, UsageError};

use super::members::{Phase, Removed};
use super::Shared;

impl Shared {
    /// Admits pending members while the queue is resumed and below its bound.
    pub(super) fn admit(self: &Arc<Self>) {
        let admitted: Vec<Connection> = {
            let mut st = self.state();
            let mut out = Vec::new();
            while let Some(connection) = st.admit_next() {
                tracing::debug!(
                    queue = st.label(),
                    connection = %connection.id(),
                    active = st.admitted.len(),
                    pending = st.pending.len(),
                    "connection admitted"
                );
                out.push(connection);
            }
            out
        };
        for connection in admitted {
            let shared = Arc::clone(self);
            self.session
                .notifier()
                .post(move || shared.start_member(connection));
        }
    }

    /// Runs on the notifier: `will_start`, then `start()` unless a cancel-all
    /// got there first.
    fn start_member(self: &Arc<Self>, connection: Connection) {
        self.invoke_will_start(&connection);

        let mut background = if connection.runs_in_background() {
            let name = format!("fetchq queue {} connection {}", self.state().label(), connection.id());
            Some(BackgroundTask::begin(self.session.background(), &name))
        } else {
            None
        };
        let cancel_requested = {
            let mut st = self.state();
            st.member_mut(connection.id()).map(|member| {
                member.phase = Phase::Running;
                member.background = background.take();
                member.cancel_requested
            })
        };
        drop(background);
        match cancel_requested {
            // No longer a member.
            None => return,
            Some(true) => {
                self.finish_member(&connection, true, None);
                return;
            }
            Some(false) => {}
        }

        match connection.start_admitted(self.id) {
            Ok(()) => {
                if self.cancel_requested(&connection) {
                    let _ = connection.cancel();
                }
            }
            Err(error) => self.start_failed(&connection, error),
        }
    }

    /// Finishes a member whose `start()` was refused. A cancel-all that
    /// arrived meanwhile wins over the start error.
    pub(super) fn start_failed(self: &Arc<Self>, connection: &Connection, error: UsageError) {
        if self.cancel_requested(connection) {
            self.finish_member(connection, true, None);
        } else {
            tracing::warn!(connection = %connection.id(), %error, "queued connection could not start");
            self.finish_member(connection, false, Some(FetchError::Start(error)));
        }
    }

    fn cancel_requested(&self, connection: &Connection) -> bool {
        self.state()
            .member_mut(connection.id())
            .map(|member| member.cancel_requested)
            .unwrap_or(false)
    }

    /// Removes a member and reports it once through `did_finish`, then refills
    /// the freed slot. A member that is no longer present is ignored.
    pub(super) fn finish_member(
        self: &Arc<Self>,
        connection: &Connection,
        cancelled: bool,
        error: Option<FetchError>,
    ) {
        let (removed, label) = {
            let mut st = self.state();
            (st.remove(connection.id()), st.label().to_string())
        };
        let background = match removed {
            None => return,
            Some(Removed::Pending) => None,
            Some(Removed::Admitted(member)) => member.background,
        };
        connection.release_claim(self.id);
        tracing::debug!(
            queue = %label,
            connection = %connection.id(),
            cancelled,
            error = ?error,
            "connection left queue"
        );

        let shared = Arc::clone(self);
        let connection = connection.clone();
        self.session.notifier().post(move || {
            shared.invoke_did_finish(&connection, cancelled, error.as_ref());
            drop(background);
        });
        self.admit();
    }

    /// Owner hook installed on every member when it is added.
    pub(super) fn termination_hook(
        self: &Arc<Self>,
    ) -> Box<dyn FnOnce(&Connection, Result<(), FetchError>) + Send> {
        let shared = Arc::clone(self);
        Box::new(move |connection, outcome| {
            let cancelled = connection.state() == ConnectionState::Cancelled;
            let error = if cancelled { None } else { outcome.err() };
            shared.finish_member(connection, cancelled, error);
        })
    }
}
