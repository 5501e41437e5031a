//! Queue membership: FIFO pending list plus admitted members.

use std::collections::VecDeque;

use crate::background::BackgroundTask;
use crate::connection::{Connection, ConnectionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    /// Admitted; `will_start` and `start()` are queued on the notifier.
    Starting,
    /// `start()` has been called.
    Running,
}

pub(super) struct Member {
    pub(super) connection: Connection,
    pub(super) phase: Phase,
    pub(super) cancel_requested: bool,
    /// Queue-scoped background task, held until `did_finish` has run.
    pub(super) background: Option<BackgroundTask>,
}

/// A member taken out of the queue.
pub(super) enum Removed {
    Pending,
    Admitted(Member),
}

pub(super) struct QueueState {
    pub(super) name: Option<String>,
    pub(super) max_concurrent: Option<usize>,
    pub(super) suspended: bool,
    pub(super) pending: VecDeque<Connection>,
    pub(super) admitted: Vec<Member>,
}

impl QueueState {
    pub(super) fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            name: None,
            max_concurrent,
            suspended: false,
            pending: VecDeque::new(),
            admitted: Vec::new(),
        }
    }

    /// `Some(0)` counts as 1 so a queue can always make progress.
    fn has_capacity(&self) -> bool {
        match self.max_concurrent {
            None => true,
            Some(max) => self.admitted.len() < max.max(1),
        }
    }

    /// Moves the pending head to the admitted set if the queue may start it.
    pub(super) fn admit_next(&mut self) -> Option<Connection> {
        if self.suspended || !self.has_capacity() {
            return None;
        }
        let connection = self.pending.pop_front()?;
        self.admitted.push(Member {
            connection: connection.clone(),
            phase: Phase::Starting,
            cancel_requested: false,
            background: None,
        });
        Some(connection)
    }

    pub(super) fn member_mut(&mut self, id: ConnectionId) -> Option<&mut Member> {
        self.admitted.iter_mut().find(|m| m.connection.id() == id)
    }

    pub(super) fn remove(&mut self, id: ConnectionId) -> Option<Removed> {
        if let Some(pos) = self.admitted.iter().position(|m| m.connection.id() == id) {
            return Some(Removed::Admitted(self.admitted.remove(pos)));
        }
        let pos = self.pending.iter().position(|c| c.id() == id)?;
        self.pending.remove(pos);
        Some(Removed::Pending)
    }

    /// Admitted members in admission order, then pending members in FIFO order.
    pub(super) fn snapshot(&self) -> Vec<Connection> {
        self.admitted
            .iter()
            .map(|m| m.connection.clone())
            .chain(self.pending.iter().cloned())
            .collect()
    }

    pub(super) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}
