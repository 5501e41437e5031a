//! Background-execution hook.
//!
//! Hosts that can keep the process alive after the application is suspended
//! implement [`BackgroundExecution`]. Connections that opt in, and queues on
//! their behalf, hold a [`BackgroundTask`] while their work is outstanding.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifier handed out by [`BackgroundExecution::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackgroundTaskId(pub u64);

/// Host service that extends process lifetime while work is pending.
///
/// `end` must tolerate ids that were already ended.
pub trait BackgroundExecution: Send + Sync {
    fn begin(&self, name: &str) -> BackgroundTaskId;
    fn end(&self, id: BackgroundTaskId);
}

/// Service for hosts without any process-lifetime extension.
#[derive(Debug, Default)]
pub struct NoopBackground;

impl BackgroundExecution for NoopBackground {
    fn begin(&self, _name: &str) -> BackgroundTaskId {
        BackgroundTaskId(0)
    }

    fn end(&self, _id: BackgroundTaskId) {}
}

/// Tracks outstanding registrations. A host can poll `outstanding()` before
/// letting the process exit.
#[derive(Debug, Default)]
pub struct CountingBackground {
    next: AtomicU64,
    live: Mutex<HashSet<BackgroundTaskId>>,
    begun: AtomicU64,
}

impl CountingBackground {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations begun and not yet ended.
    pub fn outstanding(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Registrations begun since creation.
    pub fn begun(&self) -> u64 {
        self.begun.load(Ordering::Relaxed)
    }
}

impl BackgroundExecution for CountingBackground {
    fn begin(&self, name: &str) -> BackgroundTaskId {
        let id = BackgroundTaskId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.live.lock().unwrap().insert(id);
        self.begun.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(task = id.0, name, "background task begun");
        id
    }

    fn end(&self, id: BackgroundTaskId) {
        if self.live.lock().unwrap().remove(&id) {
            tracing::trace!(task = id.0, "background task ended");
        }
    }
}

/// Ends its registration when dropped or when [`end`](Self::end) is called,
/// whichever comes first.
pub struct BackgroundTask {
    service: Arc<dyn BackgroundExecution>,
    id: Option<BackgroundTaskId>,
}

impl BackgroundTask {
    pub fn begin(service: &Arc<dyn BackgroundExecution>, name: &str) -> Self {
        let id = service.begin(name);
        Self {
            service: Arc::clone(service),
            id: Some(id),
        }
    }

    pub fn id(&self) -> Option<BackgroundTaskId> {
        self.id
    }

    /// Ends the registration. Calling this again is a no-op.
    pub fn end(&mut self) {
        if let Some(id) = self.id.take() {
            self.service.end(id);
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ends_once_even_when_ended_twice() {
        let counting = Arc::new(CountingBackground::new());
        let service: Arc<dyn BackgroundExecution> = counting.clone();
        let mut a = BackgroundTask::begin(&service, "a");
        let b = BackgroundTask::begin(&service, "b");
        assert_eq!(counting.outstanding(), 2);
        a.end();
        a.end();
        assert_eq!(counting.outstanding(), 1);
        drop(a);
        assert_eq!(counting.outstanding(), 1);
        drop(b);
        assert_eq!(counting.outstanding(), 0);
        assert_eq!(counting.begun(), 2);
    }

    #[test]
    fn ending_unknown_id_is_ignored() {
        let counting = CountingBackground::new();
        let id = counting.begin("x");
        counting.end(id);
        counting.end(id);
        counting.end(BackgroundTaskId(999));
        assert_eq!(counting.outstanding(), 0);
    }
}
