//! Lifecycle state and per-exchange bookkeeping (counters, buffer, held resources).

use std::any::Any;
use std::sync::Arc;

use crate::background::BackgroundTask;
use crate::error::FetchError;
use crate::queue::QueueId;
use crate::request::Request;
use crate::transport::TransportTask;

use super::Connection;

/// Quota reported to progress handlers when the total size is unknown.
pub const UNKNOWN_QUOTA: f32 = -1.0;

/// Upper bound for preallocating a buffer from a declared content length.
const MAX_BUFFER_PREALLOC: u64 = 1 << 20;

/// Lifecycle: `Idle → Active → {Finished | Failed | Cancelled}`. Terminal
/// states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Active,
    Finished,
    Failed,
    Cancelled,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Finished | ConnectionState::Failed | ConnectionState::Cancelled
        )
    }
}

/// Called once when an owned connection terminates, on the notifier.
pub(crate) type OwnerHook = Box<dyn FnOnce(&Connection, Result<(), FetchError>) + Send>;

/// The queue a connection currently belongs to.
pub(crate) struct Owner {
    pub(crate) queue: QueueId,
    pub(crate) on_terminate: OwnerHook,
}

/// Mutable connection state, guarded by the connection's mutex.
pub(crate) struct Exchange {
    pub(crate) state: ConnectionState,
    pub(crate) request: Option<Request>,
    pub(crate) uses_buffer: bool,
    pub(crate) runs_in_background: bool,
    pub(crate) received: u64,
    pub(crate) expected: Option<u64>,
    pub(crate) buffer: Option<Vec<u8>>,
    pub(crate) background: Option<BackgroundTask>,
    pub(crate) task: Option<Box<dyn TransportTask>>,
    pub(crate) user_info: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) owner: Option<Owner>,
}

impl Exchange {
    pub(crate) fn new(request: Request, uses_buffer: bool, runs_in_background: bool) -> Self {
        Self {
            state: ConnectionState::Idle,
            request: Some(request),
            uses_buffer,
            runs_in_background,
            received: 0,
            expected: None,
            buffer: None,
            background: None,
            task: None,
            user_info: None,
            owner: None,
        }
    }

    /// New response: counters restart and any previous buffer is replaced.
    pub(crate) fn begin_response(&mut self, expected: Option<u64>) {
        self.received = 0;
        self.expected = expected;
        self.buffer = if self.uses_buffer {
            let hint = expected.unwrap_or(0).min(MAX_BUFFER_PREALLOC) as usize;
            Some(Vec::with_capacity(hint))
        } else {
            None
        };
    }

    /// Counts `chunk`, appends it to the buffer if one exists, and returns the quota.
    pub(crate) fn record_chunk(&mut self, chunk: &[u8]) -> f32 {
        self.received += chunk.len() as u64;
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.extend_from_slice(chunk);
        }
        quota(self.received, self.expected)
    }

    pub(crate) fn reset_progress(&mut self) {
        self.received = 0;
        self.expected = None;
        self.buffer = None;
    }
}

/// Fraction of `expected` received, clamped to 1.0; [`UNKNOWN_QUOTA`] when
/// the expected size is unknown or zero.
pub(crate) fn quota(received: u64, expected: Option<u64>) -> f32 {
    match expected {
        Some(total) if total > 0 => (received as f64 / total as f64).min(1.0) as f32,
        _ => UNKNOWN_QUOTA,
    }
}
