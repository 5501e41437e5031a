//! libcurl transport: one driver thread runs a `curl::multi` loop for every
//! exchange begun through this transport.
//!
//! Redirects are not followed by libcurl itself; each one is offered to the
//! connection's redirect handler and, if accepted, restarted by the driver.

mod driver;
mod handler;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::FetchError;
use crate::request::Request;

use super::{EventSink, Transport, TransportTask};

/// Per-exchange libcurl settings.
#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below this many bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Redirects followed per exchange before failing with `TooManyRedirects`.
    pub max_redirections: u32,
    /// Receive buffer size (None = libcurl default).
    pub buffer_size: Option<usize>,
    pub user_agent: Option<String>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            max_redirections: 10,
            buffer_size: None,
            user_agent: None,
        }
    }
}

pub(super) enum Command {
    Start {
        id: u64,
        request: Request,
        events: EventSink,
    },
    Cancel(u64),
}

/// [`Transport`] backed by libcurl.
pub struct CurlTransport {
    commands: mpsc::Sender<Command>,
    next_id: AtomicU64,
}

impl CurlTransport {
    /// Starts the driver thread.
    pub fn new(options: CurlOptions) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("fetchq-curl".to_string())
            .spawn(move || driver::run(rx, options))?;
        Ok(Self {
            commands: tx,
            next_id: AtomicU64::new(1),
        })
    }
}

impl Transport for CurlTransport {
    fn begin(&self, request: &Request, events: EventSink) -> Result<Box<dyn TransportTask>, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.commands
            .send(Command::Start {
                id,
                request: request.clone(),
                events,
            })
            .map_err(|_| FetchError::Transport("curl driver stopped".to_string()))?;
        Ok(Box::new(CurlTask {
            id,
            commands: self.commands.clone(),
        }))
    }
}

struct CurlTask {
    id: u64,
    commands: mpsc::Sender<Command>,
}

impl TransportTask for CurlTask {
    fn cancel(&mut self) {
        let _ = self.commands.send(Command::Cancel(self.id));
    }
}
