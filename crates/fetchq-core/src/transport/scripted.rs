//! Deterministic transport for tests and offline hosts.
//!
//! In the default mode every exchange plays its [`Script`] synchronously
//! inside `begin`: optional redirect, response, chunks, then finish or fail.
//! In manual mode exchanges are held until the caller drives them through
//! [`HeldExchange`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::FetchError;
use crate::request::{Request, Response};

use super::{EventSink, Transport, TransportTask};

/// What each exchange produces.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Fail without delivering a response.
    pub fails_immediately: bool,
    /// Response to deliver; `None` produces `200 OK` with a `Content-Length`
    /// equal to the total chunk size.
    pub response: Option<Response>,
    /// Body chunks to deliver after the response.
    pub chunks: Vec<Vec<u8>>,
    /// Error to fail with after the chunks; `None` finishes successfully.
    pub error: Option<FetchError>,
    /// Redirect response proposed before the real response. Its `Location`
    /// becomes the proposed request's URL.
    pub redirect: Option<Response>,
    /// Hold exchanges instead of playing the script.
    pub manual: bool,
}

/// Transport that plays a [`Script`].
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    held: Mutex<Vec<HeldExchange>>,
    begun: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Transport whose exchanges wait for the caller to drive them.
    pub fn manual() -> Self {
        Self::new(Script {
            manual: true,
            ..Script::default()
        })
    }

    /// Replaces the script used by later exchanges.
    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Number of exchanges begun.
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    /// Requests in the order their exchanges began (after redirects).
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Takes the exchanges held in manual mode, oldest first.
    pub fn take_exchanges(&self) -> Vec<HeldExchange> {
        std::mem::take(&mut *self.held.lock().unwrap())
    }

    /// Number of exchanges held in manual mode and not yet taken.
    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn begin(&self, request: &Request, events: EventSink) -> Result<Box<dyn TransportTask>, FetchError> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let exchange = HeldExchange {
            request: request.clone(),
            events,
            cancelled: Arc::clone(&cancelled),
        };

        if script.manual {
            self.requests.lock().unwrap().push(request.clone());
            self.held.lock().unwrap().push(exchange);
        } else {
            let sent = play(&script, exchange);
            self.requests.lock().unwrap().push(sent);
        }
        Ok(Box::new(ScriptedTask { cancelled }))
    }
}

/// Plays `script` on `exchange`; returns the request finally sent.
fn play(script: &Script, exchange: HeldExchange) -> Request {
    let mut request = exchange.request.clone();
    if script.fails_immediately {
        let error = script
            .error
            .clone()
            .unwrap_or_else(|| FetchError::Transport("scripted failure".to_string()));
        exchange.fail(error);
        return request;
    }

    if let Some(redirect) = &script.redirect {
        let location = redirect.header("location").unwrap_or(request.url.as_str()).to_string();
        let proposed = request.redirected_to(location, redirect.status);
        match exchange.events.redirect(proposed, redirect.clone()) {
            Some(next) => request = next,
            None => {
                exchange.respond(redirect.clone());
                exchange.finish();
                return request;
            }
        }
    }

    let response = script.response.clone().unwrap_or_else(|| {
        let total: usize = script.chunks.iter().map(Vec::len).sum();
        Response::new(request.url.clone(), 200).with_header("Content-Length", total.to_string())
    });
    exchange.respond(response);
    for chunk in &script.chunks {
        exchange.send(chunk.clone());
    }
    match &script.error {
        Some(error) => exchange.fail(error.clone()),
        None => exchange.finish(),
    }
    request
}

struct ScriptedTask {
    cancelled: Arc<AtomicBool>,
}

impl TransportTask for ScriptedTask {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// One exchange begun by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct HeldExchange {
    request: Request,
    events: EventSink,
    cancelled: Arc<AtomicBool>,
}

impl HeldExchange {
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// True once the connection asked the transport to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn respond(&self, response: Response) {
        self.events.response(response);
    }

    pub fn send(&self, chunk: impl Into<Vec<u8>>) {
        self.events.data(chunk.into());
    }

    /// Proposes a redirect and returns the connection's decision.
    pub fn redirect(&self, proposed: Request, response: Response) -> Option<Request> {
        self.events.redirect(proposed, response)
    }

    pub fn finish(&self) {
        self.events.finish();
    }

    pub fn fail(&self, error: FetchError) {
        self.events.fail(error);
    }
}
