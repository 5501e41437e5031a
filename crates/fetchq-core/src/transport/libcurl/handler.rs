//! Easy2 handler for one exchange: turns header lines and body writes into
//! sink events.

use crate::request::{Request, Response};
use crate::transport::EventSink;

pub(super) struct ExchangeHandler {
    pub(super) events: EventSink,
    pub(super) request: Request,
    pub(super) redirects: u32,
    lines: Vec<String>,
    /// A response head has been delivered to the sink.
    pub(super) responded: bool,
    /// Set when a redirect was accepted; the transfer is aborted and restarted.
    pub(super) redirect_to: Option<Request>,
}

impl ExchangeHandler {
    pub(super) fn new(events: EventSink, request: Request, redirects: u32) -> Self {
        Self {
            events,
            request,
            redirects,
            lines: Vec::new(),
            responded: false,
            redirect_to: None,
        }
    }

    /// End of a header block. Returns false to abort the transfer.
    fn headers_complete(&mut self) -> bool {
        let Some(response) = Response::from_header_lines(&self.request.url, &self.lines) else {
            return true;
        };
        if response.status < 200 {
            self.lines.clear();
            return true;
        }
        if let Some(target) = response
            .redirect_location()
            .and_then(|location| resolve_location(&self.request.url, location))
        {
            let proposed = self.request.redirected_to(target, response.status);
            if let Some(next) = self.events.redirect(proposed, response.clone()) {
                self.redirect_to = Some(next);
                return false;
            }
        }
        self.responded = true;
        self.events.response(response);
        true
    }
}

impl curl::easy::Handler for ExchangeHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        let text = String::from_utf8_lossy(data);
        let line = text.trim_end();
        if line.starts_with("HTTP/") {
            self.lines.clear();
        }
        if line.is_empty() {
            return self.headers_complete();
        }
        self.lines.push(line.to_string());
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        self.events.data(data.to_vec());
        Ok(data.len())
    }
}

/// Resolves a `Location` value against the URL that produced it.
pub(super) fn resolve_location(base: &str, location: &str) -> Option<String> {
    let base = url::Url::parse(base).ok()?;
    base.join(location).ok().map(String::from)
}
