//! Request and response descriptors exchanged with the transport.
//!
//! The core never looks inside a [`Request`]; it only hands it to the
//! transport. A [`Response`] is read for its declared content length.

/// One HTTP request: method, URL, headers and optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// A `GET` request for `url` with no headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Appends a header; existing headers with the same name are kept.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First header value named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Copy of this request pointed at a new URL. Used when following redirects.
    ///
    /// 303 responses, and 301/302 answering a `POST`, switch to `GET` and drop
    /// the body, matching what browsers and libcurl do.
    pub fn redirected_to(&self, url: impl Into<String>, status: u32) -> Self {
        let mut next = self.clone();
        next.url = url.into();
        let to_get = status == 303 || ((status == 301 || status == 302) && self.method == "POST");
        if to_get {
            next.method = "GET".to_string();
            next.body = None;
        }
        next
    }
}

/// Response head as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// URL the response was received from (after any followed redirects).
    pub url: String,
    pub status: u32,
    pub headers: Vec<(String, String)>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u32) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Declared `Content-Length`, or `None` when absent or not a valid integer.
    pub fn expected_content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// `Location` header of a redirect status (301, 302, 303, 307, 308).
    pub fn redirect_location(&self) -> Option<&str> {
        match self.status {
            301 | 302 | 303 | 307 | 308 => self.header("location"),
            _ => None,
        }
    }

    /// Builds a response from raw header lines as collected from the wire.
    ///
    /// Only the last status line counts: lines before it belong to an earlier
    /// response (e.g. `100 Continue`). Returns `None` without a status line.
    pub fn from_header_lines(url: &str, lines: &[String]) -> Option<Self> {
        let start = lines.iter().rposition(|l| l.starts_with("HTTP/"))?;
        let status = parse_status_line(&lines[start])?;
        let mut headers = Vec::new();
        for line in &lines[start + 1..] {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        Some(Self {
            url: url.to_string(),
            status,
            headers,
        })
    }
}

/// Status code from a line like `HTTP/1.1 206 Partial Content`.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    let proto = parts.next()?;
    if !proto.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
