//! Minimal HTTP/1.1 server for integration tests.
//!
//! One request per connection, always answered with `Connection: close`.
//! Routes:
//! - `/body`: 200 with `Content-Length` and the static body.
//! - `/nolength`: 200 without `Content-Length`; the body ends at close.
//! - `/redirect`: 302 to `/body` (relative `Location`).
//! - `/loop`: 302 to itself.
//! - `/slow`: declares the full length, sends 16 bytes, then stalls.
//! - anything else: 404.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Starts a server in a background thread serving `body`. Returns the base URL
/// (e.g. "http://127.0.0.1:12345/"). The server runs until the process exits.
pub fn start(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            thread::spawn(move || handle(stream, &body));
        }
    });
    format!("http://127.0.0.1:{}/", port)
}

/// A loopback URL nothing listens on.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/", port)
}

fn handle(mut stream: TcpStream, body: &[u8]) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, path) = parse_request_line(request);
    let send_body = !method.eq_ignore_ascii_case("HEAD");

    match path {
        "/body" => {
            write_head(&mut stream, "200 OK", &[("Content-Length", body.len().to_string())]);
            if send_body {
                let _ = stream.write_all(body);
            }
        }
        "/nolength" => {
            write_head(&mut stream, "200 OK", &[]);
            if send_body {
                let _ = stream.write_all(body);
            }
        }
        "/redirect" => {
            write_head(
                &mut stream,
                "302 Found",
                &[("Location", "/body".to_string()), ("Content-Length", "0".to_string())],
            );
        }
        "/loop" => {
            write_head(
                &mut stream,
                "302 Found",
                &[("Location", "/loop".to_string()), ("Content-Length", "0".to_string())],
            );
        }
        "/slow" => {
            write_head(&mut stream, "200 OK", &[("Content-Length", body.len().to_string())]);
            let _ = stream.write_all(&body[..body.len().min(16)]);
            let _ = stream.flush();
            thread::sleep(Duration::from_secs(3));
        }
        _ => {
            write_head(&mut stream, "404 Not Found", &[("Content-Length", "0".to_string())]);
        }
    }
}

fn write_head(stream: &mut TcpStream, status: &str, headers: &[(&str, String)]) {
    let mut head = format!("HTTP/1.1 {}\r\nConnection: close\r\n", status);
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
}

/// Returns (method, path) from the request line.
fn parse_request_line(request: &str) -> (&str, &str) {
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");
    (method, path)
}
