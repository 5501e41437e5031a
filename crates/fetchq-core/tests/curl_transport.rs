//! Integration test: libcurl transport against a loopback HTTP server.
//!
//! Covers body delivery with progress, redirects followed, blocked and looping,
//! connection failures, cancellation mid-transfer, and a bounded queue.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchq_core::transport::{CurlOptions, CurlTransport};
use fetchq_core::{
    Connection, ConnectionState, FetchError, Request, Response, Session, UNKNOWN_QUOTA,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn body() -> Vec<u8> {
    (0u8..=250).cycle().take(48 * 1024).collect()
}

fn curl_session(options: CurlOptions) -> Session {
    Session::new(CurlTransport::new(options).expect("curl driver")).expect("notifier")
}

/// Outcome plus the buffer as seen from inside the completion handler.
type Completion = (Result<(), FetchError>, Option<Vec<u8>>);

fn completion(conn: &Connection) -> UnboundedReceiver<Completion> {
    let (tx, rx) = unbounded_channel();
    let observed = conn.clone();
    conn.set_completion_handler(move |outcome| {
        let _ = tx.send((outcome, observed.buffered_data()));
    });
    rx
}

fn responses(conn: &Connection) -> Arc<Mutex<Vec<Response>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    conn.set_response_handler(move |response| sink.lock().unwrap().push(response.clone()));
    seen
}

async fn wait(rx: &mut UnboundedReceiver<Completion>) -> Completion {
    timeout(WAIT, rx.recv())
        .await
        .expect("completion timed out")
        .expect("completion handler dropped")
}

#[tokio::test]
async fn body_is_buffered_and_progress_reaches_one() {
    let body = body();
    let base = common::http_server::start(body.clone());
    let session = curl_session(CurlOptions::default());
    let conn = session.connection(Request::get(format!("{}body", base)));

    let quotas = Arc::new(Mutex::new(Vec::new()));
    let q = Arc::clone(&quotas);
    conn.set_progress_handler(move |_chunk, quota| q.lock().unwrap().push(quota));
    let seen = responses(&conn);
    let mut done = completion(&conn);

    conn.start().unwrap();
    let (outcome, buffer) = wait(&mut done).await;
    outcome.expect("transfer succeeds");
    assert_eq!(buffer.as_deref(), Some(body.as_slice()));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, 200);
    assert_eq!(seen[0].expected_content_length(), Some(body.len() as u64));

    let quotas = quotas.lock().unwrap();
    assert!(!quotas.is_empty());
    assert!(quotas.windows(2).all(|w| w[0] <= w[1]));
    assert!((quotas[quotas.len() - 1] - 1.0).abs() < 1e-6);

    session.notifier().flush();
    assert_eq!(conn.state(), ConnectionState::Finished);
    assert_eq!(conn.received_bytes_count(), body.len() as u64);
}

#[tokio::test]
async fn unknown_length_reports_unknown_quota() {
    let body = body();
    let base = common::http_server::start(body.clone());
    let session = curl_session(CurlOptions::default());
    let conn = session.connection(Request::get(format!("{}nolength", base)));
    let quotas = Arc::new(Mutex::new(Vec::new()));
    let q = Arc::clone(&quotas);
    conn.set_progress_handler(move |_chunk, quota| q.lock().unwrap().push(quota));
    let mut done = completion(&conn);

    conn.start().unwrap();
    let (outcome, buffer) = wait(&mut done).await;
    outcome.expect("transfer succeeds");
    assert_eq!(buffer.map(|b| b.len()), Some(body.len()));
    assert!(quotas.lock().unwrap().iter().all(|&q| q == UNKNOWN_QUOTA));
    assert_eq!(conn.expected_bytes_count(), None);
}

#[tokio::test]
async fn redirect_is_offered_and_followed() {
    let body = body();
    let base = common::http_server::start(body.clone());
    let session = curl_session(CurlOptions::default());
    let conn = session.connection(Request::get(format!("{}redirect", base)));

    let offered = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&offered);
    conn.set_redirect_handler(move |proposed, response| {
        o.lock().unwrap().push((proposed.url.clone(), response.status));
        Some(proposed)
    });
    let seen = responses(&conn);
    let mut done = completion(&conn);

    conn.start().unwrap();
    let (outcome, buffer) = wait(&mut done).await;
    outcome.expect("transfer succeeds");
    assert_eq!(buffer.as_deref(), Some(body.as_slice()));
    assert_eq!(*offered.lock().unwrap(), vec![(format!("{}body", base), 302)]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, 200);
    assert_eq!(seen[0].url, format!("{}body", base));
}

#[tokio::test]
async fn blocked_redirect_delivers_the_redirect_response() {
    let base = common::http_server::start(body());
    let session = curl_session(CurlOptions::default());
    let conn = session.connection(Request::get(format!("{}redirect", base)));
    conn.set_redirect_handler(|_proposed, _response| None);
    let seen = responses(&conn);
    let mut done = completion(&conn);

    conn.start().unwrap();
    let (outcome, _buffer) = wait(&mut done).await;
    outcome.expect("blocked redirect is not an error");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, 302);
    assert_eq!(seen[0].header("location"), Some("/body"));
    assert_eq!(conn.received_bytes_count(), 0);
}

#[tokio::test]
async fn redirect_loop_stops_at_the_limit() {
    let base = common::http_server::start(body());
    let session = curl_session(CurlOptions {
        max_redirections: 3,
        ..CurlOptions::default()
    });
    let conn = session.connection(Request::get(format!("{}loop", base)));
    let mut done = completion(&conn);

    conn.start().unwrap();
    let (outcome, _buffer) = wait(&mut done).await;
    assert!(matches!(outcome, Err(FetchError::TooManyRedirects(3))));
    session.notifier().flush();
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn refused_connection_fails_with_curl_error() {
    let session = curl_session(CurlOptions {
        connect_timeout: Duration::from_secs(2),
        ..CurlOptions::default()
    });
    let conn = session.connection(Request::get(common::http_server::refused_url()));
    let mut done = completion(&conn);

    conn.start().unwrap();
    let (outcome, buffer) = wait(&mut done).await;
    assert!(matches!(outcome, Err(FetchError::Curl(_))));
    assert!(buffer.is_none());
}

#[tokio::test]
async fn cancel_during_transfer() {
    let base = common::http_server::start(body());
    let session = curl_session(CurlOptions::default());
    let conn = session.connection(Request::get(format!("{}slow", base)));
    let (first_tx, mut first_rx) = unbounded_channel();
    conn.set_progress_handler(move |chunk, _quota| {
        let _ = first_tx.send(chunk.len());
    });
    let mut done = completion(&conn);

    conn.start().unwrap();
    timeout(WAIT, first_rx.recv()).await.unwrap().unwrap();
    assert!(conn.received_bytes_count() > 0);

    conn.cancel().unwrap();
    assert_eq!(conn.received_bytes_count(), 0);
    assert!(conn.buffered_data().is_none());
    let (outcome, _buffer) = wait(&mut done).await;
    assert!(matches!(outcome, Err(FetchError::Cancelled)));
    assert_eq!(conn.state(), ConnectionState::Cancelled);
}

#[tokio::test]
async fn queue_downloads_through_curl() {
    let body = body();
    let base = common::http_server::start(body.clone());
    let session = curl_session(CurlOptions::default());
    let queue = session.queue();
    queue.set_maximum_concurrent_connections(Some(2));

    let (tx, mut rx) = unbounded_channel();
    queue.set_did_finish_handler(move |conn, cancelled, error| {
        let _ = tx.send((conn.clone(), cancelled, error.is_some()));
    });
    let conns: Vec<Connection> = (0..4)
        .map(|_| session.connection(Request::get(format!("{}body", base))))
        .collect();
    queue.add_connections(&conns).unwrap();

    for _ in 0..4 {
        let (conn, cancelled, failed) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(!cancelled);
        assert!(!failed);
        assert_eq!(conn.received_bytes_count(), body.len() as u64);
    }
    assert!(queue.connections().is_empty());
}
