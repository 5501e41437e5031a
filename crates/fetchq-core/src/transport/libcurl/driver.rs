//! Curl multi event loop: commands in, perform/wait/messages, completions out.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use curl::easy::Easy2;
use curl::multi::{Easy2Handle, Multi};

use crate::error::FetchError;
use crate::request::Request;
use crate::transport::EventSink;

use super::handler::ExchangeHandler;
use super::{Command, CurlOptions};

const WAIT_MS: u64 = 50;

type Active = HashMap<u64, Easy2Handle<ExchangeHandler>>;

/// Runs until every `CurlTransport`/task handle is dropped and no transfer is left.
pub(super) fn run(commands: Receiver<Command>, options: CurlOptions) {
    let multi = Multi::new();
    let mut active: Active = HashMap::new();
    tracing::debug!("curl driver started");

    loop {
        if active.is_empty() {
            match commands.recv() {
                Ok(cmd) => apply(&multi, &mut active, cmd, &options),
                Err(_) => break,
            }
        }
        loop {
            match commands.try_recv() {
                Ok(cmd) => apply(&multi, &mut active, cmd, &options),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if active.is_empty() {
                        tracing::debug!("curl driver stopped");
                        return;
                    }
                    break;
                }
            }
        }
        if active.is_empty() {
            continue;
        }

        let running = match multi.perform() {
            Ok(n) => n,
            Err(e) => {
                fail_all(&multi, &mut active, FetchError::from(e));
                continue;
            }
        };

        let mut done: Vec<(u64, Result<(), curl::Error>)> = Vec::new();
        multi.messages(|msg| {
            for (id, handle) in active.iter() {
                if let Some(result) = msg.result_for2(handle) {
                    done.push((*id, result));
                    break;
                }
            }
        });
        for (id, result) in done {
            if let Some(handle) = active.remove(&id) {
                complete(&multi, &mut active, id, handle, result, &options);
            }
        }

        if running > 0 {
            if let Err(e) = multi.wait(&mut [], Duration::from_millis(WAIT_MS)) {
                tracing::warn!("curl multi wait: {}", e);
            }
        }
    }
    tracing::debug!("curl driver stopped");
}

fn apply(multi: &Multi, active: &mut Active, cmd: Command, options: &CurlOptions) {
    match cmd {
        Command::Start {
            id,
            request,
            events,
        } => start(multi, active, id, request, events, 0, options),
        Command::Cancel(id) => {
            if let Some(handle) = active.remove(&id) {
                if let Err(e) = multi.remove2(handle) {
                    tracing::warn!(exchange = id, "curl multi remove: {}", e);
                }
                tracing::debug!(exchange = id, "transfer cancelled");
            }
        }
    }
}

fn start(
    multi: &Multi,
    active: &mut Active,
    id: u64,
    request: Request,
    events: EventSink,
    redirects: u32,
    options: &CurlOptions,
) {
    let handler = ExchangeHandler::new(events.clone(), request.clone(), redirects);
    let added = build_easy(handler, &request, options)
        .map_err(FetchError::from)
        .and_then(|easy| multi.add2(easy).map_err(FetchError::from));
    match added {
        Ok(handle) => {
            tracing::debug!(exchange = id, connection = %events.connection_id(), url = %request.url, "transfer added");
            active.insert(id, handle);
        }
        Err(error) => events.fail(error),
    }
}

/// Configures an Easy2 handle for `request`: method, body, headers, timeouts.
fn build_easy(
    handler: ExchangeHandler,
    request: &Request,
    options: &CurlOptions,
) -> Result<Easy2<ExchangeHandler>, curl::Error> {
    let mut easy = Easy2::new(handler);
    easy.url(&request.url)?;
    easy.follow_location(false)?;

    let method = request.method.to_ascii_uppercase();
    match (&request.body, method.as_str()) {
        (Some(body), "POST") => easy.post_fields_copy(body)?,
        (Some(body), _) => {
            easy.post_fields_copy(body)?;
            easy.custom_request(&method)?;
        }
        (None, "GET") => easy.get(true)?,
        (None, "HEAD") => easy.nobody(true)?,
        (None, _) => easy.custom_request(&method)?,
    }

    if !request.headers.is_empty() {
        let mut list = curl::easy::List::new();
        for (k, v) in &request.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        easy.http_headers(list)?;
    }
    if let Some(agent) = &options.user_agent {
        easy.useragent(agent)?;
    }
    if let Some(sz) = options.buffer_size {
        easy.buffer_size(sz)?;
    }
    easy.connect_timeout(options.connect_timeout)?;
    easy.low_speed_limit(options.low_speed_limit)?;
    easy.low_speed_time(options.low_speed_time)?;
    Ok(easy)
}

/// Handles a finished transfer: restart on an accepted redirect, otherwise
/// report finish or failure.
fn complete(
    multi: &Multi,
    active: &mut Active,
    id: u64,
    handle: Easy2Handle<ExchangeHandler>,
    result: Result<(), curl::Error>,
    options: &CurlOptions,
) {
    let mut easy = match multi.remove2(handle) {
        Ok(easy) => easy,
        Err(e) => {
            tracing::warn!(exchange = id, "curl multi remove: {}", e);
            return;
        }
    };
    let handler = easy.get_mut();
    let events = handler.events.clone();

    if let Some(next) = handler.redirect_to.take() {
        let redirects = handler.redirects + 1;
        if redirects > options.max_redirections {
            events.fail(FetchError::TooManyRedirects(options.max_redirections));
            return;
        }
        start(multi, active, id, next, events, redirects, options);
        return;
    }

    match result {
        Ok(()) => {
            if !handler.responded {
                let code = easy.response_code().unwrap_or(0);
                events.response(crate::request::Response::new(easy.get_ref().request.url.clone(), code));
            }
            events.finish();
        }
        Err(e) => events.fail(FetchError::from(e)),
    }
}

fn fail_all(multi: &Multi, active: &mut Active, error: FetchError) {
    for (_, handle) in active.drain() {
        let events = handle.get_ref().events.clone();
        let _ = multi.remove2(handle);
        events.fail(error.clone());
    }
}
