use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;

use oecd_econ_data::client::{
    HttpResponse, OecdClient, OecdHttpClient, RetryPolicy, Transport, TransportError,
};
use oecd_econ_data::error::EconError;

struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    fallback: HttpResponse,
    calls: Mutex<usize>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<HttpResponse, TransportError>>, fallback: HttpResponse) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
    }
}

fn no_wait(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
    }
}

#[test]
fn server_errors_are_retried_until_success() {
    let transport = ScriptedTransport::new(
        vec![Ok(response(500, "boom")), Ok(response(503, "busy"))],
        response(200, "a,b\n1,2\n"),
    );
    let client = OecdHttpClient::with_transport(transport, no_wait(4));

    let body = client.fetch_csv("http://localhost/data").unwrap();

    assert_eq!(body, "a,b\n1,2\n");
    assert_eq!(client.transport().calls(), 3);
}

#[test]
fn not_found_fails_after_one_call() {
    let transport = ScriptedTransport::new(Vec::new(), response(404, "NoResultsFound"));
    let client = OecdHttpClient::with_transport(transport, no_wait(4));

    let err = client.fetch_csv("http://localhost/data").unwrap_err();

    assert_matches!(err, EconError::Fetch { status: Some(404), .. });
    assert_eq!(client.transport().calls(), 1);
}

#[test]
fn exhausted_retries_report_last_status() {
    let transport = ScriptedTransport::new(
        vec![Ok(response(500, "first"))],
        response(502, "bad gateway"),
    );
    let client = OecdHttpClient::with_transport(transport, no_wait(3));

    let err = client.fetch_csv("http://localhost/data").unwrap_err();

    assert_matches!(err, EconError::Fetch { status: Some(502), ref message } if message == "bad gateway");
    assert_eq!(client.transport().calls(), 3);
}

#[test]
fn timeouts_are_retried() {
    let transport = ScriptedTransport::new(
        vec![
            Err(TransportError::Timeout("timed out".to_string())),
            Err(TransportError::Network("connection reset".to_string())),
        ],
        response(200, "ok"),
    );
    let client = OecdHttpClient::with_transport(transport, no_wait(4));

    assert_eq!(client.fetch_csv("http://localhost/data").unwrap(), "ok");
    assert_eq!(client.transport().calls(), 3);
}

#[test]
fn timeout_on_last_attempt_has_no_status() {
    let transport = ScriptedTransport::new(
        vec![Err(TransportError::Timeout("timed out".to_string()))],
        response(200, "unreachable"),
    );
    let client = OecdHttpClient::with_transport(transport, no_wait(1));

    let err = client.fetch_csv("http://localhost/data").unwrap_err();

    assert_matches!(err, EconError::Fetch { status: None, .. });
    assert_eq!(client.transport().calls(), 1);
}
