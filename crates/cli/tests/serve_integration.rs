//! Integration tests for the `customs-sync serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with an
//! in-memory store, makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

const SECRET: &str = "s3cret";

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so parallel test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// A rates URL nobody is listening on.
fn closed_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/rates")
}

/// Helper: start the server on the given port.
fn start_server(port: u16, secret: Option<&str>) -> Child {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_customs-sync"));
    cmd.args(["--database-url", "memory", "serve", "--port"])
        .arg(port.to_string())
        .env_remove("CUSTOMS_SYNC_DOCUMENTS_URL")
        .env("CUSTOMS_SYNC_RATES_URL", closed_url());
    match secret {
        Some(s) => cmd.env("CUSTOMS_SYNC_SECRET", s),
        None => cmd.env_remove("CUSTOMS_SYNC_SECRET"),
    };
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().expect("failed to start customs-sync serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            return child;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    child
}

fn stop(mut child: Child) {
    child.kill().ok();
    child.wait().ok();
}

/// Helper: send a request and return (status, headers, body).
fn request(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, String, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let body = body.unwrap_or("");
    if !body.is_empty() {
        header_lines.push_str("Content-Type: application/json\r\n");
    }

    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        port,
        header_lines,
        body.len(),
        body
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

fn get(port: u16, path: &str) -> (u16, String) {
    let (status, _, body) = request(port, "GET", path, &[], None);
    (status, body)
}

fn post(port: u16, path: &str, body: Option<&str>) -> (u16, String) {
    let (status, _, body) = request(port, "POST", path, &[], body);
    (status, body)
}

/// Parse an HTTP response into (status_code, headers_string, body).
fn parse_http_response(response: &str) -> (u16, String, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status = headers
        .lines()
        .next()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };

    (status, headers, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = remaining.get(chunk_end + 2..).unwrap_or("");
    }

    result
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON ({e}): {body}"))
}

// ──────────────────────────────────────────────
// Health and auth
// ──────────────────────────────────────────────

#[test]
fn health_is_open_even_with_a_secret() {
    let port = next_port();
    let child = start_server(port, Some(SECRET));
    let (status, body) = get(port, "/health");
    stop(child);

    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["status"], "ok");
    assert!(body.get("version").is_some());
}

#[test]
fn triggers_require_the_secret() {
    let port = next_port();
    let child = start_server(port, Some(SECRET));

    let (missing, missing_body) = post(port, "/backfill/summaries", None);
    let (wrong, _) = post(port, "/backfill/summaries?secret=nope", None);
    let auth = format!("Bearer {SECRET}");
    let (bearer, _, _) = request(
        port,
        "POST",
        "/backfill/summaries",
        &[("Authorization", auth.as_str())],
        None,
    );
    let (query, _) = post(port, &format!("/backfill/summaries?secret={SECRET}"), None);
    stop(child);

    assert_eq!(missing, 401);
    assert!(json(&missing_body).get("error").is_some());
    assert_eq!(wrong, 401);
    assert_eq!(bearer, 200);
    assert_eq!(query, 200);
}

#[test]
fn unknown_route_returns_json_404() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, body) = get(port, "/nope");
    stop(child);

    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "not found");
}

// ──────────────────────────────────────────────
// Rates
// ──────────────────────────────────────────────

#[test]
fn invalid_sync_type_is_400() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, body) = post(port, "/sync/rates?type=weekly", None);
    stop(child);

    assert_eq!(status, 400);
    let body = json(&body);
    assert_eq!(body["success"], false);
    assert_eq!(body["totalSynced"], 0);
}

#[test]
fn audit_streams_ndjson() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, headers, body) = request(
        port,
        "GET",
        "/audit/rates?from=2025-03-01&to=2025-03-01",
        &[],
        None,
    );
    stop(child);

    assert_eq!(status, 200);
    assert!(headers.to_lowercase().contains("application/x-ndjson"));
    let types: Vec<String> = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| json(l)["type"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(types, vec!["start", "error", "progress", "done"]);
}

#[test]
fn audit_needs_both_dates() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, body) = get(port, "/audit/rates?from=2025-03-01");
    stop(child);

    assert_eq!(status, 400);
    assert!(json(&body)["error"].as_str().unwrap().contains("to"));
}

#[test]
fn stored_rates_for_an_empty_day() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, body) = get(port, "/exchange-rates?date=2025-03-01");
    let (bad, _) = get(port, "/exchange-rates?date=yesterday");
    stop(child);

    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["date"], "2025-03-01");
    assert_eq!(body["rates"].as_array().map(Vec::len), Some(0));
    assert_eq!(bad, 400);
}

// ──────────────────────────────────────────────
// Summaries and jobs
// ──────────────────────────────────────────────

#[test]
fn backfill_page_on_empty_store() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, body) = post(port, "/backfill/summaries?batchSize=0", None);
    stop(child);

    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["processed"], 0);
    assert_eq!(body["updated"], 0);
    assert_eq!(body["done"], true);
    assert!(body["nextCursor"].is_null());
    assert_eq!(body["batchSize"], 1);
}

#[test]
fn unknown_job_is_404() {
    let port = next_port();
    let child = start_server(port, None);
    let (get_status, _) = get(port, "/sync-jobs/99");
    let (cancel_status, cancel_body) = post(port, "/sync-jobs/99/cancel", None);
    stop(child);

    assert_eq!(get_status, 404);
    assert_eq!(cancel_status, 404);
    assert!(json(&cancel_body).get("error").is_some());
}

#[test]
fn job_creation_without_document_source_is_503() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, body) = post(
        port,
        "/companies/7/sync-jobs",
        Some(r#"{"dateFrom":"2023-01-01","dateTo":"2023-01-10"}"#),
    );
    let (bad_date, _) = post(
        port,
        "/companies/7/sync-jobs",
        Some(r#"{"dateFrom":"2023-01-01","dateTo":"soon"}"#),
    );
    stop(child);

    assert_eq!(status, 503);
    assert!(json(&body)["error"]
        .as_str()
        .unwrap()
        .contains("documents.base_url"));
    assert_eq!(bad_date, 400);
}

#[test]
fn company_stats_start_empty() {
    let port = next_port();
    let child = start_server(port, None);
    let (status, body) = get(port, "/companies/7/stats");
    stop(child);

    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["companyId"], 7);
    assert_eq!(body["stats"]["total"], 0);
}
