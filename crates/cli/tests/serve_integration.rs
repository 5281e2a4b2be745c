//! Integration tests for the `vnf-ledger serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port,
//! makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

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

/// A running server, killed when dropped.
struct Server {
    child: Child,
    port: u16,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

/// Start `vnf-ledger serve` with creator `creator` and backend `backend`.
fn start_server(extra_env: &[(&str, &str)]) -> Server {
    spawn_server(None, extra_env)
}

/// Like [`start_server`], reading the rest of the settings from `config`.
fn start_server_with_config(config: &std::path::Path) -> Server {
    spawn_server(Some(config), &[])
}

fn spawn_server(config: Option<&std::path::Path>, extra_env: &[(&str, &str)]) -> Server {
    let port = next_port();
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vnf-ledger"));
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    cmd.env("VNF_LEDGER_CREATOR", "creator")
        .env("VNF_LEDGER_BACKEND", "backend")
        .env("VNF_LEDGER_RATE_LIMIT", "10000")
        .env_remove("VNF_LEDGER_API_KEY")
        .env("RUST_LOG", "warn");
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    cmd.arg("serve").arg("--port").arg(port.to_string());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let child = cmd.spawn().expect("failed to start vnf-ledger serve");
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server { child, port }
}

/// Make an HTTP request and return (status, parsed JSON body).
fn request(
    server: &Server,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<serde_json::Value>,
) -> (u16, serde_json::Value) {
    let port = server.port;
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let body = body.map(|b| b.to_string()).unwrap_or_default();
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

    let (status, body) = parse_http_response(&response);
    let json = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn as_caller<'a>(caller: &'a str) -> [(&'static str, &'a str); 1] {
    [("X-Caller", caller)]
}

fn parse_http_response(response: &str) -> (u16, String) {
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

    let body = if headers
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked")
    {
        decode_chunked(&body)
    } else {
        body
    };
    (status, body)
}

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

/// Register `who` through the backend.
fn register(server: &Server, who: &str) {
    let (status, _) = request(
        server,
        "POST",
        "/registrations/confirm",
        &as_caller("backend"),
        Some(serde_json::json!({ "identity": who, "success": true })),
    );
    assert_eq!(status, 200);
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn health_reports_backend() {
    let server = start_server(&[]);
    let (status, json) = request(&server, "GET", "/health", &[], None);
    assert_eq!(status, 200);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "backend");
}

#[test]
fn missing_caller_is_401() {
    let server = start_server(&[]);
    let (status, json) = request(
        &server,
        "POST",
        "/resources",
        &[],
        Some(serde_json::json!({ "template_id": "tplA" })),
    );
    assert_eq!(status, 401);
    assert_eq!(json["code"], "unauthenticated");
}

#[test]
fn deploy_and_delete_round_trip() {
    let server = start_server(&[]);
    register(&server, "U");

    let (status, json) = request(
        &server,
        "POST",
        "/resources",
        &as_caller("U"),
        Some(serde_json::json!({ "template_id": "tplA", "parameters": "cpu=2" })),
    );
    assert_eq!(status, 202);
    assert_eq!(json["event"]["type"], "DeployRequested");
    assert_eq!(json["event"]["correlation_id"], 1);

    let (status, json) = request(
        &server,
        "POST",
        "/resources/1/deployment",
        &as_caller("backend"),
        Some(serde_json::json!({ "owner": "U", "success": true, "external_id": "vnf-77" })),
    );
    assert_eq!(status, 200);
    assert_eq!(json["event"]["type"], "DeploymentStatus");

    let (status, json) = request(&server, "GET", "/resources/1", &as_caller("U"), None);
    assert_eq!(status, 200);
    assert_eq!(json["state"], "deployed");
    assert_eq!(json["external_id"], "vnf-77");

    let (status, json) = request(&server, "DELETE", "/resources/1", &as_caller("U"), None);
    assert_eq!(status, 202);
    assert_eq!(json["event"]["external_id"], "vnf-77");

    let (status, _) = request(
        &server,
        "POST",
        "/resources/1/deletion",
        &as_caller("backend"),
        Some(serde_json::json!({ "owner": "U", "success": true })),
    );
    assert_eq!(status, 200);

    let (status, json) = request(&server, "GET", "/resources", &as_caller("U"), None);
    assert_eq!(status, 200);
    assert_eq!(json["resources"], serde_json::json!([]));

    let (status, json) = request(&server, "GET", "/resources/1", &as_caller("U"), None);
    assert_eq!(status, 404);
    assert_eq!(json["code"], "not_found");

    let (status, json) = request(
        &server,
        "GET",
        "/events?after=0&limit=10",
        &as_caller("backend"),
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(json["events"].as_array().map(Vec::len), Some(5));
    assert_eq!(json["next"], 5);
}

#[test]
fn errors_map_to_status_codes() {
    let server = start_server(&[]);
    register(&server, "U");
    register(&server, "V");

    // Unregistered caller.
    let (status, json) = request(
        &server,
        "POST",
        "/resources",
        &as_caller("stranger"),
        Some(serde_json::json!({ "template_id": "tplA" })),
    );
    assert_eq!(status, 403);
    assert_eq!(json["code"], "not_registered");
    assert_eq!(json["retryable"], true);

    // Non-backend confirm.
    let (status, json) = request(
        &server,
        "POST",
        "/registrations/confirm",
        &as_caller("U"),
        Some(serde_json::json!({ "identity": "U", "success": true })),
    );
    assert_eq!(status, 401);
    assert_eq!(json["code"], "unauthorized");

    // Empty template id.
    let (status, json) = request(
        &server,
        "POST",
        "/resources",
        &as_caller("U"),
        Some(serde_json::json!({ "template_id": "" })),
    );
    assert_eq!(status, 400);
    assert_eq!(json["code"], "invalid_input");

    // Delete before deployment is a conflict.
    request(
        &server,
        "POST",
        "/resources",
        &as_caller("U"),
        Some(serde_json::json!({ "template_id": "tplA" })),
    );
    let (status, json) = request(&server, "DELETE", "/resources/1", &as_caller("U"), None);
    assert_eq!(status, 409);
    assert_eq!(json["code"], "invalid_state");

    // Another owner's resource.
    let (status, json) = request(&server, "DELETE", "/resources/1", &as_caller("V"), None);
    assert_eq!(status, 403);
    assert_eq!(json["code"], "forbidden");

    // Unparseable id.
    let (status, _) = request(&server, "GET", "/resources/abc", &as_caller("U"), None);
    assert_eq!(status, 400);
}

#[test]
fn registration_flag_and_backend_rotation() {
    let server = start_server(&[]);

    let (status, json) = request(
        &server,
        "POST",
        "/registrations",
        &as_caller("U"),
        Some(serde_json::json!({ "proof": "sig" })),
    );
    assert_eq!(status, 202);
    assert_eq!(json["event"]["type"], "RegistrationRequested");

    let (_, json) = request(&server, "GET", "/registrations/U", &[], None);
    assert_eq!(json["registered"], false);

    register(&server, "U");
    let (_, json) = request(&server, "GET", "/registrations/U", &[], None);
    assert_eq!(json["registered"], true);

    let (status, _) = request(
        &server,
        "POST",
        "/backend",
        &as_caller("U"),
        Some(serde_json::json!({ "backend": "U" })),
    );
    assert_eq!(status, 401);

    let (status, json) = request(
        &server,
        "POST",
        "/backend",
        &as_caller("creator"),
        Some(serde_json::json!({ "backend": "backend-2" })),
    );
    assert_eq!(status, 200);
    assert_eq!(json["backend"], "backend-2");

    let (status, _) = request(
        &server,
        "POST",
        "/unregistrations/confirm",
        &as_caller("backend"),
        Some(serde_json::json!({ "identity": "U", "success": true })),
    );
    assert_eq!(status, 401);
}

#[test]
fn api_key_gates_everything_but_health() {
    let server = start_server(&[("VNF_LEDGER_API_KEY", "hunter2")]);

    let (status, _) = request(&server, "GET", "/health", &[], None);
    assert_eq!(status, 200);

    let (status, _) = request(&server, "GET", "/events", &[], None);
    assert_eq!(status, 401);

    let (status, _) = request(&server, "GET", "/events", &[("X-API-Key", "wrong")], None);
    assert_eq!(status, 403);

    let (status, _) = request(
        &server,
        "GET",
        "/events",
        &[("Authorization", "Bearer hunter2"), ("X-Caller", "backend")],
        None,
    );
    assert_eq!(status, 200);
}

#[test]
fn events_are_scoped_to_the_caller() {
    let server = start_server(&[]);
    request(
        &server,
        "POST",
        "/registrations",
        &as_caller("U"),
        Some(serde_json::json!({ "proof": "secret-proof" })),
    );
    register(&server, "U");
    register(&server, "V");
    request(
        &server,
        "POST",
        "/resources",
        &as_caller("U"),
        Some(serde_json::json!({ "template_id": "tplA", "parameters": "password=hunter2" })),
    );

    let (status, json) = request(&server, "GET", "/events", &[], None);
    assert_eq!(status, 401);
    assert_eq!(json["code"], "unauthenticated");

    let (status, json) = request(&server, "GET", "/events", &as_caller("V"), None);
    assert_eq!(status, 200);
    let events = json["events"].as_array().cloned().unwrap_or_default();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"]["identity"], "V");
    assert!(!json.to_string().contains("hunter2"));
    assert!(!json.to_string().contains("secret-proof"));

    let (_, json) = request(&server, "GET", "/events", &as_caller("U"), None);
    assert_eq!(json["events"].as_array().map(Vec::len), Some(3));
}

#[test]
fn backend_only_journal_rejects_owners() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("ledger.toml");
    std::fs::write(
        &config,
        "creator = \"creator\"\nlisting_policy = \"backend_only\"\n",
    )
    .unwrap();
    let server = start_server_with_config(&config);
    register(&server, "U");

    let (status, json) = request(&server, "GET", "/events", &as_caller("U"), None);
    assert_eq!(status, 401);
    assert_eq!(json["code"], "unauthorized");

    let (status, json) = request(&server, "GET", "/events", &as_caller("backend"), None);
    assert_eq!(status, 200);
    assert_eq!(json["events"].as_array().map(Vec::len), Some(1));
}

#[test]
fn unknown_route_returns_404() {
    let server = start_server(&[]);
    let (status, json) = request(&server, "GET", "/nope", &[], None);
    assert_eq!(status, 404);
    assert_eq!(json["code"], "not_found");
}
