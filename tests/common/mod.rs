//! A minimal stand-in for the etcd JSON gateway, serving prepared watch
//! streams over plain HTTP/1.1.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// What the gateway answers to a subscription starting at one revision.
#[derive(Debug, Clone)]
pub enum Route {
    /// `200 OK`, the lines, then the connection is closed
    Closing(Vec<String>),
    /// `200 OK`, the lines, then silence until the client goes away
    Open(Vec<String>),
    /// A non-200 answer with a body
    Status(u16, String),
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: Value,
}

impl CapturedRequest {
    pub fn start_revision(&self) -> i64 {
        self.body["create_request"]["start_revision"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(-1)
    }

    pub fn header(
        &self,
        name: &str,
    ) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

pub struct FakeGateway {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    task: JoinHandle<()>,
}

impl FakeGateway {
    /// Serves each route once, keyed by the requested start revision.
    pub async fn start(routes: Vec<(i64, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<Mutex<HashMap<i64, Route>>> =
            Arc::new(Mutex::new(routes.into_iter().collect()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn({
            let requests = requests.clone();
            async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    tokio::spawn(serve(socket, routes.clone(), requests.clone()));
                }
            }
        });

        FakeGateway {
            addr,
            requests,
            task,
        }
    }

    pub fn addr(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    routes: Arc<Mutex<HashMap<i64, Route>>>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
) {
    let Some(request) = read_request(&mut socket).await else {
        warn!("malformed request");
        return;
    };
    let start = request.start_revision();
    debug!(start, "subscription");
    requests.lock().push(request);

    let route = routes
        .lock()
        .remove(&start)
        .unwrap_or_else(|| Route::Status(404, format!("no route for {start}")));

    let (status, body, hold_open) = match route {
        Route::Closing(lines) => (200, lines, false),
        Route::Open(lines) => (200, lines, true),
        Route::Status(code, body) => (code, vec![body], false),
    };
    let head = format!(
        "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n"
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for line in body {
        if socket.write_all(format!("{line}\n").as_bytes()).await.is_err() {
            return;
        }
    }
    let _ = socket.flush().await;

    if hold_open {
        // Ends when the client drops the connection.
        let mut sink = [0u8; 64];
        while let Ok(n) = socket.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let len = head
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.trim()
                        .eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while buf.len() < end + 4 + len {
                let n = socket.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let body = serde_json::from_slice(&buf[end + 4..end + 4 + len]).ok()?;
            return Some(CapturedRequest { head, body });
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn b64(text: &str) -> String {
    STANDARD.encode(text)
}

/// A watch message carrying one PUT, in the gateway's encoding: int64 as
/// strings and the default event type omitted.
pub fn put_line(
    key: &str,
    value: &str,
    revision: i64,
) -> String {
    json!({
        "result": {
            "header": { "revision": revision.to_string() },
            "events": [{
                "kv": {
                    "key": b64(key),
                    "value": b64(value),
                    "mod_revision": revision.to_string(),
                    "version": "1"
                }
            }]
        }
    })
    .to_string()
}

/// A watch message carrying one DELETE with the key's previous value.
pub fn delete_line(
    key: &str,
    revision: i64,
    prev_value: &str,
    prev_revision: i64,
) -> String {
    json!({
        "result": {
            "header": { "revision": revision.to_string() },
            "events": [{
                "type": "DELETE",
                "kv": { "key": b64(key), "mod_revision": revision.to_string() },
                "prev_kv": {
                    "key": b64(key),
                    "value": b64(prev_value),
                    "mod_revision": prev_revision.to_string()
                }
            }]
        }
    })
    .to_string()
}

pub fn created_line() -> String {
    json!({ "result": { "header": { "revision": "1" }, "created": true } }).to_string()
}
