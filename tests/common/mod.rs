#![allow(dead_code)]

use liutech_chat::auth::{AuthGuard, Credentials, Navigator, RouteState};
use liutech_chat::config::{ServiceConfig, ServicesConfig};
use liutech_chat::storage::{KeyValueStore, MemoryStore};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const TOKEN: &str = "test-token";

/// One scripted HTTP response. Body parts are written with a short pause in
/// between so the client sees them as separate reads.
pub struct Scripted {
    pub status: &'static str,
    pub content_type: &'static str,
    pub parts: Vec<Vec<u8>>,
    /// Keep the connection open after the last part instead of closing it.
    pub hold_open: bool,
}

impl Scripted {
    pub fn sse(events: &[&str]) -> Self {
        Self {
            status: "200 OK",
            content_type: "text/event-stream",
            parts: events.iter().map(|e| e.as_bytes().to_vec()).collect(),
            hold_open: false,
        }
    }

    pub fn json(status: &'static str, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            parts: vec![body.as_bytes().to_vec()],
            hold_open: false,
        }
    }
}

/// Serves the scripted responses to consecutive connections and reports each
/// raw request on the returned channel. `None` when the sandbox forbids
/// binding a socket.
pub async fn serve(responses: Vec<Scripted>) -> Option<(String, mpsc::UnboundedReceiver<String>)> {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::PermissionDenied => return None,
        Err(err) => panic!("failed to bind local test listener: {err}"),
    };
    let addr = listener.local_addr().unwrap();
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let requests_tx = requests_tx.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let _ = requests_tx.send(request);

                let mut head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n",
                    response.status, response.content_type
                );
                if response.content_type != "text/event-stream" {
                    let len: usize = response.parts.iter().map(Vec::len).sum();
                    head.push_str(&format!("Content-Length: {len}\r\n"));
                }
                head.push_str("\r\n");
                let _ = socket.write_all(head.as_bytes()).await;

                for part in response.parts {
                    let _ = socket.write_all(&part).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                if response.hold_open {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    Some((format!("http://{addr}/ai"), requests_rx))
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        raw.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&raw);
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if raw.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&raw).into_owned()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<RouteState>,
    pub guard: AuthGuard,
}

impl Harness {
    pub fn logged_in() -> Self {
        let harness = Self::anonymous();
        harness.guard.credentials().set(TOKEN, Some("42"), Some("liu"));
        harness
    }

    pub fn anonymous() -> Self {
        let store = Arc::new(MemoryStore::new());
        let navigator = Arc::new(RouteState::new("/chat"));
        let credentials = Credentials::new(store.clone() as Arc<dyn KeyValueStore>);
        let guard = AuthGuard::new(credentials, navigator.clone() as Arc<dyn Navigator>);
        Self { store, navigator, guard }
    }

    pub fn route(&self) -> String {
        self.navigator.current_route()
    }
}

pub fn ai_config(base_url: &str) -> ServiceConfig {
    ServiceConfig {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        name: "AI service",
    }
}

/// Both services pointed at the same test server.
pub fn services(base_url: &str) -> ServicesConfig {
    ServicesConfig {
        main: ServiceConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            name: "main service",
        },
        ai: ai_config(base_url),
    }
}
