use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pebble::auth::{AuthDecision, Authenticator};
use pebble::config::{Config, HandlerConfig};
use pebble::error::HttpError;
use pebble::handler::{Handler, ResponseWriter};
use pebble::http::request::Request;
use pebble::http::writer::FlushOutcome;
use pebble::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;

struct Greeter;

#[async_trait]
impl Handler for Greeter {
    async fn process(
        &self,
        request: &mut Request,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), HttpError> {
        let name = request.form_value("name").unwrap_or("stranger").to_string();
        response.set_content_type("text/plain")?;
        response.write_str(&format!("hello {name}"));
        Ok(())
    }
}

/// Sends `count` numbered lines, flushing after each one.
struct Ticker {
    count: usize,
    line_len: usize,
    sent: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for Ticker {
    async fn process(
        &self,
        _request: &mut Request,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), HttpError> {
        response.set_content_type("text/plain")?;
        for i in 0..self.count {
            if !response.is_client_connected() {
                break;
            }
            let mut line = format!("tick {i}");
            line.push_str(&".".repeat(self.line_len.saturating_sub(line.len() + 1)));
            line.push('\n');
            response.write_str(&line);
            if response.flush().await? == FlushOutcome::Disconnected {
                break;
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Flushes a first piece, then fails.
struct Faulty;

#[async_trait]
impl Handler for Faulty {
    async fn process(
        &self,
        _request: &mut Request,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), HttpError> {
        response.write_str("partial");
        response.flush().await?;
        Err(HttpError::internal("backend went away"))
    }
}

struct Locked;

impl Authenticator for Locked {
    fn authenticate(&self, request: &Request) -> AuthDecision {
        if request.path.starts_with("/private") {
            AuthDecision::Deny {
                challenge: Some("Basic realm=\"pebble\"".to_string()),
            }
        } else {
            AuthDecision::Allow
        }
    }
}

struct Running {
    addr: SocketAddr,
    ticks: Arc<AtomicUsize>,
    stop: Option<oneshot::Sender<()>>,
    _dir: tempfile::TempDir,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

fn site(dir: &Path) {
    let www = dir.join("www");
    std::fs::create_dir_all(&www).unwrap();
    std::fs::write(www.join("index.html"), "<h1>home</h1>").unwrap();
    std::fs::write(www.join("notes.txt"), "plain notes").unwrap();

    let errors = dir.join("errors");
    std::fs::create_dir_all(&errors).unwrap();
    std::fs::write(errors.join("404.htm"), "custom missing page").unwrap();
}

fn mapping(verb: &str, path: &str, handler: &str) -> HandlerConfig {
    HandlerConfig {
        verb: verb.to_string(),
        path: path.to_string(),
        handler: handler.to_string(),
    }
}

async fn start(tweak: impl FnOnce(&mut Config)) -> Running {
    let dir = tempfile::tempdir().unwrap();
    site(dir.path());

    let mut cfg = Config {
        document_root: dir.path().join("www"),
        temp_root: dir.path().to_path_buf(),
        custom_error_folder: Some(dir.path().join("errors")),
        max_request_length_bytes: 64 * 1024,
        handlers: vec![
            HandlerConfig {
                verb: "POST".to_string(),
                path: "^/greet$".to_string(),
                handler: "greeter".to_string(),
            },
            mapping("GET", "^/ticks$", "ticker"),
            mapping("GET", "^/flood$", "flood"),
            mapping("GET", "^/faulty$", "faulty"),
            HandlerConfig {
                verb: "GET, HEAD".to_string(),
                path: "^/.*$".to_string(),
                handler: "static".to_string(),
            },
        ],
        ..Config::default()
    };
    tweak(&mut cfg);

    let server = Server::new(cfg).unwrap().with_authenticator(Locked);
    let handlers = server.handlers();
    handlers.register("greeter", |_| Arc::new(Greeter) as Arc<dyn Handler>);
    handlers.register("faulty", |_| Arc::new(Faulty) as Arc<dyn Handler>);

    let ticks = Arc::new(AtomicUsize::new(0));
    let sent = ticks.clone();
    handlers.register("ticker", move |_| {
        Arc::new(Ticker {
            count: 5,
            line_len: 0,
            sent: sent.clone(),
        }) as Arc<dyn Handler>
    });
    let sent = ticks.clone();
    handlers.register("flood", move |_| {
        Arc::new(Ticker {
            count: 10_000,
            line_len: 1024,
            sent: sent.clone(),
        }) as Arc<dyn Handler>
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.serve(listener, async move {
        let _ = stopped.await;
    }));

    Running {
        addr,
        ticks,
        stop: Some(stop),
        _dir: dir,
    }
}

async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_all(&mut stream).await
}

async fn read_all(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

#[tokio::test]
async fn test_static_file_is_served() {
    let server = start(|_| {}).await;
    let response = exchange(server.addr, b"GET /notes.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(response.contains("Content-Length: 11\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert_eq!(body_of(&response), "plain notes");
}

#[tokio::test]
async fn test_directory_serves_index() {
    let server = start(|_| {}).await;
    let response = exchange(server.addr, b"GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(body_of(&response), "<h1>home</h1>");
}

#[tokio::test]
async fn test_head_has_headers_only() {
    let server = start(|_| {}).await;
    let response = exchange(server.addr, b"HEAD /notes.txt HTTP/1.1\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 11\r\n"));
    assert_eq!(body_of(&response), "");
}

#[tokio::test]
async fn test_missing_file_uses_custom_error_page() {
    let server = start(|_| {}).await;
    let response = exchange(server.addr, b"GET /nope.html HTTP/1.1\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body_of(&response), "custom missing page");
}

#[tokio::test]
async fn test_builtin_error_page_without_override() {
    let server = start(|_| {}).await;
    let response = exchange(server.addr, b"DELETE /notes.txt HTTP/1.1\r\n\r\n").await;

    // no mapping accepts DELETE
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    let server = start(|cfg| cfg.custom_error_folder = None).await;
    let response = exchange(server.addr, b"GET /nope HTTP/1.1\r\n\r\n").await;
    assert!(body_of(&response).contains("404"));
    assert!(body_of(&response).contains("/nope"));
}

#[tokio::test]
async fn test_form_post_reaches_handler() {
    let server = start(|_| {}).await;
    let response = exchange(
        server.addr,
        b"POST /greet HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 13\r\n\r\nname=Ada+King",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&response), "hello Ada King");
}

#[tokio::test]
async fn test_oversize_request_is_refused() {
    let server = start(|cfg| cfg.max_request_length_bytes = 200).await;
    let response = exchange(
        server.addr,
        b"POST /greet HTTP/1.1\r\nContent-Length: 5000\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
}

#[tokio::test]
async fn test_malformed_request_line() {
    let server = start(|_| {}).await;
    let response = exchange(server.addr, b"NONSENSE\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn test_denied_request_gets_challenge() {
    let server = start(|_| {}).await;
    let response = exchange(server.addr, b"GET /private/x HTTP/1.1\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
    assert!(response.contains("WWW-Authenticate: Basic realm=\"pebble\"\r\n"));
}

#[tokio::test]
async fn test_keep_alive_serves_pipelined_requests() {
    let server = start(|cfg| cfg.keep_alive = true).await;
    let response = exchange(
        server.addr,
        b"GET /notes.txt HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert!(response.contains("Connection: keep-alive\r\n"));
    assert!(response.ends_with("<h1>home</h1>"));
}

#[tokio::test]
async fn test_handler_streams_chunks_over_keep_alive() {
    let server = start(|cfg| cfg.keep_alive = true).await;
    let response = exchange(
        server.addr,
        b"GET /ticks HTTP/1.1\r\n\r\nGET /notes.txt HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert!(response.contains("Transfer-Encoding: chunked\r\n"));
    assert!(response.contains("\r\n\r\n7\r\ntick 0\n\r\n7\r\ntick 1\n\r\n"));
    assert!(response.contains("7\r\ntick 4\n\r\n0\r\n\r\nHTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("plain notes"));
    assert_eq!(server.ticks.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_streaming_stops_when_client_leaves() {
    let server = start(|_| {}).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET /flood HTTP/1.1\r\n\r\n").await.unwrap();

    let mut first = [0u8; 4096];
    stream.read_exact(&mut first).await.unwrap();
    assert!(first.starts_with(b"HTTP/1.1 200 OK\r\n"));
    drop(stream);

    // wait for the handler to settle
    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let before = server.ticks.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            let after = server.ticks.load(Ordering::SeqCst);
            if before == after {
                return after;
            }
        }
    })
    .await
    .unwrap();
    assert!(settled < 10_000, "handler kept streaming: {settled} ticks");
}

#[tokio::test]
async fn test_handler_failure_after_flush_closes_connection() {
    let server = start(|cfg| cfg.keep_alive = true).await;
    let response = exchange(
        server.addr,
        b"GET /faulty HTTP/1.1\r\n\r\nGET /notes.txt HTTP/1.1\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(response.matches("HTTP/1.1 ").count(), 1);
    assert!(response.ends_with("\r\n\r\n7\r\npartial\r\n"));
}

#[tokio::test]
async fn test_connection_cap_rejects_new_peer() {
    let server = start(|cfg| cfg.max_connections = 1).await;

    // first peer holds its slot with an unfinished request
    let mut first = TcpStream::connect(server.addr).await.unwrap();
    first.write_all(b"GET /notes.txt HTTP/1.1\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.2:0".parse().unwrap()).unwrap();
    let mut second = socket.connect(server.addr).await.unwrap();
    let rejected = read_all(&mut second).await;
    assert!(rejected.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(rejected.contains("Maximum Connections Exceeded"));

    // the same peer may open another connection
    let again = exchange(server.addr, b"GET /notes.txt HTTP/1.1\r\n\r\n").await;
    assert!(again.starts_with("HTTP/1.1 200 OK\r\n"));

    first.write_all(b"\r\n").await.unwrap();
    let finished = read_all(&mut first).await;
    assert!(finished.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn test_rejected_peer_with_pending_upload_still_reads_403() {
    let server = start(|cfg| cfg.max_connections = 1).await;

    let mut first = TcpStream::connect(server.addr).await.unwrap();
    first.write_all(b"GET /notes.txt HTTP/1.1\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.2:0".parse().unwrap()).unwrap();
    let mut second = socket.connect(server.addr).await.unwrap();
    let mut upload = b"POST /greet HTTP/1.1\r\nContent-Length: 262144\r\n\r\n".to_vec();
    upload.extend(std::iter::repeat_n(b'u', 262_144));
    second.write_all(&upload).await.unwrap();

    let rejected = read_all(&mut second).await;
    assert!(rejected.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(rejected.ends_with("</html>"));
}

#[tokio::test]
async fn test_tls_without_secure_acceptor_fails() {
    let cfg = Config {
        tls: true,
        ..Config::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = Server::new(cfg)
        .unwrap()
        .serve(listener, std::future::pending())
        .await;
    assert!(result.is_err());
}
