// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 传输层测试
//!
//! 在随机端口上启动完整的服务器，用原始 TCP 报文验证路由、压缩、HEAD/OPTIONS 与停机。

use std::fs;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use viewserver::{
    Config, Context, RenderContext, Request, Router, Server, Services, ViewOutcome,
};

struct Running {
    _dir: TempDir,
    _session: std::net::TcpListener,
    address: SocketAddr,
    server: Arc<Server>,
    handle: tokio::task::JoinHandle<()>,
}

async fn start() -> Running {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("views/shared")).unwrap();
    fs::create_dir_all(dir.path().join("static/css")).unwrap();
    fs::write(dir.path().join("views/index.html"), "<p>{[{ T \"welcome\" }]}, {[{ .data.who }]}</p>").unwrap();
    fs::write(dir.path().join("static/css/site.css"), "body { margin: 0; }\n".repeat(50)).unwrap();

    let session = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = Config::new()
        .with_root_dir(dir.path().to_string_lossy())
        .with_session_address(session.local_addr().unwrap().to_string());
    let services = Services::from_config(config, None);
    let home = Arc::new(|ctx: &Context, _: &Request| {
        let mut vd = RenderContext::new().with_translator(ctx.translator().cloned());
        vd.insert("who", json!("world"));
        ViewOutcome::new(vd, "views/index.html", "")
    });
    let router = Router::new()
        .route("/", services.mvc("index", home))
        .route("/clear", services.clear_cache_handler())
        .prefix("/static/", services.folder("static", "/static/"));
    let server = Arc::new(Server::new(services, router));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn(Arc::clone(&server).serve(listener));
    Running {
        _dir: dir,
        _session: session,
        address,
        server,
        handle,
    }
}

async fn send(address: SocketAddr, request: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

fn split(response: &[u8]) -> (String, Vec<u8>) {
    let end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    (
        String::from_utf8_lossy(&response[..end]).into_owned(),
        response[end + 4..].to_vec(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_renders_view() {
    let running = start().await;
    let response = send(
        running.address,
        "GET / HTTP/1.1\r\nHost: localhost\r\nAccept-Language: en-US,en;q=0.9\r\n\r\n",
    )
    .await;
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: text/html; charset=utf-8"));
    assert!(head.contains("Server: shaneyale-viewserver"));
    assert_eq!(String::from_utf8(body).unwrap(), "<p>Welcome, world</p>");
    running.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_static_file_is_compressed() {
    let running = start().await;
    let response = send(
        running.address,
        "GET /static/css/site.css HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: gzip\r\n\r\n",
    )
    .await;
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: text/css"));
    assert!(head.contains("Content-Encoding: gzip"));

    let mut decoded = String::new();
    GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, "body { margin: 0; }\n".repeat(50));
    assert_eq!(running.server.services().files.len(), 1);
    running.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_head_and_options() {
    let running = start().await;
    let response = send(running.address, "HEAD / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Length: "));
    assert!(body.is_empty());

    let response = send(running.address, "OPTIONS * HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let (head, _) = split(&response);
    assert!(head.starts_with("HTTP/1.1 204 No Content"));
    assert!(head.contains("Allow: GET, HEAD, OPTIONS, POST"));
    running.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_errors_at_transport() {
    let running = start().await;
    let response = send(running.address, "BREW /pot HTTP/1.1\r\n\r\n").await;
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400 Bad Request"));

    let response = send(running.address, "GET /nowhere HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 404 Not Found"));
    assert_eq!(body, b"Not Found\n");

    let response = send(running.address, "GET /static/none.css HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 404 Not Found"));
    running.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_cache_route() {
    let running = start().await;
    send(running.address, "GET /static/css/site.css HTTP/1.1\r\n\r\n").await;
    assert_eq!(running.server.services().files.len(), 1);

    let response = send(running.address, "GET /clear HTTP/1.1\r\n\r\n").await;
    let (_, body) = split(&response);
    assert_eq!(body, b"cache cleared\n");
    assert!(running.server.services().files.is_empty());
    running.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_accept_loop() {
    let running = start().await;
    running.server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(running.server.is_shutting_down());
    assert_eq!(running.server.active_connections(), 0);
}
