//! Runs the proxy on a real socket in front of a mock origin.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use tandem_proxy::net::{Listener, ListenerError, ProxyServer};
use tandem_proxy::{ProxyConfig, Shutdown};

mod common;

struct RunningProxy {
    addr: SocketAddr,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), ListenerError>>,
}

async fn start_proxy(origin: SocketAddr) -> RunningProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.target.host = "127.0.0.1".to_string();
    config.target.port = origin.port();
    config.timeouts.socket_secs = 5;
    config.timeouts.shutdown_grace_secs = 1;

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = ProxyServer::new(&config);
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));
    RunningProxy { addr, shutdown, task }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Reads one `Content-Length` delimited response; returns head and body.
async fn read_response(socket: &mut TcpStream, pending: &mut Vec<u8>) -> (String, Vec<u8>) {
    let mut buf = [0u8; 8192];
    loop {
        if let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&pending[..end + 4]).to_string();
            let length: usize = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().unwrap())
                })
                .unwrap_or(0);
            while pending.len() < end + 4 + length {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed inside response body");
                pending.extend_from_slice(&buf[..n]);
            }
            let body = pending[end + 4..end + 4 + length].to_vec();
            pending.drain(..end + 4 + length);
            return (head, body);
        }
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before response head");
        pending.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn get_is_forwarded_with_rewritten_headers() {
    let (origin, log) = common::start_echo_origin().await;
    let proxy = start_proxy(origin).await;

    let response = client()
        .get(format!("http://{}/status", proxy.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-origin"], "echo");
    assert!(response.headers()["server"].to_str().unwrap().starts_with("tandem-proxy/"));
    assert!(response.headers().contains_key("date"));
    assert_eq!(response.text().await.unwrap(), "hello from origin");

    let heads = log.heads.lock().unwrap().clone();
    assert_eq!(heads.len(), 1);
    let head = heads[0].to_ascii_lowercase();
    assert!(head.starts_with("get /status http/1.1\r\n"));
    assert!(head.contains(&format!("host: 127.0.0.1:{}", origin.port())));
    assert!(head.contains("user-agent: tandem-proxy/"));
    assert!(head.contains("connection: keep-alive"));
}

#[tokio::test]
async fn large_body_streams_both_ways() {
    let (origin, _log) = common::start_echo_origin().await;
    let proxy = start_proxy(origin).await;

    let mut rng = fastrand::Rng::with_seed(42);
    let upload: Vec<u8> = (0..200_000).map(|_| rng.u8(..)).collect();
    let response = client()
        .post(format!("http://{}/upload", proxy.addr))
        .body(upload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-length"], "200000");
    assert_eq!(response.bytes().await.unwrap().as_ref(), upload.as_slice());
}

#[tokio::test]
async fn chunked_origin_response_reaches_client() {
    let (origin, _log) = common::start_echo_origin().await;
    let proxy = start_proxy(origin).await;

    let upload = vec![b'z'; 5_500];
    let response = client()
        .post(format!("http://{}/chunked", proxy.addr))
        .body(upload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["transfer-encoding"], "chunked");
    assert_eq!(response.bytes().await.unwrap().as_ref(), upload.as_slice());
}

#[tokio::test]
async fn keep_alive_reuses_one_origin_connection() {
    let (origin, log) = common::start_echo_origin().await;
    let proxy = start_proxy(origin).await;

    let mut socket = TcpStream::connect(proxy.addr).await.unwrap();
    let mut pending = Vec::new();
    for round in 0..3 {
        let body = format!("round-{round}");
        let request = format!(
            "POST /echo HTTP/1.1\r\nHost: proxy\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(request.as_bytes()).await.unwrap();
        let (head, echoed) = read_response(&mut socket, &mut pending).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "unexpected head: {head}");
        assert_eq!(echoed, body.as_bytes());
    }

    assert_eq!(log.connections.load(Ordering::SeqCst), 1);
    assert_eq!(log.heads.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_request_gets_bad_request_and_close() {
    let (origin, log) = common::start_echo_origin().await;
    let proxy = start_proxy(origin).await;

    let mut socket = TcpStream::connect(proxy.addr).await.unwrap();
    socket.write_all(b"NOT-HTTP\r\n\r\n").await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    let reply = String::from_utf8_lossy(&reply).to_string();
    assert!(reply.starts_with("HTTP/1.0 400 Bad Request\r\n"), "unexpected reply: {reply}");
    assert!(reply.to_ascii_lowercase().contains("connection: close"));
    assert!(log.heads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_stops_the_server() {
    let (origin, _log) = common::start_echo_origin().await;
    let proxy = start_proxy(origin).await;

    let response = client().get(format!("http://{}/", proxy.addr)).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "hello from origin");

    assert!(proxy.shutdown.trigger());
    let result = tokio::time::timeout(Duration::from_secs(5), proxy.task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(TcpStream::connect(proxy.addr).await.is_err());
}
