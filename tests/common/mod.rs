//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Request, http::HeaderMap, response::IntoResponse, Router};
use tokio::net::TcpListener;

use switchyard::{HttpForwarder, HttpServer, ReverseProxy, Shutdown};

/// Start a backend answering `"<name> <path?query>"`, echoing the Host and
/// X-Forwarded-For it received as `x-seen-host` / `x-seen-forwarded-for`.
pub async fn start_mock_backend(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |request: Request| async move {
        let mut headers = HeaderMap::new();
        for (seen, original) in [("x-seen-host", "host"), ("x-seen-forwarded-for", "x-forwarded-for")] {
            if let Some(value) = request.headers().get(original) {
                headers.insert(seen, value.clone());
            }
        }
        (headers, format!("{} {}", name, request.uri())).into_response()
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
#[allow(dead_code)]
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Serve `proxy` on an ephemeral port.
pub async fn spawn_proxy(proxy: Arc<ReverseProxy>) -> (SocketAddr, Shutdown) {
    let server = HttpServer::new(
        proxy,
        Arc::new(HttpForwarder::new(Duration::from_secs(1), true)),
        Duration::from_secs(5),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, signal).await.unwrap();
    });
    (addr, shutdown)
}

/// GET `path` from the proxy with the given Host header.
pub async fn get(proxy: SocketAddr, host: &str, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{}{}", proxy, path))
        .header("host", host)
        .send()
        .await
        .unwrap()
}
