//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::Router;
use edge_proxy::lifecycle::Shutdown;
use edge_proxy::net::Listener;
use edge_proxy::ProxyServer;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// What a mock upstream saw.
#[derive(Clone, Default)]
pub struct Calls {
    count: Arc<AtomicUsize>,
    hosts: Arc<Mutex<Vec<String>>>,
    paths: Arc<Mutex<Vec<String>>>,
}

impl Calls {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

/// Start an upstream that answers every request with `body` and records it.
/// Returns the upstream's base URL.
pub async fn start_mock_upstream(body: &'static str) -> (String, Calls) {
    let calls = Calls::default();
    let app = Router::new()
        .fallback(move |State(calls): State<Calls>, uri: Uri, headers: HeaderMap| async move {
            calls.count.fetch_add(1, Ordering::SeqCst);
            if let Some(host) = headers.get("host").and_then(|h| h.to_str().ok()) {
                calls.hosts.lock().unwrap().push(host.to_owned());
            }
            calls.paths.lock().unwrap().push(uri.to_string());
            body
        })
        .with_state(calls.clone());
    (serve(app).await, calls)
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

/// Start an upstream that answers `<method> <body>` with the request body it
/// received.
pub async fn start_echo_upstream() -> String {
    let app = Router::new().fallback(|method: Method, body: Bytes| async move {
        let mut reply = format!("{method} ").into_bytes();
        reply.extend_from_slice(&body);
        reply
    });
    serve(app).await
}

/// Start an upstream whose response body does not finish until `release`
/// is notified. The response head is sent right away.
pub async fn start_held_upstream() -> (String, Arc<Notify>) {
    let release = Arc::new(Notify::new());
    let held = Arc::clone(&release);
    let app = Router::new().fallback(move || {
        let held = Arc::clone(&held);
        async move {
            let tail = futures_util::stream::once(async move {
                held.notified().await;
                Ok::<_, Infallible>(Bytes::from_static(b"done"))
            });
            Body::from_stream(tail)
        }
    });
    (serve(app).await, release)
}

/// A running proxy bound to an ephemeral port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_proxy(server: ProxyServer) -> RunningProxy {
    let listener = Listener::new(TcpListener::bind("127.0.0.1:0").await.unwrap(), 64);
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, None, receiver).await.unwrap();
    });
    RunningProxy { addr, shutdown }
}

/// GET `path` on the proxy with an explicit `Host` header.
pub async fn get(proxy: &RunningProxy, host: &str, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(proxy.url(path))
        .header("Host", host)
        .send()
        .await
        .unwrap()
}
