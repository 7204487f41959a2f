//! WebSocket upgrades through a running proxy.

use std::net::SocketAddr;
use edge_proxy::config::load_config_str;
use edge_proxy::{ProxyServer, Site};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

mod common;

async fn connect(
    proxy: &common::RunningProxy,
    host: &str,
    path: &str,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let mut request = format!("ws://{}{}", proxy.addr, path).into_client_request().unwrap();
    request.headers_mut().insert("host", host.parse().unwrap());
    let (stream, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status(), 101);
    stream
}

/// Upstream WebSocket server that echoes every data message.
async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        ws.send(message).await.unwrap();
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn terminated_connection_echoes_messages() {
    let site = Site::new("chat.example.com").websocket_handler(|conn, _ctx| async move {
        let sender = conn.clone();
        conn.on_message(move |message| {
            let _ = sender.send(message);
        });
    });
    let server = ProxyServer::builder(Default::default()).site(site).build().await.unwrap();
    let proxy = common::spawn_proxy(server).await;

    let mut ws = connect(&proxy, "chat.example.com", "/room").await;
    ws.send(Message::text("hello")).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::text("hello"));

    ws.send(Message::text("second")).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::text("second"));

    ws.close(None).await.unwrap();
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Close(frame) = message {
            assert!(frame.map_or(true, |f| f.code == CloseCode::Normal));
            break;
        }
    }
}

#[tokio::test]
async fn server_side_close_reaches_client() {
    let site = Site::new("chat.example.com").websocket_handler(|conn, _ctx| async move {
        let closer = conn.clone();
        conn.on_message(move |_| closer.close(1001, "going away"));
    });
    let server = ProxyServer::builder(Default::default()).site(site).build().await.unwrap();
    let proxy = common::spawn_proxy(server).await;

    let mut ws = connect(&proxy, "chat.example.com", "/").await;
    ws.send(Message::text("bye")).await.unwrap();
    match ws.next().await.unwrap().unwrap() {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Away);
            assert_eq!(frame.reason.as_str(), "going away");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn proxied_connection_relays_both_directions() {
    let upstream = start_echo_upstream().await;
    let config = load_config_str(&format!(
        r#"
        [[sites]]
        domain = "ws.example.com"
        targets = ["ws://{upstream}"]
        "#
    ))
    .unwrap();
    let proxy = common::spawn_proxy(ProxyServer::from_config(config).await.unwrap()).await;

    let mut ws = connect(&proxy, "ws.example.com", "/socket").await;
    ws.send(Message::text("ping through")).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::text("ping through"));

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::binary(vec![1u8, 2, 3]));
}

#[tokio::test]
async fn upgrade_for_unknown_host_is_rejected() {
    let proxy = common::spawn_proxy(ProxyServer::from_config(Default::default()).await.unwrap()).await;
    let mut request = format!("ws://{}/", proxy.addr).into_client_request().unwrap();
    request.headers_mut().insert("host", "nobody.test".parse().unwrap());
    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

#[tokio::test]
async fn handler_awaiting_close_still_receives_frames() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let site = Site::new("chat.example.com").websocket_handler(move |conn, _ctx| {
        let flag = Arc::clone(&flag);
        async move {
            let sender = conn.clone();
            conn.on_message(move |message| {
                let _ = sender.send(message);
            });
            conn.closed().await;
            flag.store(true, Ordering::SeqCst);
        }
    });
    let server = ProxyServer::builder(Default::default()).site(site).build().await.unwrap();
    let proxy = common::spawn_proxy(server).await;

    let mut ws = connect(&proxy, "chat.example.com", "/").await;
    ws.send(Message::text("hello")).await.unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, Message::text("hello"));
    assert!(!finished.load(Ordering::SeqCst));

    ws.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(3), async {
        while !finished.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn upstream_refusing_upgrade_closes_client_connection() {
    let (upstream, calls) = common::start_mock_upstream("plain http").await;
    let config = load_config_str(&format!(
        r#"
        [[sites]]
        domain = "ws.example.com"
        targets = ["{upstream}"]
        "#
    ))
    .unwrap();
    let proxy = common::spawn_proxy(ProxyServer::from_config(config).await.unwrap()).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(
            b"GET /socket HTTP/1.1\r\n\
              Host: ws.example.com\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();

    // Reads to EOF: the proxy must close the socket after refusing.
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    let reply = String::from_utf8_lossy(&reply).to_lowercase();

    assert_eq!(calls.count(), 1);
    assert!(!reply.starts_with("http/1.1 101"), "unexpected upgrade: {reply}");
    assert!(reply.starts_with("http/1.1 502"), "unexpected reply: {reply}");
    assert!(reply.contains("connection: close"));
    assert!(!reply.contains("plain http"));
}
