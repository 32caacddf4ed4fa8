//! WebSocket transport against an in-process `graphql-ws` server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gql_transport::types::Request;
use gql_transport::ws::{WsConfig, WsTransport};
use gql_transport::{Client, Error, Response, ResponseRef, Transport};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ServerSocket = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/query", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one connection, answering with the `graphql-ws` subprotocol when `negotiate`.
async fn accept(listener: &TcpListener, negotiate: bool) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &HandshakeRequest, mut resp: HandshakeResponse| -> Result<HandshakeResponse, ErrorResponse> {
            let offered = req
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            assert_eq!(offered, "graphql-ws");
            if negotiate {
                resp.headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("graphql-ws"));
            }
            Ok(resp)
        },
    )
    .await
    .unwrap()
}

async fn recv(ws: &mut ServerSocket) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {other:?}"),
        }
    }
}

async fn expect(ws: &mut ServerSocket, kind: &str) -> Value {
    let msg = recv(ws).await;
    assert_eq!(msg["type"], kind, "unexpected frame {msg}");
    msg
}

async fn send(ws: &mut ServerSocket, msg: Value) {
    ws.send(Message::Text(msg.to_string().into())).await.unwrap();
}

fn data(id: &str, n: usize) -> Value {
    json!({"id": id, "type": "data", "payload": {"data": {"messages": format!("msg{n}")}}})
}

/// Read until the client goes away.
async fn drain(mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

async fn collect(res: &ResponseRef) -> Vec<String> {
    let mut seen = Vec::new();
    while res.next().await {
        let envelope = res.current();
        assert!(!envelope.has_errors(), "{:?}", envelope.errors);
        let data = envelope.data.unwrap();
        seen.push(data["messages"].as_str().unwrap().to_string());
    }
    seen
}

fn config(url: &str) -> WsConfig {
    WsConfig::new(url)
        .with_retry_delay(Duration::from_millis(50))
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn subscription_receives_three_messages_then_completes() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, true).await;
        let init = expect(&mut ws, "connection_init").await;
        assert_eq!(init["payload"], json!({"token": "t"}));
        send(&mut ws, json!({"type": "connection_ack"})).await;

        let start = expect(&mut ws, "start").await;
        let id = start["id"].as_str().unwrap().to_string();
        assert_eq!(start["payload"]["query"], "subscription { messages }");
        for n in 0..3 {
            send(&mut ws, data(&id, n)).await;
        }
        send(&mut ws, json!({"id": id, "type": "complete"})).await;
        drain(ws).await;
    });

    let ws = WsTransport::new(config(&url).with_connection_params(json!({"token": "t"}))).unwrap();
    let run = ws.start();

    let client = Client::new(std::sync::Arc::new(ws.clone()));
    let res = client
        .subscribe(Request::subscription("subscription { messages }"))
        .await
        .unwrap();

    assert_eq!(collect(&res).await, vec!["msg0", "msg1", "msg2"]);
    assert!(res.err().is_none());
    assert!(ws.operation_ids().is_empty());

    ws.close().await.unwrap();
    run.wait().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn dropped_connection_resumes_the_same_subscription() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut first = accept(&listener, true).await;
        expect(&mut first, "connection_init").await;
        send(&mut first, json!({"type": "connection_ack"})).await;
        let start = expect(&mut first, "start").await;
        let id = start["id"].as_str().unwrap().to_string();
        send(&mut first, data(&id, 0)).await;
        drop(first);

        let mut second = accept(&listener, true).await;
        expect(&mut second, "connection_init").await;
        send(&mut second, json!({"type": "connection_ack"})).await;
        let restart = expect(&mut second, "start").await;
        assert_eq!(restart["id"], id.as_str());
        for n in 1..3 {
            send(&mut second, data(&id, n)).await;
        }
        send(&mut second, json!({"id": id, "type": "complete"})).await;
        drain(second).await;
    });

    let ws = WsTransport::new(config(&url)).unwrap();
    let run = ws.start();

    let res = ws
        .request(Request::subscription("subscription { messages }"))
        .await
        .unwrap();

    assert_eq!(collect(&res).await, vec!["msg0", "msg1", "msg2"]);
    assert!(res.err().is_none());

    ws.close().await.unwrap();
    run.wait().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn query_over_websocket() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, true).await;
        expect(&mut ws, "connection_init").await;
        send(&mut ws, json!({"type": "connection_ack"})).await;
        let start = expect(&mut ws, "start").await;
        let id = start["id"].as_str().unwrap().to_string();
        assert_eq!(start["payload"]["variables"], json!({"name": "test"}));
        send(
            &mut ws,
            json!({"id": id, "type": "data", "payload": {"data": {"room": {"name": "test"}}}}),
        )
        .await;
        // The client closes its response after one envelope and stops the operation.
        let stop = expect(&mut ws, "stop").await;
        assert_eq!(stop["id"], id.as_str());
        drain(ws).await;
    });

    let ws = WsTransport::new(config(&url)).unwrap();
    let run = ws.start();
    let client = Client::new(std::sync::Arc::new(ws.clone()));

    let data: Value = client
        .query(Request::query("query R($name: String!) { room(name: $name) { name } }").variable("name", "test"))
        .await
        .unwrap();
    assert_eq!(data["room"]["name"], "test");

    ws.close().await.unwrap();
    run.wait().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn server_without_subprotocol_exhausts_the_retry_window() {
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        loop {
            let ws = accept(&listener, false).await;
            tokio::spawn(drain(ws));
        }
    });

    let ws = WsTransport::new(config(&url).with_retry_timeout(Duration::from_millis(300))).unwrap();
    let err = ws.run().await.unwrap_err();

    assert!(matches!(err, Error::RetryTimeout { .. }), "got {err:?}");
}
