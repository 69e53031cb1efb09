//! Connection-level behavior against the mock gateway: session creation,
//! transaction correlation, timeouts and framing.

use jwsapi_client::{ClientError, Connection, LinkState, Message, MessageType};
use jwsapi_core::attr;
use jwsapi_integration_tests::{janus_responder, plugin_event, reply_to, MockGateway};
use serde_json::json;
use std::time::{Duration, Instant};

const CONNECT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_create_returns_gateway_session_id() {
    let gw = MockGateway::start().await;
    gw.set_responder(|req| match req.kind() {
        Some(MessageType::Create) => {
            vec![reply_to(req, MessageType::Success).with(attr::DATA, json!({ "id": 111 }))]
        }
        _ => vec![reply_to(req, MessageType::Ack)],
    });

    let conn = Connection::open(gw.config());
    conn.wait_connected(CONNECT).await.unwrap();

    let session = conn.create().await.unwrap();
    assert_eq!(session.id(), 111);
    assert_eq!(conn.session_ids().await.unwrap(), vec![111]);

    let creates = gw.frames_of(MessageType::Create);
    assert_eq!(creates.len(), 1);
    assert!(creates[0].transaction().is_some());
}

#[tokio::test]
async fn test_large_session_id_survives_exactly() {
    const BIG: u64 = 9_007_199_254_740_993;

    let gw = MockGateway::start().await;
    gw.set_responder(|req| match req.kind() {
        Some(MessageType::Create) => {
            vec![reply_to(req, MessageType::Success).with(attr::DATA, json!({ "id": BIG }))]
        }
        _ => vec![reply_to(req, MessageType::Ack)],
    });

    let conn = Connection::open(gw.config());
    conn.wait_connected(CONNECT).await.unwrap();
    let session = conn.create().await.unwrap();
    assert_eq!(session.id(), BIG);

    session
        .request(Message::of(MessageType::Keepalive))
        .await
        .unwrap();
    let keepalive = &gw.frames_of(MessageType::Keepalive)[0];
    assert_eq!(keepalive.session_id(), Some(BIG));
    assert_eq!(keepalive.get(attr::SESSION_ID), Some(&json!(BIG)));
}

#[tokio::test]
async fn test_requests_the_janus_subprotocol() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());
    conn.wait_connected(CONNECT).await.unwrap();

    assert_eq!(gw.subprotocols(), vec![Some("janus-protocol".to_string())]);
    let status = conn.status();
    assert_eq!(status.state, LinkState::Connected);
    assert_eq!(status.generation, 1);
}

#[tokio::test]
async fn test_info() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());

    let info = conn.info().await.unwrap();
    assert_eq!(info.kind(), Some(MessageType::ServerInfo));
    assert_eq!(info.str("name"), Some("Mock Janus"));
}

#[tokio::test]
async fn test_request_timeout_cleans_up_transaction() {
    let gw = MockGateway::start().await;
    gw.set_responder(|_| Vec::new());

    let mut config = gw.config();
    config.request_timeout_ms = 200;
    let conn = Connection::open(config);
    conn.wait_connected(CONNECT).await.unwrap();

    let started = Instant::now();
    let err = conn.info().await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(conn.pending_transactions().await.unwrap().is_empty());
    assert_eq!(gw.frames_of(MessageType::Info).len(), 1);
}

#[tokio::test]
async fn test_caller_supplied_transaction_id_is_kept() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());

    let msg = Message::of(MessageType::Info).with(attr::TRANSACTION, "my-own-id");
    conn.request(msg).await.unwrap();
    assert_eq!(
        gw.frames_of(MessageType::Info)[0].transaction(),
        Some("my-own-id")
    );
}

#[tokio::test]
async fn test_duplicate_transaction_rejected_without_sending() {
    let gw = MockGateway::start().await;
    gw.set_responder(|_| Vec::new());
    let conn = Connection::open(gw.config());
    conn.wait_connected(CONNECT).await.unwrap();

    let first = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.request(Message::of(MessageType::Info).with(attr::TRANSACTION, "dup"))
                .await
        })
    };
    gw.wait_for_frames(MessageType::Info, 1, CONNECT).await;

    let second = conn
        .request(Message::of(MessageType::Info).with(attr::TRANSACTION, "dup"))
        .await;
    assert!(matches!(second, Err(ClientError::DuplicateTransaction(ref tid)) if tid == "dup"));
    assert_eq!(gw.frames_of(MessageType::Info).len(), 1);

    assert!(first.await.unwrap().unwrap_err().is_timeout());
}

#[tokio::test]
async fn test_gateway_error_reply_surfaces_as_protocol_error() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());

    // The default responder rejects requests it does not know.
    let err = conn
        .request(Message::new().with(attr::JANUS, "frobnicate"))
        .await
        .unwrap_err();
    let protocol = err.protocol().expect("protocol error");
    assert_eq!(protocol.code, Some(457));
    assert_eq!(protocol.reason, "Unhandled request");
}

#[tokio::test]
async fn test_unknown_transaction_falls_through_to_session_routing() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());
    let session = conn.create().await.unwrap();
    let handle = session.attach("janus.plugin.echotest").await.unwrap();
    let mut events = handle.events().unwrap();

    let stray = plugin_event(session.id(), handle.id(), json!({ "n": 7 }))
        .with(attr::TRANSACTION, "nobody-waits-for-this");
    gw.push(&stray);

    let event = tokio::time::timeout(CONNECT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.plugin_data().and_then(|p| p.data()).and_then(|d| d.u64("n")),
        Some(7)
    );
}

#[tokio::test]
async fn test_close_tears_down_everything() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());
    let session = conn.create().await.unwrap();
    let handle = session.attach("janus.plugin.echotest").await.unwrap();
    let mut events = handle.events().unwrap();

    conn.close();

    assert!(conn.is_destroyed());
    assert!(session.is_destroyed());
    assert!(handle.is_detached());
    let end = tokio::time::timeout(CONNECT, events.recv()).await.unwrap();
    assert!(end.is_none());
    assert!(matches!(
        conn.info().await,
        Err(ClientError::ConnectionClosed)
    ));
    // Nothing is sent on local teardown.
    assert!(gw.frames_of(MessageType::Destroy).is_empty());
}

#[tokio::test]
async fn test_default_responder_ids_increase() {
    let gw = MockGateway::start().await;
    gw.set_responder({
        let inner = janus_responder();
        move |req| inner(req)
    });
    let conn = Connection::open(gw.config());
    let a = conn.create().await.unwrap();
    let b = conn.create().await.unwrap();
    assert!(b.id() > a.id());
    assert_eq!(conn.session_ids().await.unwrap(), vec![a.id(), b.id()]);
}

#[tokio::test]
async fn test_create_without_session_id_fails() {
    let gw = MockGateway::start().await;
    gw.set_responder(|req| vec![reply_to(req, MessageType::Success)]);

    let conn = Connection::open(gw.config());
    conn.wait_connected(CONNECT).await.unwrap();

    let err = conn.create().await.unwrap_err();
    assert!(
        matches!(err, ClientError::InvalidResponse(_)),
        "unexpected error: {}",
        err
    );
    assert!(conn.session_ids().await.unwrap().is_empty());
}
