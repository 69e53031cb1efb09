//! Two-phase plugin messages: acknowledgement first, then the event.

use jwsapi_client::{ClientError, Connection, Handle, Message, MessageType, Session};
use jwsapi_core::attr;
use jwsapi_integration_tests::{error_reply, janus_responder, plugin_event, reply_to, MockGateway};
use serde_json::json;
use std::time::{Duration, Instant};

async fn attached(gw: &MockGateway) -> (Connection, Session, Handle) {
    let conn = Connection::open(gw.config());
    let session = conn.create().await.unwrap();
    let handle = session.attach("janus.plugin.echotest").await.unwrap();
    (conn, session, handle)
}

/// Default Janus behavior, with `message` requests answered by `on_message`.
fn with_message_replies<F>(gw: &MockGateway, on_message: F)
where
    F: Fn(&Message) -> Vec<Message> + Send + Sync + 'static,
{
    let fallback = janus_responder();
    gw.set_responder(move |req| match req.kind() {
        Some(MessageType::Message) => on_message(req),
        _ => fallback(req),
    });
}

#[tokio::test]
async fn test_ack_then_event() {
    let gw = MockGateway::start().await;
    let (_conn, _session, handle) = attached(&gw).await;

    let event = handle
        .message(Message::new().with("audio", true))
        .await
        .unwrap();
    assert!(event.is_event());
    let data = event.plugin_data().and_then(|p| p.data()).unwrap();
    assert_eq!(data.str("result"), Some("ok"));

    let sent = &gw.frames_of(MessageType::Message)[0];
    assert_eq!(sent.u64(attr::HANDLE_ID), Some(handle.id()));
    assert_eq!(sent.session_id(), Some(handle.session_id()));
    assert_eq!(
        sent.sub_message(attr::BODY).and_then(|b| b.bool("audio")),
        Some(true)
    );
}

#[tokio::test]
async fn test_error_first_returns_immediately() {
    let gw = MockGateway::start().await;
    let (conn, _session, handle) = attached(&gw).await;
    with_message_replies(&gw, |req| vec![error_reply(req, 490, "Bad body")]);

    let started = Instant::now();
    let err = handle.message(Message::new()).await.unwrap_err();
    assert!(started.elapsed() < conn.config().request_timeout());
    assert_eq!(err.protocol().and_then(|e| e.code), Some(490));
}

#[tokio::test]
async fn test_ack_without_event_times_out() {
    let gw = MockGateway::start().await;
    let (conn, _session, handle) = attached(&gw).await;
    with_message_replies(&gw, |req| vec![reply_to(req, MessageType::Ack)]);

    let err = handle.message(Message::new()).await.unwrap_err();
    match err {
        ClientError::Timeout { context, .. } => assert!(context.contains("event"), "{}", context),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(conn.pending_transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_plugin_error_in_event() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;
    let (session_id, handle_id) = (session.id(), handle.id());
    with_message_replies(&gw, move |req| {
        let event = plugin_event(
            session_id,
            handle_id,
            json!({ "videoroom": "event", "error_code": 426, "error": "No such room" }),
        )
        .with(attr::TRANSACTION, req.transaction().unwrap_or_default());
        vec![reply_to(req, MessageType::Ack), event]
    });

    let err = handle
        .message(Message::new().with("request", "join").with("room", 42))
        .await
        .unwrap_err();
    let protocol = err.protocol().unwrap();
    assert_eq!(protocol.code, Some(426));
    assert_eq!(protocol.reason, "No such room");
}

#[tokio::test]
async fn test_synchronous_plugin_request() {
    let gw = MockGateway::start().await;
    let (_conn, _session, handle) = attached(&gw).await;
    with_message_replies(&gw, |req| {
        vec![reply_to(req, MessageType::Success).with(
            attr::PLUGIN_DATA,
            json!({ "plugin": "janus.plugin.videoroom", "data": { "list": [] } }),
        )]
    });

    let reply = handle
        .request(Message::new().with("request", "list"))
        .await
        .unwrap();
    assert!(reply.is_success());
    let plugin_data = reply.plugin_data().unwrap();
    assert_eq!(plugin_data.plugin(), Some("janus.plugin.videoroom"));
}

#[tokio::test]
async fn test_jsep_message_carries_offer() {
    let gw = MockGateway::start().await;
    let (_conn, _session, handle) = attached(&gw).await;

    let offer = Message::new().with("type", "offer").with("sdp", "v=0\r\n");
    handle
        .jsep_message(Message::new().with("audio", true), offer.clone())
        .await
        .unwrap();

    let sent = &gw.frames_of(MessageType::Message)[0];
    assert_eq!(sent.jsep(), Some(offer));
}
