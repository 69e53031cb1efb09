//! Handle behavior: event stream, notification callbacks, trickle and detach.

use jwsapi_client::{ClientError, Connection, Handle, Message, MessageType, Notification, Session};
use jwsapi_core::attr;
use jwsapi_integration_tests::{eventually, janus_responder, plugin_event, reply_to, MockGateway};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

async fn attached(gw: &MockGateway) -> (Connection, Session, Handle) {
    let conn = Connection::open(gw.config());
    let session = conn.create().await.unwrap();
    let handle = session.attach("janus.plugin.echotest").await.unwrap();
    (conn, session, handle)
}

fn notification(kind: MessageType, session: &Session, handle: &Handle) -> Message {
    Message::of(kind)
        .with(attr::SESSION_ID, session.id())
        .with(attr::SENDER, handle.id())
}

#[tokio::test]
async fn test_attach_registers_handle() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;

    assert_eq!(session.handle_ids().await.unwrap(), vec![handle.id()]);
    let attach = &gw.frames_of(MessageType::Attach)[0];
    assert_eq!(attach.str(attr::PLUGIN), Some("janus.plugin.echotest"));
    assert_eq!(attach.session_id(), Some(session.id()));
    assert!(!attach.contains_key(attr::OPAQUE_ID));
}

#[tokio::test]
async fn test_attach_with_opaque_id() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());
    let session = conn.create().await.unwrap();
    session
        .attach_with_opaque_id("janus.plugin.videoroom", "room-7-alice")
        .await
        .unwrap();

    let attach = &gw.frames_of(MessageType::Attach)[0];
    assert_eq!(attach.str(attr::OPAQUE_ID), Some("room-7-alice"));
}

#[tokio::test]
async fn test_pushed_events_arrive_in_order() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;
    let mut events = handle.events().unwrap();
    assert!(handle.events().is_none());

    for n in 0..5u64 {
        gw.push(&plugin_event(session.id(), handle.id(), json!({ "n": n })));
    }

    for n in 0..5u64 {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .unwrap()
            .unwrap();
        let got = event.plugin_data().and_then(|p| p.data()).and_then(|d| d.u64("n"));
        assert_eq!(got, Some(n));
    }
}

#[tokio::test]
async fn test_notifications_reach_callbacks() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for kind in [Notification::WebrtcUp, Notification::Media, Notification::SlowLink] {
        let tx = tx.clone();
        handle.set_callback(kind, move |msg| {
            let _ = tx.send((kind, msg.clone()));
        });
    }

    gw.push(&notification(MessageType::WebrtcUp, &session, &handle));
    gw.push(&notification(MessageType::Media, &session, &handle).with("type", "audio"));
    gw.push(&notification(MessageType::SlowLink, &session, &handle).with("uplink", true));

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (kind, _) = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        seen.push(kind);
    }
    assert_eq!(
        seen,
        vec![Notification::WebrtcUp, Notification::Media, Notification::SlowLink]
    );
}

#[tokio::test]
async fn test_notifications_without_callback_are_ignored() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;
    let mut events = handle.events().unwrap();

    gw.push(&notification(MessageType::Hangup, &session, &handle));
    gw.push(&notification(MessageType::Detached, &session, &handle));
    gw.push(&plugin_event(session.id(), handle.id(), json!({ "after": true })));

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(event.is_event());
    assert!(!handle.is_detached());
}

#[tokio::test]
async fn test_trickle_frames() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;

    let candidate = Message::new()
        .with("candidate", "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host")
        .with("sdpMid", "0")
        .with("sdpMLineIndex", 0);
    handle.trickle(candidate.clone()).await.unwrap();
    handle
        .trickle_many(vec![candidate.clone(), candidate.clone()])
        .await
        .unwrap();
    handle.trickle_completed().await.unwrap();

    let trickles = gw.frames_of(MessageType::Trickle);
    assert_eq!(trickles.len(), 3);
    for frame in &trickles {
        assert_eq!(frame.u64(attr::HANDLE_ID), Some(handle.id()));
        assert_eq!(frame.session_id(), Some(session.id()));
    }
    assert_eq!(trickles[0].sub_message(attr::CANDIDATE), Some(candidate));
    assert_eq!(trickles[1].array(attr::CANDIDATES).map(|c| c.len()), Some(2));
    assert_eq!(
        trickles[2].sub_message(attr::CANDIDATE).and_then(|c| c.bool("completed")),
        Some(true)
    );
}

#[tokio::test]
async fn test_detach_fires_hangup_then_ends_stream() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;
    let mut events = handle.events().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    handle.set_callback(Notification::Hangup, move |msg| {
        let _ = tx.send(msg.clone());
    });

    handle.detach().await.unwrap();
    assert!(handle.is_detached());

    let end = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
    assert!(end.is_none());
    let hangup = rx.try_recv().expect("hangup before stream end");
    assert_eq!(hangup.kind(), Some(MessageType::Hangup));
    assert_eq!(hangup.sender(), Some(handle.id()));

    let detach = &gw.frames_of(MessageType::Detach)[0];
    assert_eq!(detach.u64(attr::HANDLE_ID), Some(handle.id()));

    let s = &session;
    let gone = eventually(WAIT, move || async move { s.handle_ids().await.unwrap().is_empty() });
    assert!(gone.await);
    assert!(matches!(
        handle.message(Message::new()).await,
        Err(ClientError::Detached { .. })
    ));
}

#[tokio::test]
async fn test_destroyed_session_fails_immediately() {
    let gw = MockGateway::start().await;
    let (conn, session, handle) = attached(&gw).await;

    session.destroy().await.unwrap();
    assert!(session.is_destroyed());
    assert!(handle.is_detached());
    assert_eq!(
        gw.frames_of(MessageType::Destroy)[0].session_id(),
        Some(session.id())
    );

    let before = gw.frames().len();
    let started = std::time::Instant::now();
    let err = session.attach("janus.plugin.echotest").await.unwrap_err();
    assert!(matches!(err, ClientError::SessionDestroyed { .. }));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(gw.frames().len(), before);

    let c = &conn;
    let gone = eventually(WAIT, move || async move { c.session_ids().await.unwrap().is_empty() });
    assert!(gone.await);
}

#[tokio::test]
async fn test_keepalives_are_sent_periodically() {
    let gw = MockGateway::start().await;
    let mut config = gw.config();
    config.keepalive_interval_ms = 100;
    let conn = Connection::open(config);
    let session = conn.create().await.unwrap();

    let keepalives = gw.wait_for_frames(MessageType::Keepalive, 2, WAIT).await;
    for keepalive in keepalives {
        assert_eq!(keepalive.session_id(), Some(session.id()));
    }
}

#[tokio::test]
async fn test_event_for_unknown_handle_is_dropped() {
    let gw = MockGateway::start().await;
    let (_conn, session, handle) = attached(&gw).await;
    let mut events = handle.events().unwrap();

    gw.push(&plugin_event(session.id(), handle.id() + 1, json!({ "lost": true })));
    gw.push(&plugin_event(session.id() + 1, handle.id(), json!({ "lost": true })));
    gw.push(&plugin_event(session.id(), handle.id(), json!({ "lost": false })));

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    let lost = event.plugin_data().and_then(|p| p.data()).and_then(|d| d.bool("lost"));
    assert_eq!(lost, Some(false));
}

#[tokio::test]
async fn test_attach_without_handle_id_fails() {
    let gw = MockGateway::start().await;
    let janus = janus_responder();
    gw.set_responder(move |req| match req.kind() {
        Some(MessageType::Attach) => vec![reply_to(req, MessageType::Success)],
        _ => janus(req),
    });

    let conn = Connection::open(gw.config());
    let session = conn.create().await.unwrap();

    let err = session.attach("janus.plugin.echotest").await.unwrap_err();
    assert!(
        matches!(err, ClientError::InvalidResponse(_)),
        "unexpected error: {}",
        err
    );
    assert!(session.handle_ids().await.unwrap().is_empty());
    assert!(!session.is_destroyed());
}
