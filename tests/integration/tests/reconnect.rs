//! Transport loss: redial, session reclaim and the disconnect grace period.

use jwsapi_client::{Connection, LinkState, Message, MessageType};
use jwsapi_integration_tests::{error_reply, eventually, janus_responder, MockGateway};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_dropped_socket_reclaims_every_session_once() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());
    conn.wait_connected(WAIT).await.unwrap();
    let first = conn.create().await.unwrap();
    let second = conn.create().await.unwrap();
    assert!(gw.frames_of(MessageType::Claim).is_empty());

    gw.drop_connections();

    let claims = gw.wait_for_frames(MessageType::Claim, 2, WAIT).await;
    let mut claimed: Vec<u64> = claims.iter().filter_map(|c| c.session_id()).collect();
    claimed.sort_unstable();
    assert_eq!(claimed, vec![first.id(), second.id()]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gw.frames_of(MessageType::Claim).len(), 2);
    assert_eq!(gw.accepted(), 2);
    assert_eq!(conn.status().generation, 2);
    assert!(!first.is_destroyed());
    assert!(!second.is_destroyed());

    // The replacement socket carries requests as usual.
    first
        .request(Message::of(MessageType::Keepalive))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_dials_then_success_claims_once() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());
    conn.wait_connected(WAIT).await.unwrap();
    let session = conn.create().await.unwrap();

    gw.stop().await;
    let c = &conn;
    let lost = eventually(WAIT, move || async move {
        c.status().state != LinkState::Connected
    });
    assert!(lost.await);

    // A few dial attempts fail against the closed port.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let gw = gw.restart().await;

    let claims = gw.wait_for_frames(MessageType::Claim, 1, WAIT).await;
    assert_eq!(claims[0].session_id(), Some(session.id()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gw.frames_of(MessageType::Claim).len(), 1);
    assert_eq!(conn.status().state, LinkState::Connected);
    assert_eq!(conn.session_ids().await.unwrap(), vec![session.id()]);
}

#[tokio::test]
async fn test_rejected_claim_removes_session() {
    let gw = MockGateway::start().await;
    let conn = Connection::open(gw.config());
    let session = conn.create().await.unwrap();
    let handle = session.attach("janus.plugin.echotest").await.unwrap();

    let fallback = janus_responder();
    gw.set_responder(move |req| match req.kind() {
        Some(MessageType::Claim) => vec![error_reply(req, 458, "No such session")],
        _ => fallback(req),
    });
    gw.drop_connections();

    gw.wait_for_frames(MessageType::Claim, 1, WAIT).await;
    let c = &conn;
    let removed = eventually(WAIT, move || async move {
        c.session_ids().await.unwrap().is_empty()
    });
    assert!(removed.await);
    assert!(session.is_destroyed());
    assert!(handle.is_detached());
}

#[tokio::test]
async fn test_grace_period_expiry_tears_down_sessions() {
    let gw = MockGateway::start().await;
    let mut config = gw.config();
    config.disconnect_grace_ms = 300;
    let conn = Connection::open(config);
    let session = conn.create().await.unwrap();
    let handle = session.attach("janus.plugin.echotest").await.unwrap();
    let mut events = handle.events().unwrap();

    gw.stop().await;

    let c = &conn;
    let dropped = eventually(WAIT, move || async move {
        c.session_ids().await.unwrap().is_empty()
    });
    assert!(dropped.await);
    assert!(session.is_destroyed());
    assert!(handle.is_detached());
    let end = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
    assert!(end.is_none());

    // The connection itself keeps trying.
    assert!(!conn.is_destroyed());
    assert!(gw.frames_of(MessageType::Claim).is_empty());
}

#[tokio::test]
async fn test_short_outage_keeps_sessions() {
    let gw = MockGateway::start().await;
    let mut config = gw.config();
    config.disconnect_grace_ms = 5_000;
    let conn = Connection::open(config);
    let session = conn.create().await.unwrap();

    gw.stop().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let gw = gw.restart().await;

    gw.wait_for_frames(MessageType::Claim, 1, WAIT).await;
    assert!(!session.is_destroyed());
    assert_eq!(conn.session_ids().await.unwrap(), vec![session.id()]);
}
