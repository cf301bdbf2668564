mod common;

use std::time::Duration;

use common::{FakeTransport, client};
use gateway_client::{TransportError, TransportResponse, gateway::GatewayMonitor};
use http::StatusCode;
use tokio::sync::watch;

const STATUS: &str = "/v1/api/iserver/auth/status";
const TICKLE: &str = "/v1/api/tickle";

fn monitor(t: &FakeTransport) -> GatewayMonitor<FakeTransport> {
    GatewayMonitor::new(client(t), STATUS, TICKLE)
}

#[tokio::test(start_paused = true)]
async fn authenticated_gateway_is_healthy() {
    let t = FakeTransport::new(|_, req| {
        let body = if req.path == STATUS {
            r#"{"authenticated":true,"connected":true,"competing":false}"#
        } else {
            r#"{"session":"abc"}"#
        };
        Ok(TransportResponse::new(StatusCode::OK, body))
    });
    let m = monitor(&t);

    let status = m.auth_status().await.unwrap();
    assert!(status.authenticated);

    let h = m.check().await;
    assert!(h.reachable);
    assert!(h.authenticated);
    assert!(h.connected);
    assert_eq!(h.error, None);

    let paths: Vec<_> = t.requests().into_iter().map(|r| (r.method, r.path)).collect();
    assert!(paths.contains(&(http::Method::POST, TICKLE.to_string())));
    assert!(paths.contains(&(http::Method::GET, STATUS.to_string())));
}

#[tokio::test(start_paused = true)]
async fn unauthorized_gateway_is_reachable_but_not_authenticated() {
    let t = FakeTransport::status(401, "");
    let h = monitor(&t).check().await;
    assert!(h.reachable);
    assert!(!h.authenticated);
    assert!(h.error.unwrap().contains("authentication"));
}

#[tokio::test(start_paused = true)]
async fn stopped_gateway_is_unreachable() {
    let t = FakeTransport::new(|_, _| Err(TransportError::NoResponse("connection refused".into())));
    let h = monitor(&t).check().await;
    assert!(!h.reachable);
    assert!(!h.authenticated);
}

#[tokio::test(start_paused = true)]
async fn tickle_failure_is_reported_alongside_status() {
    let t = FakeTransport::new(|_, req| {
        if req.path == STATUS {
            Ok(TransportResponse::new(
                StatusCode::OK,
                r#"{"authenticated":true,"connected":true}"#,
            ))
        } else {
            Ok(TransportResponse::new(StatusCode::NOT_FOUND, ""))
        }
    });
    let h = monitor(&t).check().await;
    assert!(h.authenticated);
    assert!(h.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn poller_publishes_and_stops_without_subscribers() {
    let t = FakeTransport::new(|_, _| {
        Ok(TransportResponse::new(
            StatusCode::OK,
            r#"{"authenticated":true,"connected":true}"#,
        ))
    });
    let (tx, mut rx) = watch::channel(None);
    let task = tokio::spawn(monitor(&t).run_poller(Duration::from_secs(60), tx));

    rx.changed().await.unwrap();
    assert!(rx.borrow().as_ref().unwrap().authenticated);

    rx.changed().await.unwrap();
    assert_eq!(t.calls(), 4);

    drop(rx);
    tokio::time::timeout(Duration::from_secs(120), task)
        .await
        .expect("poller should stop")
        .unwrap();
}
