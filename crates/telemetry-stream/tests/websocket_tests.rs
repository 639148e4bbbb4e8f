//! End-to-end tests of the WebSocket transport against a local feed server

use std::time::Duration;

use chrono::{TimeZone, Utc};
use telemetry_stream::streaming::ConnectionStatus;
use telemetry_stream::testing::{wait_for, ServerPush, TestFeedServer};
use telemetry_stream::transport::CloseFrame;
use telemetry_stream::{
    FeedEvent, Sample, StreamConfig, StreamError, StreamState, SubscriptionController,
    SubscriptionTarget,
};

fn controller_for(server: &TestFeedServer) -> SubscriptionController {
    SubscriptionController::from_config(&StreamConfig {
        endpoint: server.endpoint(),
        ..Default::default()
    })
    .expect("valid config")
}

async fn settle(controller: &SubscriptionController, condition: impl Fn(&StreamState) -> bool) {
    let mut updates = controller.watch();
    tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|s| condition(s)))
        .await
        .expect("controller state did not settle")
        .expect("controller dropped");
}

async fn confirmed(controller: &SubscriptionController) {
    settle(controller, |s| s.status == ConnectionStatus::Open { confirmed: true }).await;
}

fn point(seconds: u32, value: f64) -> Sample {
    Sample::new(
        Utc.with_ymd_and_hms(2019, 6, 24, 3, 16, seconds).unwrap(),
        value,
    )
}

#[tokio::test]
async fn test_target_is_sent_as_query_parameters() {
    let server = TestFeedServer::start().await.unwrap();
    let controller = controller_for(&server);

    controller.subscribe(SubscriptionTarget::new("B183", "speed"));
    confirmed(&controller).await;

    assert_eq!(
        server.requests(),
        vec![SubscriptionTarget::new("B183", "speed")]
    );
    assert_eq!(server.live_connections(), 1);
}

#[tokio::test]
async fn test_points_stream_into_window() {
    let server = TestFeedServer::start().await.unwrap();
    let controller = controller_for(&server);
    let target = SubscriptionTarget::new("B183", "speed");

    controller.subscribe(target.clone());
    confirmed(&controller).await;

    server.push(
        &target,
        ServerPush::Raw(
            r#"{"type":"point","timestamp":"2019-06-24T03:16:00Z","value":42.5}"#.to_string(),
        ),
    );
    server.push(&target, ServerPush::Raw(r#"{"type":"bogus"}"#.to_string()));
    server.push(&target, ServerPush::Event(FeedEvent::Sample(point(1, 43.0))));
    settle(&controller, |s| s.samples.len() == 2).await;

    let state = controller.state();
    assert_eq!(state.samples, vec![point(0, 42.5), point(1, 43.0)]);
    assert_eq!(state.last_error, None);
}

#[tokio::test]
async fn test_server_error_frame_surfaces() {
    let server = TestFeedServer::start().await.unwrap();
    let controller = controller_for(&server);
    let target = SubscriptionTarget::new("B183", "rpm");

    controller.subscribe(target.clone());
    confirmed(&controller).await;

    server.push(
        &target,
        ServerPush::Event(FeedEvent::Error {
            message: "unsupported metric: rpm".into(),
        }),
    );
    settle(&controller, |s| s.last_error.is_some()).await;

    assert!(controller.status().is_open());
    assert_eq!(
        controller.last_error(),
        Some(StreamError::Application {
            message: "unsupported metric: rpm".into()
        })
    );
}

#[tokio::test]
async fn test_target_change_closes_old_socket_normally() {
    let server = TestFeedServer::start().await.unwrap();
    let controller = controller_for(&server);
    let first = SubscriptionTarget::new("B183", "speed");
    let second = SubscriptionTarget::new("B183", "temp");

    controller.subscribe(first.clone());
    confirmed(&controller).await;
    server.push(&first, ServerPush::Event(FeedEvent::Sample(point(0, 10.0))));
    settle(&controller, |s| !s.samples.is_empty()).await;

    controller.update(second.clone());
    assert!(controller.samples().is_empty());
    confirmed(&controller).await;

    let closed = wait_for(
        || {
            let frames = server.client_close_frames();
            async move { !frames.is_empty() }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(closed);
    assert_eq!(
        server.client_close_frames(),
        vec![CloseFrame::normal("target changed")]
    );

    // Data for the old target no longer reaches the controller
    server.push(&first, ServerPush::Event(FeedEvent::Sample(point(1, 11.0))));
    server.push(&second, ServerPush::Event(FeedEvent::Sample(point(2, 90.0))));
    settle(&controller, |s| !s.samples.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.samples(), vec![point(2, 90.0)]);
    assert_eq!(server.requests(), vec![first, second]);
}

#[tokio::test]
async fn test_server_close_codes() {
    let server = TestFeedServer::start().await.unwrap();
    let controller = controller_for(&server);
    let target = SubscriptionTarget::new("B183", "speed");

    controller.subscribe(target.clone());
    confirmed(&controller).await;
    server.push(&target, ServerPush::Close(CloseFrame::normal("disconnect")));
    settle(&controller, |s| s.status == ConnectionStatus::Closed).await;
    assert_eq!(controller.last_error(), None);

    controller.reconnect();
    confirmed(&controller).await;
    server.push(
        &target,
        ServerPush::Close(CloseFrame::new(1011, "database listen error")),
    );
    settle(&controller, |s| s.status == ConnectionStatus::Closed).await;
    assert_eq!(
        controller.last_error(),
        Some(StreamError::AbnormalClose {
            code: Some(1011),
            reason: "database listen error".into()
        })
    );
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_transport_error() {
    let server = TestFeedServer::start().await.unwrap();
    let endpoint = server.endpoint();
    drop(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let controller = SubscriptionController::from_config(&StreamConfig {
        endpoint,
        ..Default::default()
    })
    .unwrap();
    controller.subscribe(SubscriptionTarget::new("B183", "speed"));
    settle(&controller, |s| s.status == ConnectionStatus::Closed).await;

    assert!(matches!(
        controller.last_error(),
        Some(StreamError::Transport { .. })
    ));
}

#[tokio::test]
async fn test_drop_releases_socket() {
    let server = TestFeedServer::start().await.unwrap();
    let controller = controller_for(&server);

    controller.subscribe(SubscriptionTarget::new("B183", "speed"));
    confirmed(&controller).await;
    assert_eq!(server.live_connections(), 1);

    drop(controller);

    let released = wait_for(
        || {
            let live = server.live_connections();
            async move { live == 0 }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(released);
    assert_eq!(server.client_close_frames(), vec![CloseFrame::normal("teardown")]);
}
