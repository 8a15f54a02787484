//! End-to-end relay tests over loopback TCP.
//!
//! Each test starts a real relay on an ephemeral port with a short tick and
//! drives it with `PipelineClient`s, observing the notification sink through
//! a channel and the driver through published stats.

use std::time::Duration;

use pipehub_client::PipelineClient;
use pipehub_proto::write_frame;
use pipehub_server::{
    ChannelSink, Notification, RelayConfig, RelayHandle, RelayStats, ServerError,
};
use serde_json::{Value, json};
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::mpsc::UnboundedReceiver, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

fn start_relay(config: RelayConfig) -> (RelayHandle, UnboundedReceiver<Notification>) {
    let (sink, notifications) = ChannelSink::new();
    let relay = RelayHandle::start(config, sink).unwrap();
    (relay, notifications)
}

fn local_config() -> RelayConfig {
    RelayConfig::new("127.0.0.1", 0).with_tick_interval(Duration::from_millis(10))
}

async fn next_notification(rx: &mut UnboundedReceiver<Notification>) -> Notification {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn wait_stats(relay: &RelayHandle, pred: impl FnMut(&RelayStats) -> bool) {
    let mut stats = relay.subscribe_stats();
    timeout(WAIT, stats.wait_for(pred)).await.unwrap().unwrap();
}

/// Connect and register, returning once the relay has processed the
/// registration.
async fn registered_client(
    relay: &RelayHandle,
    notifications: &mut UnboundedReceiver<Notification>,
    uuid: &str,
) -> PipelineClient {
    let mut client = PipelineClient::connect(relay.local_addr()).await.unwrap();
    client.register(uuid, json!({ "nodes": [] })).await.unwrap();

    let forwarded = next_notification(notifications).await;
    let value: Value = serde_json::from_str(&forwarded.payload).unwrap();
    assert_eq!(value["uuid"], uuid);

    client
}

async fn recv_text(client: &mut PipelineClient) -> String {
    timeout(WAIT, client.recv()).await.unwrap().unwrap().unwrap()
}

#[tokio::test]
async fn registration_is_forwarded_as_pipeline_update() {
    let (relay, mut notifications) = start_relay(local_config());

    let mut client = PipelineClient::connect(relay.local_addr()).await.unwrap();
    client.send_text(r#"{"type":"graph","uuid":"abc"}"#).await.unwrap();

    let forwarded = next_notification(&mut notifications).await;
    assert_eq!(forwarded.event, "pipeline-update");
    assert_eq!(forwarded.payload, r#"{"type":"graph","uuid":"abc"}"#);
    assert!(forwarded.broadcast);

    wait_stats(&relay, |s| s.sessions_registered == 1 && s.live_sessions == 1).await;
    relay.stop().unwrap();
}

#[tokio::test]
async fn pushed_event_reaches_registered_client() {
    let (relay, mut notifications) = start_relay(local_config());
    let mut client = registered_client(&relay, &mut notifications, "abc").await;

    relay.push(r#"{"type":"status","uuid":"abc","value":1}"#);

    assert_eq!(recv_text(&mut client).await, r#"{"type":"status","uuid":"abc","value":1}"#);
    wait_stats(&relay, |s| s.events_routed == 1 && s.frames_dispatched == 1).await;
    relay.stop().unwrap();
}

#[tokio::test]
async fn event_for_unknown_pipeline_is_dropped() {
    let (relay, mut notifications) = start_relay(local_config());
    let mut client = registered_client(&relay, &mut notifications, "abc").await;

    relay.push(r#"{"type":"status","uuid":"zzz"}"#);
    wait_stats(&relay, |s| s.events_dropped == 1).await;

    // The registered client only sees its own event.
    relay.push(r#"{"type":"status","uuid":"abc"}"#);
    assert_eq!(recv_text(&mut client).await, r#"{"type":"status","uuid":"abc"}"#);
    relay.stop().unwrap();
}

#[tokio::test]
async fn disconnect_releases_identifier() {
    let (relay, mut notifications) = start_relay(local_config());
    let client = registered_client(&relay, &mut notifications, "abc").await;

    client.shutdown().await.unwrap();
    wait_stats(&relay, |s| s.sessions_closed == 1 && s.live_sessions == 0).await;

    relay.push(r#"{"type":"status","uuid":"abc"}"#);
    wait_stats(&relay, |s| s.events_dropped == 1 && s.events_routed == 0).await;
    relay.stop().unwrap();
}

#[tokio::test]
async fn malformed_message_is_forwarded_and_connection_kept() {
    let (relay, mut notifications) = start_relay(local_config());

    let mut client = PipelineClient::connect(relay.local_addr()).await.unwrap();
    client.send_text("hello").await.unwrap();

    let forwarded = next_notification(&mut notifications).await;
    assert_eq!(forwarded.payload, "hello");
    wait_stats(&relay, |s| s.messages_malformed == 1).await;

    // Same connection still registers and receives.
    client.register("abc", Value::Null).await.unwrap();
    next_notification(&mut notifications).await;
    relay.push(r#"{"type":"reset","uuid":"abc"}"#);
    assert_eq!(recv_text(&mut client).await, r#"{"type":"reset","uuid":"abc"}"#);
    relay.stop().unwrap();
}

#[tokio::test]
async fn events_are_delivered_in_push_order() {
    let (relay, mut notifications) = start_relay(local_config());
    let mut client = registered_client(&relay, &mut notifications, "abc").await;

    let pusher = relay.pusher();
    let producer = std::thread::spawn(move || {
        for n in 0..50 {
            pusher.push(json!({ "type": "status", "uuid": "abc", "seq": n }).to_string());
        }
    });
    producer.join().unwrap();

    for expected in 0..50 {
        let value: Value = serde_json::from_str(&recv_text(&mut client).await).unwrap();
        assert_eq!(value["seq"], expected);
    }
    relay.stop().unwrap();
}

#[tokio::test]
async fn events_are_routed_per_pipeline() {
    let (relay, mut notifications) = start_relay(local_config());
    let mut first = registered_client(&relay, &mut notifications, "first").await;
    let mut second = registered_client(&relay, &mut notifications, "second").await;

    relay.push(r#"{"type":"status","uuid":"second","n":1}"#);
    relay.push(r#"{"type":"status","uuid":"first","n":2}"#);

    assert_eq!(recv_text(&mut first).await, r#"{"type":"status","uuid":"first","n":2}"#);
    assert_eq!(recv_text(&mut second).await, r#"{"type":"status","uuid":"second","n":1}"#);
    relay.stop().unwrap();
}

#[tokio::test]
async fn empty_message_is_ignored() {
    let (relay, mut notifications) = start_relay(local_config());

    let mut client = PipelineClient::connect(relay.local_addr()).await.unwrap();
    client.send_text(" \n").await.unwrap();
    client.send_text(r#"{"type":"status"}"#).await.unwrap();

    // The first notification is the second message.
    assert_eq!(next_notification(&mut notifications).await.payload, r#"{"type":"status"}"#);
    relay.stop().unwrap();
}

#[tokio::test]
async fn invalid_utf8_is_forwarded_lossily() {
    let (relay, mut notifications) = start_relay(local_config());

    let mut stream = TcpStream::connect(relay.local_addr()).await.unwrap();
    stream.write_all(&3u64.to_be_bytes()).await.unwrap();
    stream.write_all(&[b'o', b'k', 0xff]).await.unwrap();

    let forwarded = next_notification(&mut notifications).await;
    assert_eq!(forwarded.payload, "ok\u{fffd}");

    // Stream is still in sync.
    write_frame(&mut stream, "after").await.unwrap();
    assert_eq!(next_notification(&mut notifications).await.payload, "after");
    relay.stop().unwrap();
}

#[tokio::test]
async fn oversized_frame_closes_session() {
    let (relay, mut notifications) = start_relay(local_config().with_max_frame_size(16));

    let mut client = PipelineClient::connect(relay.local_addr()).await.unwrap();
    client.send_text(&"x".repeat(64)).await.unwrap();

    wait_stats(&relay, |s| s.sessions_closed == 1).await;
    assert!(notifications.try_recv().is_err());
    relay.stop().unwrap();
}

#[tokio::test]
async fn stop_closes_listener_and_sessions() {
    let (relay, mut notifications) = start_relay(local_config());
    let addr = relay.local_addr();
    let mut client = registered_client(&relay, &mut notifications, "abc").await;

    relay.push(r#"{"type":"status","uuid":"unknown"}"#);
    relay.stop().unwrap();

    assert!(timeout(WAIT, client.recv()).await.unwrap().unwrap().is_none());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn stop_waits_for_frame_in_progress() {
    let (relay, mut notifications) = start_relay(local_config());

    let mut stream = TcpStream::connect(relay.local_addr()).await.unwrap();
    let frame = [&5u64.to_be_bytes()[..], b"hello"].concat();
    stream.write_all(&frame[..3]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = tokio::task::spawn_blocking(move || relay.stop());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!stopping.is_finished(), "stop returned while a frame was half read");

    stream.write_all(&frame[3..]).await.unwrap();
    timeout(WAIT, stopping).await.unwrap().unwrap().unwrap();
    assert_eq!(next_notification(&mut notifications).await.payload, "hello");
}

#[tokio::test]
async fn custom_event_name() {
    let (relay, mut notifications) = start_relay(local_config().with_event_name("graph-update"));

    let mut client = PipelineClient::connect(relay.local_addr()).await.unwrap();
    client.send_text(r#"{"type":"status"}"#).await.unwrap();

    assert_eq!(next_notification(&mut notifications).await.event, "graph-update");
    relay.stop().unwrap();
}

#[test]
fn second_relay_on_same_port_fails_to_start() {
    let (relay, _notifications) = start_relay(local_config());
    let port = relay.local_addr().port();

    let err = RelayHandle::start(RelayConfig::new("127.0.0.1", port), ChannelSink::new().0)
        .unwrap_err();
    assert!(matches!(err, ServerError::Config(_)));
    relay.stop().unwrap();
}
