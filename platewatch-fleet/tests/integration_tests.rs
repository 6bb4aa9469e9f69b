//! End-to-end tests driving a device session over an in-memory transport:
//! handshake, event relay to dashboard subscribers, and the signed
//! command path, with a scripted device on the far side of the pipe.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use platewatch_core::models::{CameraId, DashboardSessionId, DeviceId, Role, StreamKind};
use platewatch_fleet::registry::ConnectionRegistry;
use platewatch_fleet::signer::CommandSigner;
use platewatch_fleet::{DeviceSession, RelayEvent, RelayHub, SessionHandle, SessionState};

const DELIMITER: &[u8] = b"<END>";

struct Fixture {
    handle: SessionHandle,
    device: DuplexStream,
    hub: Arc<RelayHub>,
    registry: Arc<ConnectionRegistry>,
    _task: tokio::task::JoinHandle<platewatch_fleet::Result<()>>,
}

/// Wire up a session for device "lpr-1" (token "tok123") over a duplex
/// pipe and register it, the way a supervisor would.
fn fixture() -> Fixture {
    let (local, device) = tokio::io::duplex(1024 * 1024);
    let hub = Arc::new(RelayHub::new(Duration::from_secs(1)));
    let registry = Arc::new(ConnectionRegistry::new());
    let signer = Arc::new(CommandSigner::new("integration-key").expect("signer"));

    let (session, handle) = DeviceSession::new(
        DeviceId::from("lpr-1"),
        "tok123".to_string(),
        signer,
        hub.clone(),
        Duration::from_secs(30),
    );
    registry.insert(DeviceId::from("lpr-1"), handle.clone());
    let task = tokio::spawn(session.run(local));

    Fixture {
        handle,
        device,
        hub,
        registry,
        _task: task,
    }
}

async fn read_frame(device: &mut DuplexStream) -> Value {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        device.read_exact(&mut byte).await.expect("read");
        buf.push(byte[0]);
        if buf.ends_with(DELIMITER) {
            buf.truncate(buf.len() - DELIMITER.len());
            return serde_json::from_slice(&buf).expect("frame json");
        }
    }
}

async fn write_frame(device: &mut DuplexStream, value: &Value) {
    let mut bytes = serde_json::to_vec(value).expect("serialize");
    bytes.extend_from_slice(DELIMITER);
    device.write_all(&bytes).await.expect("write");
}

/// Complete the handshake from the device side and wait for `Ready`
async fn authenticate(fixture: &mut Fixture) {
    let auth = read_frame(&mut fixture.device).await;
    assert_eq!(auth["messageType"], json!("authentication"));
    assert_eq!(auth["messageBody"]["token"], json!("tok123"));

    let auth_id = auth["messageId"].as_str().expect("auth id").to_string();
    write_frame(
        &mut fixture.device,
        &json!({
            "messageId": "m1",
            "messageType": "acknowledge",
            "messageBody": {"replyTo": auth_id}
        }),
    )
    .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.handle.state() != SessionState::Ready {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session must reach Ready");
}

#[tokio::test]
async fn test_device_to_dashboard_plates_flow() {
    let mut fixture = fixture();

    // Dashboard operator subscribed to plates for camera "1"
    let session_id = DashboardSessionId::from("dash-1");
    let mut rx = fixture.hub.register_session(session_id.clone(), Role::Operator);
    fixture
        .hub
        .subscribe(&session_id, StreamKind::Plates, CameraId::from("1"))
        .expect("subscribe");
    let ack = rx.recv().await.expect("subscription ack");
    assert_eq!(ack.event_type(), "request_acknowledged");

    authenticate(&mut fixture).await;
    assert_eq!(
        fixture
            .registry
            .get(&DeviceId::from("lpr-1"))
            .expect("registered")
            .state(),
        SessionState::Ready
    );

    // Device reports one car on camera "1"
    write_frame(
        &mut fixture.device,
        &json!({
            "messageId": "m2",
            "messageType": "plates_data",
            "messageBody": {
                "timestamp": 1_730_000_000,
                "camera_id": "1",
                "cars": [{
                    "plate": {"plate": "XYZ789", "plate_image": "crop"},
                    "ocr_accuracy": 0.93,
                    "vision_speed": 37.0
                }]
            }
        }),
    )
    .await;

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery")
        .expect("open channel");
    let RelayEvent::Plates(plates) = event else {
        panic!("expected plates event, got {}", event.event_type());
    };
    assert_eq!(plates.camera_id.as_str(), "1");
    assert_eq!(plates.cars.len(), 1);
    assert_eq!(plates.cars[0].plate_number, "XYZ789");
    assert_eq!(plates.cars[0].plate_image, "crop");
}

#[tokio::test]
async fn test_unsubscribed_camera_not_delivered() {
    let mut fixture = fixture();

    let session_id = DashboardSessionId::from("dash-1");
    let mut rx = fixture.hub.register_session(session_id.clone(), Role::Operator);
    fixture
        .hub
        .subscribe(&session_id, StreamKind::Plates, CameraId::from("9"))
        .expect("subscribe");
    let _ = rx.recv().await;

    authenticate(&mut fixture).await;

    write_frame(
        &mut fixture.device,
        &json!({
            "messageId": "m2",
            "messageType": "plates_data",
            "messageBody": {"camera_id": "7", "cars": []}
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        rx.try_recv().is_err(),
        "camera 7 event must not reach a camera 9 subscriber"
    );
}

#[tokio::test]
async fn test_command_round_trip_with_valid_signature() {
    let mut fixture = fixture();
    authenticate(&mut fixture).await;

    fixture
        .handle
        .send_command(
            &platewatch_fleet::signer::OutboundCommand::new(
                "open_gate",
                CameraId::from("1"),
                json!({"duration": 5}),
            )
            .expect("command"),
        )
        .expect("send");

    let frame = read_frame(&mut fixture.device).await;
    assert_eq!(frame["messageType"], json!("command"));

    // Device-side verification over the exact serialized data bytes
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(b"integration-key").expect("hmac");
    mac.update(
        serde_json::to_string(&frame["messageBody"]["data"])
            .expect("serialize")
            .as_bytes(),
    );
    let expected = hex::encode(mac.finalize().into_bytes());
    assert_eq!(frame["messageBody"]["hmac"], json!(expected));
}

#[tokio::test]
async fn test_live_frames_sampled_not_queued() {
    let mut fixture = fixture();

    let session_id = DashboardSessionId::from("dash-1");
    let mut rx = fixture.hub.register_session(session_id.clone(), Role::Admin);
    fixture
        .hub
        .subscribe(&session_id, StreamKind::Live, CameraId::from("7"))
        .expect("subscribe");
    let _ = rx.recv().await;

    authenticate(&mut fixture).await;

    // Two frames in quick succession: only the first is delivered
    for n in 0..2 {
        write_frame(
            &mut fixture.device,
            &json!({
                "messageId": format!("m{n}"),
                "messageType": "live",
                "messageBody": {"live_image": format!("frame-{n}"), "camera_id": "7"}
            }),
        )
        .await;
    }

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery")
        .expect("open channel");
    let RelayEvent::Live(frame) = event else {
        panic!("expected live event, got {}", event.event_type());
    };
    assert_eq!(frame.live_image, "frame-0");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "second frame must be sampled away");
}
