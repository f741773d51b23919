mod common;

use common::{
    accept, accept_and_ack, audio_fragment, channel_transport, drain, next_matching, test_session_config,
    wait_until, TestDevices, WAIT,
};
use loqa_live::audio::convert::f32_to_i16;
use loqa_live::audio::OutputDevice;
use loqa_live::protocol::{decode_pcm, ChannelTransport, ConnectionStatus, RemoteEnd};
use loqa_live::{ChannelObserver, Persona, SessionController, SessionError, SessionEvent};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const FRAME: usize = 1600;

struct Harness {
    controller: SessionController,
    devices: Arc<TestDevices>,
    transport: Arc<ChannelTransport>,
    accepted: UnboundedReceiver<RemoteEnd>,
    events: UnboundedReceiver<SessionEvent>,
}

fn harness() -> Harness {
    let (transport, accepted) = channel_transport();
    let devices = TestDevices::new();
    let (observer, events) = ChannelObserver::new();
    let controller = SessionController::new(
        test_session_config(FRAME),
        transport.clone(),
        devices.clone(),
        Arc::new(observer),
    );
    Harness {
        controller,
        devices,
        transport,
        accepted,
        events,
    }
}

fn persona() -> Persona {
    Persona {
        id: "tutor".to_string(),
        name: "Tutor".to_string(),
        description: String::new(),
        system_instructions: "Speak slowly and correct mistakes.".to_string(),
    }
}

/// Start a session and complete the handshake
async fn live(h: &mut Harness) -> RemoteEnd {
    h.controller.start_session(&persona()).await.unwrap();
    let (remote, setup) = accept_and_ack(&mut h.accepted).await;
    assert_eq!(setup["setup"]["systemInstructions"], "Speak slowly and correct mistakes.");
    next_matching(&mut h.events, |e| *e == SessionEvent::SetupComplete).await;
    remote
}

async fn next_chunk(remote: &mut RemoteEnd) -> Vec<i16> {
    let sent = tokio::time::timeout(WAIT, remote.recv_json())
        .await
        .expect("timed out waiting for a chunk")
        .expect("client hung up");
    assert_eq!(sent["mimeType"], "audio/pcm");
    decode_pcm(sent["chunk"].as_str().unwrap()).unwrap()
}

/// Events observed up to and including the marker transcript
async fn sync(h: &mut Harness, remote: &RemoteEnd, marker: &str) -> Vec<SessionEvent> {
    assert!(remote.send_json(json!({ "kind": "transcript", "text": marker })).await);
    let expected = SessionEvent::Transcript(marker.to_string());
    let mut seen = Vec::new();
    next_matching(&mut h.events, |e| {
        seen.push(e.clone());
        *e == expected
    })
    .await;
    seen
}

fn speaking(events: &[SessionEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Speaking(value) => Some(*value),
            _ => None,
        })
        .collect()
}

fn assert_released(h: &Harness) {
    assert!(!h.controller.is_active());
    assert_eq!(h.transport.open_links(), 0);
    assert_eq!(h.devices.active_captures(), 0);
    assert!(!h.devices.output.is_open());
}

#[tokio::test]
async fn test_session_streams_microphone_audio() {
    let mut h = harness();
    let mut remote = live(&mut h).await;

    let session_id = h.controller.session_id().unwrap().to_string();
    assert!(session_id.starts_with("session-"));
    assert_eq!(h.controller.status(), ConnectionStatus::Connected);

    assert_eq!(h.devices.push(&vec![0.0; FRAME]), 1);
    assert_eq!(next_chunk(&mut remote).await, vec![0i16; FRAME]);

    let ramp: Vec<f32> = (0..FRAME).map(|i| (i as f32 / FRAME as f32) * 1.6 - 0.8).collect();
    h.devices.push(&ramp);
    let expected: Vec<i16> = ramp.iter().map(|s| f32_to_i16(*s)).collect();
    assert_eq!(next_chunk(&mut remote).await, expected);

    assert_eq!(
        next_matching(&mut h.events, |e| matches!(e, SessionEvent::InputLevel(_))).await,
        SessionEvent::InputLevel(0.0)
    );

    wait_until(|| h.controller.stats().map(|s| s.frames_sent == 2).unwrap_or(false)).await;
    let stats = h.controller.stats().unwrap();
    assert_eq!(stats.session_id, session_id);
    assert_eq!(stats.persona_id, "tutor");
    assert_eq!(stats.frames_captured, 2);
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.frames_gated, 0);
    assert_eq!(stats.frames_unsent, 0);

    h.controller.stop_session().await.unwrap();
    assert_released(&h);
}

#[tokio::test]
async fn test_microphone_is_gated_while_model_speaks() {
    let mut h = harness();
    let mut remote = live(&mut h).await;

    assert!(remote.send_json(json!({ "kind": "turnState", "speaking": true })).await);
    for _ in 0..3 {
        assert!(remote.send_json(audio_fragment(&[3000; 240])).await);
    }
    assert!(remote.send_json(json!({ "kind": "turnState", "speaking": false })).await);
    let seen = sync(&mut h, &remote, "sentinel").await;
    assert_eq!(speaking(&seen), vec![true]);

    // Turn over but audio still audible: the gate stays closed
    for _ in 0..4 {
        h.devices.push(&vec![0.25; FRAME]);
    }
    wait_until(|| h.controller.stats().map(|s| s.frames_gated == 4).unwrap_or(false)).await;
    let stats = h.controller.stats().unwrap();
    assert_eq!(stats.frames_sent, 0);
    assert!(stats.speaking);
    assert_eq!(stats.fragments_received, 3);
    assert!(remote.from_client.try_recv().is_err());

    h.devices.output.advance(Duration::from_secs(1));

    assert_eq!(
        next_matching(&mut h.events, |e| matches!(e, SessionEvent::Speaking(_))).await,
        SessionEvent::Speaking(false)
    );

    let stats = h.controller.stats().unwrap();
    assert_eq!(stats.fragments_queued, 0);
    assert_eq!(stats.fragments_played, 3);
    assert!(!stats.speaking);

    // Gate open again: the next frame goes out
    h.devices.push(&vec![0.0; FRAME]);
    assert_eq!(next_chunk(&mut remote).await.len(), FRAME);

    h.controller.stop_session().await;
    assert_released(&h);
}

#[tokio::test]
async fn test_frames_before_connect_are_not_sent() {
    let mut h = harness();
    h.controller.start_session(&persona()).await.unwrap();
    let mut remote = accept(&mut h.accepted).await;
    remote.recv_json().await.unwrap();

    h.devices.push(&vec![0.1; FRAME * 2]);
    wait_until(|| h.controller.stats().map(|s| s.frames_unsent == 2).unwrap_or(false)).await;

    let stats = h.controller.stats().unwrap();
    assert_eq!(stats.frames_captured, 2);
    assert_eq!(stats.frames_sent, 0);
    assert_eq!(stats.frames_gated, 0);
    assert!(remote.from_client.try_recv().is_err());

    h.controller.stop_session().await;
    assert_released(&h);
}

#[tokio::test]
async fn test_stop_while_connecting_releases_everything() {
    let mut h = harness();
    h.controller.start_session(&persona()).await.unwrap();
    let _remote = accept(&mut h.accepted).await;
    assert_eq!(h.controller.status(), ConnectionStatus::Connecting);

    let stats = h.controller.stop_session().await.unwrap();
    assert_eq!(stats.status, ConnectionStatus::Disconnected);
    assert_released(&h);
    assert_eq!(h.devices.output.close_count(), 1);

    let events = drain(&mut h.events);
    assert!(events.contains(&SessionEvent::Status(ConnectionStatus::Disconnected)));
    assert!(!events.contains(&SessionEvent::SetupComplete));
}

#[tokio::test]
async fn test_stop_while_speaking_clears_playback() {
    let mut h = harness();
    let remote = live(&mut h).await;

    assert!(remote.send_json(audio_fragment(&[5000; 24000])).await);
    sync(&mut h, &remote, "playing").await;
    assert!(h.controller.stats().unwrap().speaking);

    let stats = h.controller.stop_session().await.unwrap();
    assert_eq!(stats.fragments_queued, 0);
    assert!(!stats.speaking);
    assert_released(&h);

    let events = drain(&mut h.events);
    assert!(events.contains(&SessionEvent::Speaking(false)));
    assert!(h.devices.output.flush_count() >= 1);
}

#[tokio::test]
async fn test_stop_after_connection_failure() {
    let mut h = harness();
    h.transport.refuse_connections(true);
    h.controller.start_session(&persona()).await.unwrap();

    assert!(matches!(
        next_matching(&mut h.events, |e| matches!(e, SessionEvent::Error(_))).await,
        SessionEvent::Error(SessionError::TransportUnavailable(_))
    ));
    assert!(h.controller.is_active());
    assert_eq!(h.devices.active_captures(), 1);

    h.controller.stop_session().await.unwrap();
    assert_released(&h);
}

#[tokio::test]
async fn test_stop_without_session_is_noop() {
    let mut h = harness();
    assert!(h.controller.stop_session().await.is_none());
    assert!(h.controller.stats().is_none());
    assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);

    let _remote = live(&mut h).await;
    assert!(h.controller.stop_session().await.is_some());
    assert!(h.controller.stop_session().await.is_none());
    assert_released(&h);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let mut h = harness();
    let _remote = live(&mut h).await;
    let first = h.controller.session_id().unwrap().to_string();

    assert_eq!(
        h.controller.start_session(&persona()).await,
        Err(SessionError::AlreadyActive)
    );
    assert_eq!(h.controller.session_id(), Some(first.as_str()));
    assert_eq!(h.transport.total_opened(), 1);
    assert_eq!(h.devices.outputs_opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.devices.active_captures(), 1);

    h.controller.stop_session().await;
    assert_released(&h);
}

#[tokio::test]
async fn test_denied_capture_acquires_nothing() {
    let mut h = harness();
    h.devices.deny_capture.store(true, Ordering::SeqCst);

    assert!(matches!(
        h.controller.start_session(&persona()).await,
        Err(SessionError::CaptureUnavailable(_))
    ));
    assert!(!h.controller.is_active());
    assert_eq!(h.transport.total_opened(), 0);
    assert_eq!(h.devices.outputs_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_capture_start_releases_output() {
    let mut h = harness();
    h.devices.fail_capture_start.store(true, Ordering::SeqCst);

    match h.controller.start_session(&persona()).await {
        Err(SessionError::CaptureUnavailable(message)) => {
            assert!(message.contains("permission denied"), "{}", message)
        }
        other => panic!("expected CaptureUnavailable, got {:?}", other),
    }
    assert!(!h.controller.is_active());
    assert_eq!(h.transport.total_opened(), 0);
    assert_eq!(h.devices.active_captures(), 0);
    assert_eq!(h.devices.output.close_count(), 1);
    assert!(drain(&mut h.events).is_empty());
}
