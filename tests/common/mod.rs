#![allow(dead_code)]

use anyhow::{bail, Result};
use base64::Engine;
use loqa_live::audio::{AudioBackend, AudioBackendConfig, AudioDevices, OutputDevice, SampleFramer, VirtualOutput};
use loqa_live::protocol::{ChannelTransport, RemoteEnd};
use loqa_live::session::{ProtocolConfig, SessionConfig, SessionEvent};
use loqa_live::WireDialect;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const WAIT: Duration = Duration::from_secs(5);

/// Capture backend driven by the test instead of a device
pub struct ManualBackend {
    framer: Arc<Mutex<Option<SampleFramer>>>,
    active: Arc<AtomicUsize>,
    fail_start: bool,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioBackend for ManualBackend {
    async fn start(&mut self, framer: SampleFramer) -> Result<()> {
        if self.fail_start {
            bail!("microphone permission denied");
        }
        *self.framer.lock().unwrap() = Some(framer);
        self.active.fetch_add(1, Ordering::SeqCst);
        self.capturing = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.capturing {
            self.framer.lock().unwrap().take();
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.capturing = false;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "manual"
    }
}

/// Device provider for tests: manual capture plus a manual-clock output
pub struct TestDevices {
    framer: Arc<Mutex<Option<SampleFramer>>>,
    active_captures: Arc<AtomicUsize>,
    pub output: Arc<VirtualOutput>,
    pub deny_capture: AtomicBool,
    pub fail_capture_start: AtomicBool,
    pub outputs_opened: AtomicUsize,
}

impl TestDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            framer: Arc::new(Mutex::new(None)),
            active_captures: Arc::new(AtomicUsize::new(0)),
            output: Arc::new(VirtualOutput::manual()),
            deny_capture: AtomicBool::new(false),
            fail_capture_start: AtomicBool::new(false),
            outputs_opened: AtomicUsize::new(0),
        })
    }

    /// Feed samples as if the microphone produced them
    pub fn push(&self, samples: &[f32]) -> usize {
        match self.framer.lock().unwrap().as_mut() {
            Some(framer) => framer.push(samples),
            None => 0,
        }
    }

    pub fn active_captures(&self) -> usize {
        self.active_captures.load(Ordering::SeqCst)
    }
}

impl AudioDevices for TestDevices {
    fn open_capture(&self, _config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        if self.deny_capture.load(Ordering::SeqCst) {
            bail!("no input device");
        }
        Ok(Box::new(ManualBackend {
            framer: Arc::clone(&self.framer),
            active: Arc::clone(&self.active_captures),
            fail_start: self.fail_capture_start.load(Ordering::SeqCst),
            capturing: false,
        }))
    }

    fn open_output(&self) -> Result<Arc<dyn OutputDevice>> {
        self.outputs_opened.fetch_add(1, Ordering::SeqCst);
        let output: Arc<dyn OutputDevice> = self.output.clone();
        Ok(output)
    }
}

pub fn test_session_config(frame_size: usize) -> SessionConfig {
    SessionConfig {
        sample_rate: 16000,
        frame_size,
        capture_queue_depth: 64,
        output_sample_rate: 24000,
        realtime_input: false,
        playback_tick: Duration::from_millis(5),
        protocol: test_protocol_config(),
    }
}

pub fn test_protocol_config() -> ProtocolConfig {
    ProtocolConfig {
        model: "models/test".to_string(),
        dialect: WireDialect::Generic,
        handshake_timeout: Duration::from_secs(5),
        ..ProtocolConfig::default()
    }
}

pub async fn accept(accepted: &mut UnboundedReceiver<RemoteEnd>) -> RemoteEnd {
    tokio::time::timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

/// Accept one connection, read the setup message and acknowledge it
pub async fn accept_and_ack(
    accepted: &mut UnboundedReceiver<RemoteEnd>,
) -> (RemoteEnd, serde_json::Value) {
    let mut remote = accept(accepted).await;
    let setup = tokio::time::timeout(WAIT, remote.recv_json())
        .await
        .expect("timed out waiting for setup")
        .expect("client hung up before setup");
    assert!(remote.send_json(json!({ "kind": "setupComplete" })).await);
    (remote, setup)
}

pub fn audio_fragment(samples: &[i16]) -> serde_json::Value {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    json!({
        "kind": "audioFragment",
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Next event matching `pred`, skipping the rest
pub async fn next_matching(
    events: &mut UnboundedReceiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("observer dropped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

/// Drain everything currently queued on the observer channel
pub fn drain(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn channel_transport() -> (Arc<ChannelTransport>, UnboundedReceiver<RemoteEnd>) {
    let (transport, accepted) = ChannelTransport::new(64);
    (Arc::new(transport), accepted)
}
