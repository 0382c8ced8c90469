//! Common test utilities and a simulated belt

// Shared across test files, not every item is used in each
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[allow(unused_imports)]
pub use navibelt_lib::{BeltConfig, BeltController, BeltError, BeltEvent, BeltMode, ParameterId, VibrationParams};

/// Route library logs to the test output, filtered by RUST_LOG.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Decode hex string to bytes for testing
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data.replace(' ', "")).expect("Failed to decode hex")
}

/// Config with short timeouts so failing waits end quickly
pub fn fast_config() -> BeltConfig {
    BeltConfig {
        ack_timeout: Duration::from_millis(200),
        handshake_timeout: Duration::from_millis(200),
        join_timeout: Duration::from_secs(1),
        ..BeltConfig::default()
    }
}

/// How the simulated belt behaves.
#[derive(Debug, Clone)]
pub struct BeltBehaviour {
    pub firmware_version: u8,
    pub mode: u8,
    pub default_intensity: u8,
    /// Answer parameter queries
    pub answer_queries: bool,
    /// Acknowledge vibration and stop commands
    pub ack_commands: bool,
}

impl Default for BeltBehaviour {
    fn default() -> Self {
        Self {
            firmware_version: 35,
            mode: 0,
            default_intensity: 50,
            answer_queries: true,
            ack_commands: true,
        }
    }
}

/// Device side of an in-memory belt connection.
///
/// Records every frame the host sends and answers like the firmware does.
/// Frames pushed with [`SimulatedBelt::inject`] are written unsolicited.
pub struct SimulatedBelt {
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    inject: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl SimulatedBelt {
    /// Start a belt and return it with the host end of the stream.
    pub fn start(behaviour: BeltBehaviour) -> (Self, DuplexStream) {
        let (host, device) = tokio::io::duplex(1024);
        let received = Arc::new(Mutex::new(Vec::new()));
        let (inject, injected) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_belt(device, behaviour, Arc::clone(&received), injected));
        (
            Self {
                received,
                inject: Some(inject),
                task,
            },
            host,
        )
    }

    /// Frames received from the host so far.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    /// Received frames, excluding the handshake queries.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.received().into_iter().filter(|frame| frame[0] != 0x90).collect()
    }

    pub fn inject(&self, bytes: &[u8]) {
        if let Some(inject) = &self.inject {
            inject.send(bytes.to_vec()).unwrap();
        }
    }

    /// Close the device end of the stream.
    pub async fn hang_up(mut self) {
        self.inject.take();
        self.task.await.unwrap();
    }

    /// Wait until a frame starting with `id` arrives from the host.
    pub async fn wait_for(&self, id: u8) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(frame) = self.received().into_iter().find(|f| f[0] == id) {
                    return frame;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frame not received")
    }
}

async fn run_belt(
    mut stream: DuplexStream,
    mut behaviour: BeltBehaviour,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    mut injected: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    loop {
        let mut first = [0u8; 1];
        tokio::select! {
            read = stream.read_exact(&mut first) => {
                if read.is_err() {
                    return;
                }
            }
            bytes = injected.recv() => match bytes {
                Some(bytes) => {
                    if stream.write_all(&bytes).await.is_err() {
                        return;
                    }
                    continue;
                }
                None => return,
            },
        }

        let len = if first[0] == 0x87 { 7 } else { 6 };
        let mut frame = vec![0u8; len];
        frame[0] = first[0];
        if stream.read_exact(&mut frame[1..]).await.is_err() {
            return;
        }
        received.lock().unwrap().push(frame.clone());

        let reply = match frame[0] {
            0x90 if behaviour.answer_queries => {
                let value = match frame[1] {
                    0x02 => behaviour.firmware_version,
                    0x08 => behaviour.mode,
                    0x09 => behaviour.default_intensity,
                    _ => 0,
                };
                Some([0xD0, frame[1], value, 0xAA, 0xAA, 0x0A])
            }
            0x91 => {
                behaviour.mode = frame[2];
                Some([0xD1, 0x08, frame[2], 0xAA, 0xAA, 0x0A])
            }
            0x84..=0x88 if behaviour.ack_commands => Some([frame[0] + 0x40, 0x00, 0x00, 0x00, 0x00, 0x0A]),
            _ => None,
        };
        if let Some(reply) = reply {
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

/// Observer collecting every event it is handed.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<BeltEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<BeltEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `count` events were delivered.
    pub async fn wait_for_events(&self, count: usize) -> Vec<BeltEvent> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let events = self.events();
                if events.len() >= count {
                    return events;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("events not delivered")
    }
}

impl navibelt_lib::BeltObserver for RecordingObserver {
    fn on_mode_change(&self, event: &BeltEvent) -> Result<(), navibelt_lib::ObserverError> {
        self.events.lock().unwrap().push(*event);
        Ok(())
    }
}
