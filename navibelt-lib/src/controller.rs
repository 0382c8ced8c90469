//! The belt protocol state machine and the public command API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{
    CommandCodec, EncodedCommand, HANDSHAKE_PARAMETERS, VibrationParams, codec_for_firmware, encode_mode_switch,
    encode_parameter_query,
};
use crate::config::BeltConfig;
use crate::discovery::{BeltDiscovery, find_belt_address};
use crate::error::{BeltError, Result};
use crate::listener;
use crate::notifier::{self, BeltObserver, EventQueue};
use crate::orientation::{Orientation, angle_to_index};
use crate::transport::{BeltAddress, BeltStream, Transport};
use crate::types::{BeltMode, ParameterId, StopTarget};

/// What the handshake learned about the belt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReport {
    pub mode: BeltMode,
    pub firmware_version: Option<u8>,
    pub default_intensity: Option<u8>,
    /// Parameters the belt did not report in time
    pub missing: Vec<ParameterId>,
}

impl HandshakeReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(BeltError::HandshakeIncomplete { missing: self.missing })
        }
    }
}

struct PendingAck {
    expected_id: u8,
    satisfied: oneshot::Sender<()>,
}

struct Session {
    id: u64,
    transport: Arc<Transport>,
    shutdown: watch::Sender<bool>,
    listener: Option<JoinHandle<()>>,
    notifier: Option<JoinHandle<()>>,
}

/// Everything the listener writes and command callers read.
struct ConnectionState {
    session: Option<Session>,
    mode: BeltMode,
    firmware_version: Option<u8>,
    default_intensity: Option<u8>,
    codec: Option<&'static dyn CommandCodec>,
    pending_ack: Option<PendingAck>,
    events: Option<EventQueue>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            session: None,
            mode: BeltMode::Unknown,
            firmware_version: None,
            default_intensity: None,
            codec: None,
            pending_ack: None,
            events: None,
        }
    }
}

pub(crate) struct Inner {
    config: BeltConfig,
    orientation: Orientation,
    observer: Option<Arc<dyn BeltObserver>>,
    state: Mutex<ConnectionState>,
    next_session_id: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Result<Arc<Transport>> {
        self.state()
            .session
            .as_ref()
            .map(|session| Arc::clone(&session.transport))
            .ok_or(BeltError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.state().session.is_some()
    }

    /// Codec and cached mode, once the firmware version is known.
    fn codec(&self) -> Result<(&'static dyn CommandCodec, BeltMode)> {
        let state = self.state();
        if state.session.is_none() {
            return Err(BeltError::NotConnected);
        }
        let codec = state.codec.ok_or_else(|| BeltError::HandshakeIncomplete {
            missing: vec![ParameterId::FirmwareVersion],
        })?;
        Ok((codec, state.mode))
    }

    async fn send(&self, command: &EncodedCommand) -> Result<()> {
        let transport = self.transport()?;
        debug!(command = ?command.command, "Sending belt command");
        if let Err(e) = transport.send(&command.frame).await {
            warn!("Failed to send {:?}: {}", command.command, e);
            self.teardown(None, false).await;
            return Err(e);
        }
        Ok(())
    }

    /// Send and block until the matching ACK arrives or `timeout` elapses.
    /// The send is never retried.
    async fn send_and_wait(&self, command: &EncodedCommand, timeout: Duration) -> Result<()> {
        let ack_id = command.ack_id;
        let deadline = Instant::now() + timeout;
        let (satisfied, ack) = oneshot::channel();
        self.state().pending_ack = Some(PendingAck {
            expected_id: ack_id,
            satisfied,
        });
        self.send(command).await?;

        match tokio::time::timeout_at(deadline, ack).await {
            Ok(Ok(())) => {
                debug!(ack_id, "ACK received");
                Ok(())
            }
            Ok(Err(_)) if !self.is_connected() => Err(BeltError::Disconnected { ack_id }),
            Ok(Err(_)) => {
                // a newer wait took over the slot; this one can only expire
                tokio::time::sleep_until(deadline).await;
                Err(BeltError::AckTimeout { ack_id, timeout })
            }
            Err(_) => {
                warn!(ack_id, ?timeout, "ACK not received");
                let mut state = self.state();
                if state.pending_ack.as_ref().is_some_and(|p| p.satisfied.is_closed()) {
                    state.pending_ack = None;
                }
                Err(BeltError::AckTimeout { ack_id, timeout })
            }
        }
    }

    async fn execute(&self, command: &EncodedCommand, wait_ack: bool) -> Result<()> {
        if wait_ack {
            self.send_and_wait(command, self.config.ack_timeout).await
        } else {
            self.send(command).await
        }
    }

    pub(crate) fn ack_received(&self, id: u8) {
        let mut state = self.state();
        if state.pending_ack.as_ref().is_some_and(|p| p.expected_id == id) {
            if let Some(pending) = state.pending_ack.take() {
                // the waiter may already have timed out
                let _ = pending.satisfied.send(());
            }
        }
    }

    /// Record a mode reported by the belt. Emits an event when the mode
    /// changed, or for a button press that left the mode unchanged.
    pub(crate) fn apply_mode(&self, mode: BeltMode, button_id: u8, press_type: u8) {
        let mut state = self.state();
        let changed = state.mode != mode;
        if changed {
            info!(from = %state.mode, to = %mode, button_id, "Belt mode changed");
            state.mode = mode;
        }
        if changed || button_id > 0 {
            if let Some(events) = state.events.as_mut() {
                events.push(mode, button_id, press_type);
            }
        }
    }

    pub(crate) fn apply_firmware_version(&self, version: u8) {
        let mut state = self.state();
        if state.firmware_version != Some(version) {
            info!(version, "Belt firmware version");
        }
        state.firmware_version = Some(version);
        state.codec = Some(codec_for_firmware(version));
    }

    pub(crate) fn apply_default_intensity(&self, intensity: u8) {
        let mut state = self.state();
        debug!(intensity, "Belt default intensity");
        state.default_intensity = Some(intensity);
    }

    /// Stop the connection. Only the first caller does the work; later calls
    /// (or a listener of an older session) find nothing to tear down.
    pub(crate) async fn teardown(&self, session_id: Option<u64>, join: bool) {
        let (session, events) = {
            let mut state = self.state();
            match (&state.session, session_id) {
                (None, _) => return,
                (Some(current), Some(id)) if current.id != id => return,
                _ => {}
            }
            let Some(session) = state.session.take() else {
                return;
            };
            let previous_mode = std::mem::replace(&mut state.mode, BeltMode::Unknown);
            state.firmware_version = None;
            state.default_intensity = None;
            state.codec = None;
            // dropping the sender releases a blocked ACK wait
            state.pending_ack = None;
            let mut events = state.events.take();
            if previous_mode != BeltMode::Unknown {
                if let Some(events) = events.as_mut() {
                    events.push(BeltMode::Unknown, 0, 0);
                }
            }
            (session, events)
        };

        info!(session_id = session.id, "Disconnecting belt");
        let _ = session.shutdown.send(true);
        // the notifier drains what is queued, then stops
        drop(events);
        session.transport.disconnect().await;

        if join {
            let timeout = self.config.join_timeout;
            if let Some(listener) = session.listener {
                join_task("listener", listener, timeout).await;
            }
            if let Some(notifier) = session.notifier {
                join_task("notifier", notifier, timeout).await;
            }
        }
    }
}

async fn join_task(name: &str, handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => debug!("Belt {} joined", name),
        Ok(Err(e)) => warn!("Belt {} task failed: {}", name, e),
        Err(_) => warn!("Belt {} did not stop within {:?}", name, timeout),
    }
}

/// Client of one haptic belt.
///
/// Commands are issued from the caller's task; a listener task reads the
/// belt and a notifier thread delivers events to the optional observer.
/// Blocking (`wait_ack`) commands must be serialised by the caller: only the
/// most recent one can be acknowledged.
pub struct BeltController {
    inner: Arc<Inner>,
}

impl BeltController {
    pub fn new(config: BeltConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_observer(config: BeltConfig, observer: Arc<dyn BeltObserver>) -> Self {
        Self::build(config, Some(observer))
    }

    fn build(config: BeltConfig, observer: Option<Arc<dyn BeltObserver>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                orientation: config.orientation(),
                config,
                observer,
                state: Mutex::new(ConnectionState::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    pub fn config(&self) -> &BeltConfig {
        &self.inner.config
    }

    /// Connect to `address`, dropping any previous connection first.
    pub async fn connect(&self, address: &BeltAddress) -> Result<HandshakeReport> {
        self.disconnect(false).await;
        let transport = Transport::connect(address).await?;
        self.start(transport).await
    }

    /// Connect to the first belt `discovery` reports under the configured name.
    pub async fn connect_discovered(&self, discovery: &dyn BeltDiscovery) -> Result<HandshakeReport> {
        let address = find_belt_address(discovery, Some(&self.inner.config.belt_name))?;
        self.connect(&address).await
    }

    /// Connect over an already open stream.
    pub async fn connect_stream<S: BeltStream + 'static>(&self, stream: S) -> Result<HandshakeReport> {
        self.disconnect(false).await;
        self.start(Transport::from_stream(stream)).await
    }

    async fn start(&self, transport: Transport) -> Result<HandshakeReport> {
        let transport = Arc::new(transport);
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (events, notifier) = match &self.inner.observer {
            Some(observer) => {
                let (events, handle) = notifier::spawn(Arc::clone(observer));
                (Some(events), Some(handle))
            }
            None => (None, None),
        };
        {
            let mut state = self.inner.state();
            state.events = events;
            state.session = Some(Session {
                id,
                transport: Arc::clone(&transport),
                shutdown,
                listener: None,
                notifier,
            });
        }

        let handle = tokio::spawn(listener::run(Arc::clone(&self.inner), transport, id, shutdown_rx));
        if let Some(session) = self.inner.state().session.as_mut().filter(|s| s.id == id) {
            session.listener = Some(handle);
        }

        info!(session_id = id, "Belt connected, starting handshake");
        self.handshake().await
    }

    /// Query mode, firmware version and default intensity, one at a time.
    /// Unanswered queries are reported, not fatal.
    async fn handshake(&self) -> Result<HandshakeReport> {
        for param in HANDSHAKE_PARAMETERS {
            let query = encode_parameter_query(param);
            match self.inner.send_and_wait(&query, self.inner.config.handshake_timeout).await {
                Ok(()) => {}
                Err(BeltError::AckTimeout { .. }) => warn!(?param, "Handshake query unanswered"),
                Err(e) => return Err(e),
            }
        }

        let state = self.inner.state();
        let mut missing = Vec::new();
        if state.mode == BeltMode::Unknown {
            missing.push(ParameterId::Mode);
        }
        if state.firmware_version.is_none() {
            missing.push(ParameterId::FirmwareVersion);
        }
        if state.default_intensity.is_none() {
            missing.push(ParameterId::DefaultIntensity);
        }
        let report = HandshakeReport {
            mode: state.mode,
            firmware_version: state.firmware_version,
            default_intensity: state.default_intensity,
            missing,
        };
        if report.is_complete() {
            info!(mode = %report.mode, firmware = ?report.firmware_version, "Handshake complete");
        } else {
            warn!("{}", BeltError::HandshakeIncomplete { missing: report.missing.clone() });
        }
        Ok(report)
    }

    /// Close the connection. With `join`, also wait (bounded) for the
    /// background tasks to finish. Repeated calls do nothing.
    pub async fn disconnect(&self, join: bool) {
        self.inner.teardown(None, join).await;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Last mode reported by the belt, `Unknown` when disconnected.
    pub fn mode(&self) -> BeltMode {
        let state = self.inner.state();
        if state.session.is_none() {
            BeltMode::Unknown
        } else {
            state.mode
        }
    }

    pub fn firmware_version(&self) -> Option<u8> {
        self.inner.state().firmware_version
    }

    pub fn default_intensity(&self) -> Option<u8> {
        self.inner.state().default_intensity
    }

    /// Vibration channels of the connected firmware.
    pub fn channel_count(&self) -> Option<u8> {
        self.inner.state().codec.map(|codec| codec.channel_count())
    }

    /// Ask the belt to change mode. Does nothing when the cached mode already
    /// matches, unless `force` is set.
    pub async fn switch_mode(&self, mode: BeltMode, force: bool, wait_ack: bool) -> Result<()> {
        let command = encode_mode_switch(mode)?;
        let current = {
            let state = self.inner.state();
            if state.session.is_none() {
                return Err(BeltError::NotConnected);
            }
            state.mode
        };
        if mode == current && !force {
            return Ok(());
        }
        info!(%mode, "Requesting belt mode");
        self.inner.execute(&command, wait_ack).await
    }

    /// Vibrate at one or more vibromotor positions (0 = front, clockwise).
    /// Positions are adjusted by the configured orientation.
    pub async fn vibrate_at_positions(&self, indexes: &[i32], params: VibrationParams, wait_ack: bool) -> Result<()> {
        let (codec, mode) = self.inner.codec()?;
        let adjusted: Vec<u8> = indexes.iter().map(|&i| self.inner.orientation.adjust_index(i)).collect();
        let commands = codec.vibrate_positions(&adjusted, &params)?;
        self.run_vibration(&commands, mode, wait_ack).await
    }

    /// Vibrate at the vibromotor nearest to `angle` degrees (0 = front,
    /// clockwise).
    pub async fn vibrate_at_angle(&self, angle: f32, params: VibrationParams, wait_ack: bool) -> Result<()> {
        let index = i32::from(angle_to_index(angle));
        self.vibrate_at_positions(&[index], params, wait_ack).await
    }

    /// Vibrate toward a direction relative to magnetic North (degrees,
    /// clockwise).
    pub async fn vibrate_at_magnetic_bearing(&self, direction: f32, params: VibrationParams, wait_ack: bool) -> Result<()> {
        let (codec, mode) = self.inner.codec()?;
        let direction = self.inner.orientation.adjust_angle(direction);
        let commands = codec.vibrate_bearing(direction, &params)?;
        self.run_vibration(&commands, mode, wait_ack).await
    }

    async fn run_vibration(&self, commands: &[EncodedCommand], mode: BeltMode, wait_ack: bool) -> Result<()> {
        if mode != BeltMode::AppMode {
            self.switch_mode(BeltMode::AppMode, false, wait_ack).await?;
        }
        for command in commands {
            self.inner.execute(command, wait_ack).await?;
        }
        Ok(())
    }

    /// Stop app-mode vibrations on one channel or, with a negative channel or
    /// [`StopTarget::All`], on every channel.
    pub async fn stop_vibration(&self, target: impl Into<StopTarget>, wait_ack: bool) -> Result<()> {
        let (codec, _) = self.inner.codec()?;
        for command in codec.stop(target.into())? {
            self.inner.execute(&command, wait_ack).await?;
        }
        Ok(())
    }
}

impl Drop for BeltController {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        if let Some(session) = state.session.take() {
            let _ = session.shutdown.send(true);
        }
        state.events = None;
        state.pending_ack = None;
    }
}
