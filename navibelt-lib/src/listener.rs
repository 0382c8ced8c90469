//! Background reader of the belt stream.
//!
//! One listener task runs per connection. It re-synchronises the incoming
//! bytes into frames, answers keep-alive pings, refreshes the cached belt
//! state and resolves the pending acknowledgment. A read failure tears the
//! connection down, unless a disconnect already asked the listener to stop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::constants::{KEEP_ALIVE_REPLY, READ_CHUNK_SIZE};
use crate::controller::Inner;
use crate::error::Result;
use crate::packet::{Frame, FrameAssembler, PacketKind, decode_packet};
use crate::transport::Transport;
use crate::types::{BeltMode, ParameterId};

pub(crate) async fn run(inner: Arc<Inner>, transport: Arc<Transport>, session_id: u64, mut shutdown: watch::Receiver<bool>) {
    info!(session_id, "Belt listener started");
    let mut assembler = FrameAssembler::new();

    let failure = loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break None,
            received = transport.receive(READ_CHUNK_SIZE) => received,
        };
        let bytes = match received {
            Ok(bytes) => bytes,
            Err(e) => break Some(e),
        };

        assembler.extend(&bytes);
        if let Err(e) = drain_frames(&inner, &transport, &mut assembler, &shutdown).await {
            break Some(e);
        }
    };

    if let Some(e) = failure {
        if *shutdown.borrow() {
            debug!("Belt stream closed during disconnect: {}", e);
        } else {
            warn!("Belt connection lost: {}", e);
            inner.teardown(Some(session_id), false).await;
        }
    }
    info!(session_id, "Belt listener stopped");
}

/// Handle every complete frame in `assembler`. Stops as soon as shutdown is
/// signalled, so a listener being replaced never touches the next session.
async fn drain_frames(
    inner: &Inner,
    transport: &Transport,
    assembler: &mut FrameAssembler,
    shutdown: &watch::Receiver<bool>,
) -> Result<()> {
    while let Some(frame) = assembler.next_frame() {
        if *shutdown.borrow() {
            trace!(frame = hex::encode(frame), "Listener stopping, frame ignored");
            return Ok(());
        }
        handle_frame(inner, transport, &frame).await?;
    }
    Ok(())
}

async fn handle_frame(inner: &Inner, transport: &Transport, frame: &Frame) -> Result<()> {
    let kind = decode_packet(frame);
    trace!(?kind, "Belt frame");

    match kind {
        PacketKind::KeepAlive => transport.send(&KEEP_ALIVE_REPLY).await?,
        PacketKind::ButtonPress {
            button_id,
            press_type,
            mode,
        } => {
            if let Some(mode) = BeltMode::from_wire(mode) {
                inner.apply_mode(mode, button_id, press_type);
            }
        }
        PacketKind::ParameterValue { param, value } => match param {
            ParameterId::FirmwareVersion => inner.apply_firmware_version(value),
            ParameterId::Mode => {
                if let Some(mode) = BeltMode::from_wire(value) {
                    inner.apply_mode(mode, 0, 0);
                }
            }
            ParameterId::DefaultIntensity => inner.apply_default_intensity(value),
            ParameterId::Other(id) => trace!(id, value, "Ignoring parameter value"),
        },
        PacketKind::Ack { .. } | PacketKind::ParameterQuery { .. } => {}
        PacketKind::Unknown => debug!(frame = hex::encode(frame), "Unrecognised frame"),
    }

    // state is applied first so a woken command sees the new values
    inner.ack_received(frame[0]);
    Ok(())
}
