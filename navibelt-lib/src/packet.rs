//! Wire frames exchanged with the belt.
//!
//! Every frame starts with a command id and ends with [`FRAME_TERMINATOR`].
//! Almost all frames are [`FRAME_SIZE`] bytes long; the unified vibration
//! command (0x87) carries one more parameter byte. Inbound traffic is always
//! made of fixed 6-byte frames, which [`FrameAssembler`] carves out of the
//! raw byte stream.

use bytes::{Buf, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::debug;

use crate::constants::{FRAME_SIZE, FRAME_TERMINATOR, UNIFIED_VIBRATION_FRAME_SIZE};
use crate::types::ParameterId;

/// A complete inbound frame.
pub type Frame = [u8; FRAME_SIZE];

/// First byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CommandId {
    // device -> host
    KeepAlive = 0x01,
    ButtonPress = 0x02,
    ButtonPressNotification = 0xC2,
    AckVibrateChannel0 = 0xC4,
    AckVibrateChannel1 = 0xC5,
    AckVibrateMask = 0xC6,
    AckVibrate = 0xC7,
    AckStop = 0xC8,
    ParameterValue = 0xD0,
    AckSwitchMode = 0xD1,

    // host -> device
    VibrateChannel0 = 0x84,
    VibrateChannel1 = 0x85,
    VibrateMask = 0x86,
    Vibrate = 0x87,
    Stop = 0x88,
    QueryParameter = 0x90,
    SwitchMode = 0x91,
    KeepAliveReply = 0xF1,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl CommandId {
    /// Length of a frame starting with this id, terminator included.
    pub fn frame_len(self) -> usize {
        match self {
            CommandId::Vibrate => UNIFIED_VIBRATION_FRAME_SIZE,
            _ => FRAME_SIZE,
        }
    }

    /// Id of the acknowledgment the belt sends for this command.
    pub fn ack_id(self) -> Option<u8> {
        let ack = match self {
            CommandId::VibrateChannel0 => CommandId::AckVibrateChannel0,
            CommandId::VibrateChannel1 => CommandId::AckVibrateChannel1,
            CommandId::VibrateMask => CommandId::AckVibrateMask,
            CommandId::Vibrate => CommandId::AckVibrate,
            CommandId::Stop => CommandId::AckStop,
            CommandId::QueryParameter => CommandId::ParameterValue,
            CommandId::SwitchMode => CommandId::AckSwitchMode,
            _ => return None,
        };
        Some(ack.into())
    }
}

/// Decoded meaning of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Ping from the belt, must be answered right away
    KeepAlive,
    /// A button was pressed; `mode` is the mode byte reported with it
    ButtonPress { button_id: u8, press_type: u8, mode: u8 },
    /// Value of a parameter, also sent as the mode switch ACK (0xD1)
    ParameterValue { param: ParameterId, value: u8 },
    /// Host-side query for a parameter
    ParameterQuery { param: ParameterId },
    /// Command acknowledgment
    Ack { ack_id: u8 },
    Unknown,
}

/// Decode a frame. Never fails: anything malformed or unrecognised is
/// [`PacketKind::Unknown`].
pub fn decode_packet(bytes: &[u8]) -> PacketKind {
    let Some(&first) = bytes.first() else {
        return PacketKind::Unknown;
    };
    let id = CommandId::from(first);
    if bytes.len() != id.frame_len() || bytes[bytes.len() - 1] != FRAME_TERMINATOR {
        return PacketKind::Unknown;
    }

    match id {
        CommandId::KeepAlive => PacketKind::KeepAlive,
        CommandId::ButtonPress | CommandId::ButtonPressNotification => PacketKind::ButtonPress {
            button_id: bytes[1],
            press_type: bytes[2],
            mode: bytes[3],
        },
        CommandId::ParameterValue | CommandId::AckSwitchMode => PacketKind::ParameterValue {
            param: ParameterId::from(bytes[1]),
            value: bytes[2],
        },
        CommandId::QueryParameter => PacketKind::ParameterQuery {
            param: ParameterId::from(bytes[1]),
        },
        CommandId::AckVibrateChannel0
        | CommandId::AckVibrateChannel1
        | CommandId::AckVibrateMask
        | CommandId::AckVibrate
        | CommandId::AckStop => PacketKind::Ack { ack_id: first },
        _ => PacketKind::Unknown,
    }
}

/// Re-synchronises a byte stream into 6-byte frames.
///
/// When the sixth byte of the candidate frame is not a terminator, bytes are
/// dropped so that the next candidate ends on the next terminator in the
/// buffer. Without any terminator only the last five bytes are kept, since
/// they may be the head of a frame still in flight.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    discarded: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped while re-synchronising
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Carve the next complete frame off the front of the buffer.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.buffer.len() < FRAME_SIZE {
                return None;
            }
            if self.buffer[FRAME_SIZE - 1] == FRAME_TERMINATOR {
                let mut frame = [0u8; FRAME_SIZE];
                self.buffer.copy_to_slice(&mut frame);
                return Some(frame);
            }

            let skip = match self.buffer.iter().position(|&b| b == FRAME_TERMINATOR) {
                Some(pos) if pos < FRAME_SIZE - 1 => pos + 1,
                Some(pos) => pos + 1 - FRAME_SIZE,
                None => self.buffer.len() - (FRAME_SIZE - 1),
            };
            debug!(
                dropped = hex::encode(&self.buffer[..skip]),
                "Discarding misaligned bytes"
            );
            self.buffer.advance(skip);
            self.discarded += skip;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(assembler: &mut FrameAssembler) -> Vec<Frame> {
        std::iter::from_fn(|| assembler.next_frame()).collect()
    }

    #[test]
    fn test_decode_keep_alive() {
        assert_eq!(decode_packet(&[0x01, 0xAA, 0xAA, 0xAA, 0xAA, 0x0A]), PacketKind::KeepAlive);
    }

    #[test]
    fn test_decode_button_press() {
        assert_eq!(
            decode_packet(&[0xC2, 0x02, 0x01, 0x03, 0x00, 0x0A]),
            PacketKind::ButtonPress {
                button_id: 2,
                press_type: 1,
                mode: 3
            }
        );
    }

    #[test]
    fn test_decode_parameter_values() {
        assert_eq!(
            decode_packet(&[0xD0, 0x02, 0x23, 0xAA, 0xAA, 0x0A]),
            PacketKind::ParameterValue {
                param: ParameterId::FirmwareVersion,
                value: 35
            }
        );
        assert_eq!(
            decode_packet(&[0xD1, 0x08, 0x03, 0x00, 0xAA, 0x0A]),
            PacketKind::ParameterValue {
                param: ParameterId::Mode,
                value: 3
            }
        );
    }

    #[test]
    fn test_decode_acks() {
        for ack in 0xC4..=0xC8u8 {
            assert_eq!(decode_packet(&[ack, 0x00, 0x00, 0x00, 0x00, 0x0A]), PacketKind::Ack { ack_id: ack });
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_packet(&[]), PacketKind::Unknown);
        assert_eq!(decode_packet(&[0xC7, 0x00, 0x0A]), PacketKind::Unknown);
        assert_eq!(decode_packet(&[0xC7, 0x00, 0x00, 0x00, 0x00, 0x0B]), PacketKind::Unknown);
        assert_eq!(decode_packet(&[0x55, 0x00, 0x00, 0x00, 0x00, 0x0A]), PacketKind::Unknown);
    }

    #[test]
    fn test_unified_vibration_is_seven_bytes() {
        assert_eq!(CommandId::Vibrate.frame_len(), 7);
        assert_eq!(CommandId::Stop.frame_len(), 6);
        assert_eq!(CommandId::Vibrate.ack_id(), Some(0xC7));
        assert_eq!(CommandId::SwitchMode.ack_id(), Some(0xD1));
        assert_eq!(CommandId::KeepAlive.ack_id(), None);
    }

    #[test]
    fn test_assembler_split_reads() {
        let mut assembler = FrameAssembler::new();
        assembler.extend(&[0xD0, 0x08, 0x03]);
        assert!(assembler.next_frame().is_none());
        assembler.extend(&[0xAA, 0xAA, 0x0A, 0x01, 0xAA]);
        assert_eq!(assembler.next_frame(), Some([0xD0, 0x08, 0x03, 0xAA, 0xAA, 0x0A]));
        assert!(assembler.next_frame().is_none());
        assert_eq!(assembler.buffered(), 2);
    }

    #[test]
    fn test_assembler_missing_terminator() {
        // first frame lost its terminator
        let mut assembler = FrameAssembler::new();
        assembler.extend(&[0xD0, 0x08, 0x03, 0x00, 0xAA]);
        assembler.extend(&[0xD0, 0x08, 0x02, 0x00, 0xAA, 0x0A]);
        assert_eq!(frames(&mut assembler), vec![[0xD0, 0x08, 0x02, 0x00, 0xAA, 0x0A]]);
        assert_eq!(assembler.discarded(), 5);
    }

    #[test]
    fn test_assembler_short_frame() {
        let mut assembler = FrameAssembler::new();
        assembler.extend(&[0x01, 0x0A, 0xC7, 0x00, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(frames(&mut assembler), vec![[0xC7, 0x00, 0x00, 0x00, 0x00, 0x0A]]);
        assert_eq!(assembler.discarded(), 2);
    }

    #[test]
    fn test_assembler_no_terminator_keeps_tail() {
        let mut assembler = FrameAssembler::new();
        assembler.extend(&[0x11; 9]);
        assert!(assembler.next_frame().is_none());
        assert_eq!(assembler.buffered(), 5);
        assembler.extend(&[0xC8, 0x00, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(frames(&mut assembler), vec![[0xC8, 0x00, 0x00, 0x00, 0x00, 0x0A]]);
    }
}
