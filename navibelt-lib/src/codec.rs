//! Command encoding for the two belt firmware tiers.
//!
//! Firmware below 30 drives at most two channels through the fixed 0x84/0x85
//! (single vibromotor or bearing) and 0x86 (bitmask, channel 0 only) frames.
//! From firmware 30 on, a single 0x87 frame covers six channels, with a mode
//! byte selecting the addressing type, and 0x88 stops any set of channels.
//!
//! The controller picks one [`CommandCodec`] when the firmware version is
//! reported and uses it for every later command. All encoders are pure and
//! validate their arguments before producing any frame.

use bytes::{BufMut, Bytes, BytesMut};
use modular_bitfield::prelude::*;
use num_enum::IntoPrimitive;

use crate::constants::{
    FRAME_SIZE, FRAME_TERMINATOR, LEGACY_CHANNEL_COUNT, MODE_SWITCH_SELECTOR, PADDING, STOP_ALL_CHANNELS_MASK,
    UNIFIED_CHANNEL_COUNT, UNIFIED_FIRMWARE_VERSION, UNIFIED_VIBRATION_FRAME_SIZE, VIBROMOTOR_COUNT,
};
use crate::error::{BeltError, Result};
use crate::orientation::angle_to_index;
use crate::packet::CommandId;
use crate::types::{BeltMode, Intensity, ParameterId, StopTarget, VibrationPattern};

/// A frame ready to be written, with the id of its acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub command: CommandId,
    pub frame: Bytes,
    pub ack_id: u8,
}

impl EncodedCommand {
    fn new(command: CommandId, frame: BytesMut) -> Self {
        debug_assert_eq!(frame.len(), command.frame_len());
        Self {
            command,
            frame: frame.freeze(),
            ack_id: command.ack_id().unwrap_or_default(),
        }
    }
}

/// Vibration settings shared by every vibration command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VibrationParams {
    pub channel: u8,
    pub intensity: Intensity,
    pub pattern: VibrationPattern,
    pub stop_other_channels: bool,
}

impl VibrationParams {
    pub fn on_channel(channel: u8) -> Self {
        Self {
            channel,
            ..Self::default()
        }
    }

    pub fn with_intensity(mut self, intensity: impl Into<Intensity>) -> Self {
        self.intensity = intensity.into();
        self
    }

    pub fn with_pattern(mut self, pattern: VibrationPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn stopping_other_channels(mut self, stop: bool) -> Self {
        self.stop_other_channels = stop;
        self
    }
}

/// Addressing type carried in the low nibble of the 0x87 mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum Addressing {
    BinaryMask = 0,
    VibromotorIndex = 1,
    MagneticBearing = 3,
}

/// Second byte of the unified vibration frame.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibrationModeByte {
    pub addressing: B4,
    pub channel: B3,
    pub stop_other_channels: bool,
}

impl VibrationModeByte {
    pub fn build(addressing: Addressing, channel: u8, stop_other_channels: bool) -> Self {
        VibrationModeByte::new()
            .with_addressing(addressing.into())
            .with_channel(channel)
            .with_stop_other_channels(stop_other_channels)
    }

    pub fn byte(self) -> u8 {
        self.into_bytes()[0]
    }
}

/// Firmware-tier specific encoding of vibration and stop commands.
pub trait CommandCodec: Send + Sync + std::fmt::Debug {
    /// Number of independent vibration channels
    fn channel_count(&self) -> u8;

    /// Vibrate at already adjusted vibromotor indexes. The first command is
    /// the vibration itself; any following ones stop the other channels.
    fn vibrate_positions(&self, indexes: &[u8], params: &VibrationParams) -> Result<Vec<EncodedCommand>>;

    /// Vibrate toward an adjusted magnetic bearing in whole degrees.
    fn vibrate_bearing(&self, direction: u16, params: &VibrationParams) -> Result<Vec<EncodedCommand>>;

    fn stop(&self, target: StopTarget) -> Result<Vec<EncodedCommand>>;
}

/// Encoding for firmware below 30.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyCodec;

/// Encoding for firmware 30 and above.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnifiedCodec;

/// Codec matching a firmware version.
pub fn codec_for_firmware(firmware_version: u8) -> &'static dyn CommandCodec {
    if firmware_version < UNIFIED_FIRMWARE_VERSION {
        &LegacyCodec
    } else {
        &UnifiedCodec
    }
}

fn check_channel(channel: u8, count: u8) -> Result<()> {
    if channel >= count {
        return Err(BeltError::invalid(format!(
            "channel {channel} out of range, this firmware has {count} channels"
        )));
    }
    Ok(())
}

fn check_indexes(indexes: &[u8]) -> Result<()> {
    if indexes.is_empty() {
        return Err(BeltError::invalid("no vibromotor index given"));
    }
    if let Some(index) = indexes.iter().find(|&&i| i >= VIBROMOTOR_COUNT) {
        return Err(BeltError::invalid(format!("vibromotor index {index} out of range")));
    }
    Ok(())
}

fn check_direction(direction: u16) -> Result<()> {
    if direction >= 360 {
        return Err(BeltError::invalid(format!("direction {direction} out of range [0-359]")));
    }
    Ok(())
}

fn fixed_frame(command: CommandId, params: [u8; 4]) -> EncodedCommand {
    let mut frame = BytesMut::with_capacity(FRAME_SIZE);
    frame.put_u8(command.into());
    frame.put_slice(&params);
    frame.put_u8(FRAME_TERMINATOR);
    EncodedCommand::new(command, frame)
}

impl LegacyCodec {
    fn check_params(params: &VibrationParams) -> Result<()> {
        check_channel(params.channel, LEGACY_CHANNEL_COUNT)?;
        if u8::from(params.pattern) != 0 {
            return Err(BeltError::invalid(format!(
                "pattern {:?} needs firmware {UNIFIED_FIRMWARE_VERSION} or later",
                params.pattern
            )));
        }
        Ok(())
    }

    fn channel_command(channel: u8) -> CommandId {
        if channel == 0 {
            CommandId::VibrateChannel0
        } else {
            CommandId::VibrateChannel1
        }
    }

    /// Legacy firmware numbers vibromotors from 1, rotated by two positions.
    fn wire_position(index: u8) -> u8 {
        ((index + 2) % VIBROMOTOR_COUNT) + 1
    }

    fn with_trailing_stop(
        &self,
        mut commands: Vec<EncodedCommand>,
        params: &VibrationParams,
    ) -> Result<Vec<EncodedCommand>> {
        if params.stop_other_channels {
            let other = if params.channel == 0 { 1 } else { 0 };
            commands.extend(self.stop(StopTarget::Channel(other))?);
        }
        Ok(commands)
    }
}

impl CommandCodec for LegacyCodec {
    fn channel_count(&self) -> u8 {
        LEGACY_CHANNEL_COUNT
    }

    fn vibrate_positions(&self, indexes: &[u8], params: &VibrationParams) -> Result<Vec<EncodedCommand>> {
        Self::check_params(params)?;
        check_indexes(indexes)?;
        if indexes.len() > 1 && params.channel != 0 {
            return Err(BeltError::invalid("multiple positions are only available on channel 0"));
        }

        let intensity = params.intensity.wire_value();
        let pattern = u8::from(params.pattern);
        let command = if indexes.len() == 1 {
            let position = Self::wire_position(indexes[0]);
            fixed_frame(
                Self::channel_command(params.channel),
                [position & 0x1F, 0x00, pattern, intensity],
            )
        } else {
            let mask = indexes
                .iter()
                .fold(0u16, |mask, &i| mask | (0x8000 >> (Self::wire_position(i) - 1)));
            let [high, low] = mask.to_be_bytes();
            fixed_frame(CommandId::VibrateMask, [high, low, 0x00, intensity])
        };
        self.with_trailing_stop(vec![command], params)
    }

    fn vibrate_bearing(&self, direction: u16, params: &VibrationParams) -> Result<Vec<EncodedCommand>> {
        Self::check_params(params)?;
        check_direction(direction)?;

        // legacy firmware expects bearings in [1, 360]
        let direction = if direction == 0 { 360 } else { direction };
        let command = fixed_frame(
            Self::channel_command(params.channel),
            [
                ((direction << 5) & 0xFF) as u8,
                ((direction >> 3) & 0xFF) as u8,
                u8::from(params.pattern),
                params.intensity.wire_value(),
            ],
        );
        self.with_trailing_stop(vec![command], params)
    }

    fn stop(&self, target: StopTarget) -> Result<Vec<EncodedCommand>> {
        let channels = match target {
            StopTarget::All => vec![0, 1],
            StopTarget::Channel(channel) => {
                check_channel(channel, LEGACY_CHANNEL_COUNT)?;
                vec![channel]
            }
        };
        Ok(channels
            .iter()
            .map(|&channel| fixed_frame(Self::channel_command(channel), [0x00, 0x00, 0x00, PADDING]))
            .collect())
    }
}

impl UnifiedCodec {
    fn check_params(params: &VibrationParams) -> Result<()> {
        check_channel(params.channel, UNIFIED_CHANNEL_COUNT)
    }

    fn vibration_frame(addressing: Addressing, value: u16, params: &VibrationParams) -> EncodedCommand {
        let mode = VibrationModeByte::build(addressing, params.channel, params.stop_other_channels);
        let mut frame = BytesMut::with_capacity(UNIFIED_VIBRATION_FRAME_SIZE);
        frame.put_u8(CommandId::Vibrate.into());
        frame.put_u8(mode.byte());
        frame.put_u16_le(value);
        frame.put_u8(params.intensity.wire_value());
        frame.put_u8(params.pattern.into());
        frame.put_u8(FRAME_TERMINATOR);
        EncodedCommand::new(CommandId::Vibrate, frame)
    }
}

impl CommandCodec for UnifiedCodec {
    fn channel_count(&self) -> u8 {
        UNIFIED_CHANNEL_COUNT
    }

    fn vibrate_positions(&self, indexes: &[u8], params: &VibrationParams) -> Result<Vec<EncodedCommand>> {
        Self::check_params(params)?;
        check_indexes(indexes)?;

        let command = if let [index] = indexes {
            Self::vibration_frame(Addressing::VibromotorIndex, u16::from(*index), params)
        } else {
            let mask = indexes.iter().fold(0u16, |mask, &i| mask | (1 << i));
            Self::vibration_frame(Addressing::BinaryMask, mask, params)
        };
        Ok(vec![command])
    }

    fn vibrate_bearing(&self, direction: u16, params: &VibrationParams) -> Result<Vec<EncodedCommand>> {
        Self::check_params(params)?;
        check_direction(direction)?;
        Ok(vec![Self::vibration_frame(Addressing::MagneticBearing, direction, params)])
    }

    fn stop(&self, target: StopTarget) -> Result<Vec<EncodedCommand>> {
        let mask = match target {
            StopTarget::All => STOP_ALL_CHANNELS_MASK,
            StopTarget::Channel(channel) => {
                check_channel(channel, UNIFIED_CHANNEL_COUNT)?;
                1u16 << channel
            }
        };
        let [low, high] = mask.to_le_bytes();
        Ok(vec![fixed_frame(CommandId::Stop, [low, high, 0x00, 0x00])])
    }
}

/// Vibrate at adjusted vibromotor indexes with the codec of `firmware_version`.
pub fn encode_vibrate_positions(
    indexes: &[u8],
    params: &VibrationParams,
    firmware_version: u8,
) -> Result<Vec<EncodedCommand>> {
    codec_for_firmware(firmware_version).vibrate_positions(indexes, params)
}

/// Vibrate at the vibromotor nearest to `angle` (degrees, 0 = front).
pub fn encode_vibrate_angle(angle: f32, params: &VibrationParams, firmware_version: u8) -> Result<Vec<EncodedCommand>> {
    encode_vibrate_positions(&[angle_to_index(angle)], params, firmware_version)
}

/// Vibrate toward a magnetic bearing in whole degrees.
pub fn encode_vibrate_bearing(
    direction: u16,
    params: &VibrationParams,
    firmware_version: u8,
) -> Result<Vec<EncodedCommand>> {
    codec_for_firmware(firmware_version).vibrate_bearing(direction, params)
}

pub fn encode_stop(target: StopTarget, firmware_version: u8) -> Result<Vec<EncodedCommand>> {
    codec_for_firmware(firmware_version).stop(target)
}

/// Request a mode change. [`BeltMode::Unknown`] is rejected.
pub fn encode_mode_switch(mode: BeltMode) -> Result<EncodedCommand> {
    let value = mode
        .wire_value()
        .ok_or_else(|| BeltError::invalid(format!("mode {mode} cannot be requested")))?;
    Ok(fixed_frame(CommandId::SwitchMode, [MODE_SWITCH_SELECTOR, value, 0x00, PADDING]))
}

pub fn encode_parameter_query(param: ParameterId) -> EncodedCommand {
    fixed_frame(CommandId::QueryParameter, [param.into(), PADDING, PADDING, PADDING])
}

/// Parameters queried right after connecting, in order.
pub const HANDSHAKE_PARAMETERS: [ParameterId; 3] =
    [ParameterId::Mode, ParameterId::FirmwareVersion, ParameterId::DefaultIntensity];

pub fn encode_handshake_queries() -> Vec<EncodedCommand> {
    HANDSHAKE_PARAMETERS.iter().map(|&p| encode_parameter_query(p)).collect()
}
