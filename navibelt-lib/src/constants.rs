// Protocol constants for the naviGuertel belt

use std::time::Duration;

/// Every frame ends with this byte.
pub const FRAME_TERMINATOR: u8 = 0x0A;

/// Size of the standard fixed frame
pub const FRAME_SIZE: usize = 6;

/// Size of the unified vibration frame (command 0x87)
pub const UNIFIED_VIBRATION_FRAME_SIZE: usize = 7;

/// Filler byte for unused frame parameters
pub const PADDING: u8 = 0xAA;

/// Intensity byte telling the belt to use its user-defined intensity
pub const DEFAULT_INTENSITY_MARKER: u8 = 0xAA;

/// Highest accepted intensity (percent)
pub const MAX_INTENSITY: u8 = 100;

/// Number of vibromotors around the belt
pub const VIBROMOTOR_COUNT: u8 = 16;

/// Angle between two neighbouring vibromotors, in degrees
pub const VIBROMOTOR_ANGLE: f32 = 22.5;

/// First firmware version using the unified 0x87/0x88 commands
pub const UNIFIED_FIRMWARE_VERSION: u8 = 30;

/// Channels available below [`UNIFIED_FIRMWARE_VERSION`]
pub const LEGACY_CHANNEL_COUNT: u8 = 2;

/// Channels available from [`UNIFIED_FIRMWARE_VERSION`] on
pub const UNIFIED_CHANNEL_COUNT: u8 = 6;

/// Reply sent for every keep-alive ping
pub const KEEP_ALIVE_REPLY: [u8; FRAME_SIZE] = [0xF1, PADDING, PADDING, PADDING, PADDING, FRAME_TERMINATOR];

/// Parameter selector used by the mode switch command
pub const MODE_SWITCH_SELECTOR: u8 = 0x08;

/// Stop mask covering every channel
pub const STOP_ALL_CHANNELS_MASK: u16 = 0xFFFF;

/// Default timeout for a command acknowledgment
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Default timeout for each handshake query
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound on joining background tasks during disconnect
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Name fragment advertised by belts
pub const DEFAULT_BELT_NAME: &str = "naviGuertel";

/// Default baud rate of the serial link
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Size of a single read from the stream
pub const READ_CHUNK_SIZE: usize = 128;
