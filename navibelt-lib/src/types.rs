//! Value types shared by the codec, the listener and the controller.

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::constants::{DEFAULT_INTENSITY_MARKER, MAX_INTENSITY};

/// Top-level operating state of the belt.
///
/// The device is authoritative; the controller only caches the last reported
/// value. `Unknown` is a local sentinel for "not connected" and never goes on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[repr(i8)]
pub enum BeltMode {
    Unknown = -1,
    Standby = 0,
    Wait = 1,
    Compass = 2,
    AppMode = 3,
    Pause = 4,
    Calibration = 5,
    TemporaryCompass = 6,
    TemporaryLocation = 7,
}

impl BeltMode {
    /// Parse a mode byte received from the belt. Only 0-7 are valid.
    pub fn from_wire(value: u8) -> Option<Self> {
        if value > 7 {
            return None;
        }
        BeltMode::try_from(value as i8).ok()
    }

    /// Byte sent in a mode switch request, `None` for [`BeltMode::Unknown`].
    pub fn wire_value(self) -> Option<u8> {
        match self {
            BeltMode::Unknown => None,
            mode => Some(i8::from(mode) as u8),
        }
    }
}

/// Parameters that can be queried with command 0x90.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum ParameterId {
    FirmwareVersion = 0x02,
    Mode = 0x08,
    DefaultIntensity = 0x09,

    #[num_enum(catch_all)]
    Other(u8),
}

/// Built-in vibration patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum VibrationPattern {
    Continuous = 0,
    Wait = 1,
    WaitConnected = 2,
    SingleShortPulse = 5,
    DoubleShortPulse = 6,

    #[num_enum(catch_all)]
    Other(u8),
}

// num_enum claims `#[default]` for itself, which clashes with `catch_all`
impl Default for VibrationPattern {
    fn default() -> Self {
        VibrationPattern::Continuous
    }
}

/// Vibration intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Intensity {
    /// The user-defined intensity stored on the belt
    #[default]
    BeltDefault,
    /// Percent, clamped to 100 when encoded
    Percent(u8),
}

impl Intensity {
    pub fn wire_value(self) -> u8 {
        match self {
            Intensity::BeltDefault => DEFAULT_INTENSITY_MARKER,
            Intensity::Percent(p) => p.min(MAX_INTENSITY),
        }
    }
}

/// Negative values select the belt default.
impl From<i32> for Intensity {
    fn from(value: i32) -> Self {
        if value < 0 {
            Intensity::BeltDefault
        } else {
            Intensity::Percent(value.min(MAX_INTENSITY as i32) as u8)
        }
    }
}

/// Which channels a stop command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    All,
    Channel(u8),
}

/// Negative values stop every channel.
impl From<i32> for StopTarget {
    fn from(value: i32) -> Self {
        if value < 0 {
            StopTarget::All
        } else {
            StopTarget::Channel(u8::try_from(value).unwrap_or(u8::MAX))
        }
    }
}

/// A mode change or button press reported by the belt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeltEvent {
    pub mode: BeltMode,
    /// 0 when the mode changed without a button press
    pub button_id: u8,
    /// 0 when the mode changed without a button press
    pub press_type: u8,
    /// Monotonic position in the delivery order
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_modes() {
        assert_eq!(BeltMode::from_wire(3), Some(BeltMode::AppMode));
        assert_eq!(BeltMode::from_wire(0), Some(BeltMode::Standby));
        assert_eq!(BeltMode::from_wire(8), None);
        assert_eq!(BeltMode::from_wire(0xFF), None);
        assert_eq!(BeltMode::Unknown.wire_value(), None);
        assert_eq!(BeltMode::TemporaryLocation.wire_value(), Some(7));
    }

    #[test]
    fn intensity_from_int() {
        assert_eq!(Intensity::from(-1), Intensity::BeltDefault);
        assert_eq!(Intensity::from(50).wire_value(), 50);
        assert_eq!(Intensity::from(250).wire_value(), 100);
        assert_eq!(Intensity::Percent(180).wire_value(), 100);
        assert_eq!(Intensity::BeltDefault.wire_value(), 0xAA);
    }

    #[test]
    fn stop_target_from_int() {
        assert_eq!(StopTarget::from(-1), StopTarget::All);
        assert_eq!(StopTarget::from(3), StopTarget::Channel(3));
    }

    #[test]
    fn unknown_parameter_is_preserved() {
        assert_eq!(ParameterId::from(0x42), ParameterId::Other(0x42));
        assert_eq!(u8::from(ParameterId::Mode), 0x08);
        assert_eq!(VibrationPattern::from(9), VibrationPattern::Other(9));
    }

    #[test]
    fn default_pattern_is_continuous() {
        assert_eq!(VibrationPattern::default(), VibrationPattern::Continuous);
        assert_eq!(u8::from(VibrationPattern::default()), 0);
        assert_eq!(u8::from(VibrationPattern::DoubleShortPulse), 6);
        assert_eq!(u8::from(VibrationPattern::Other(9)), 9);
    }
}
