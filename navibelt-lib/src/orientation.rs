//! Mapping between caller coordinates and vibromotor positions.
//!
//! Position 0 is the front vibromotor and positions increase clockwise, one
//! every [`VIBROMOTOR_ANGLE`] degrees. A belt worn rotated or reversed is
//! compensated with an offset (in vibromotors) and an inversion flag.

use serde::{Deserialize, Serialize};

use crate::constants::{VIBROMOTOR_ANGLE, VIBROMOTOR_COUNT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orientation {
    /// Added to every position; may be negative or exceed the vibromotor count
    pub vibromotor_offset: i32,
    /// Mirror positions, for a belt worn inside out
    pub invert_signal: bool,
}

impl Orientation {
    pub fn new(vibromotor_offset: i32, invert_signal: bool) -> Self {
        Self {
            vibromotor_offset,
            invert_signal,
        }
    }

    /// Adjusted vibromotor index in `[0, 15]`.
    pub fn adjust_index(&self, index: i32) -> u8 {
        let mut index = i64::from(index) + i64::from(self.vibromotor_offset);
        if self.invert_signal {
            index = -index;
        }
        index.rem_euclid(i64::from(VIBROMOTOR_COUNT)) as u8
    }

    /// Adjusted angle in whole degrees, `[0, 359]`.
    pub fn adjust_angle(&self, angle: f32) -> u16 {
        let mut angle = angle + self.vibromotor_offset as f32 * VIBROMOTOR_ANGLE;
        if self.invert_signal {
            angle = -angle;
        }
        (angle as i64).rem_euclid(360) as u16
    }
}

/// Nearest vibromotor for an angle in degrees. Halfway angles go to the
/// next position clockwise.
pub fn angle_to_index(angle: f32) -> u8 {
    let mut angle = angle % 360.0;
    if angle < 0.0 {
        angle += 360.0;
    }
    let index = ((angle + VIBROMOTOR_ANGLE / 2.0) / VIBROMOTOR_ANGLE).floor() as i64;
    index.rem_euclid(i64::from(VIBROMOTOR_COUNT)) as u8
}

/// Angle of the centre of a vibromotor.
pub fn index_to_angle(index: u8) -> f32 {
    f32::from(index % VIBROMOTOR_COUNT) * VIBROMOTOR_ANGLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_offset() {
        let orientation = Orientation::default();
        for index in 0..16 {
            assert_eq!(orientation.adjust_index(index), index as u8);
        }
        for angle in 0..360 {
            assert_eq!(orientation.adjust_angle(angle as f32), angle as u16);
        }
    }

    #[test]
    fn offset_wraps_around() {
        let orientation = Orientation::new(-3, false);
        assert_eq!(orientation.adjust_index(0), 13);
        assert_eq!(orientation.adjust_index(20), 1);
        assert_eq!(orientation.adjust_angle(0.0), 293);

        let orientation = Orientation::new(18, false);
        assert_eq!(orientation.adjust_index(0), 2);
        assert_eq!(orientation.adjust_angle(10.0), 55);
    }

    #[test]
    fn inversion_mirrors() {
        let orientation = Orientation::new(0, true);
        assert_eq!(orientation.adjust_index(4), 12);
        assert_eq!(orientation.adjust_index(0), 0);
        assert_eq!(orientation.adjust_angle(90.0), 270);

        // offset applies before the inversion
        let orientation = Orientation::new(1, true);
        assert_eq!(orientation.adjust_index(1), 14);
        assert_eq!(orientation.adjust_angle(0.0), 338);
    }

    #[test]
    fn angle_to_index_rounds_to_nearest() {
        assert_eq!(angle_to_index(0.0), 0);
        assert_eq!(angle_to_index(11.0), 0);
        assert_eq!(angle_to_index(11.25), 1);
        assert_eq!(angle_to_index(90.0), 4);
        assert_eq!(angle_to_index(350.0), 0);
        assert_eq!(angle_to_index(-90.0), 12);
        assert_eq!(angle_to_index(720.0 + 45.0), 2);
    }

    #[test]
    fn angle_to_index_is_stable() {
        for angle in 0..360 {
            let index = angle_to_index(angle as f32);
            assert_eq!(angle_to_index(index_to_angle(index)), index, "angle {angle}");
        }
    }
}
