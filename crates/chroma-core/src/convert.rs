//! Device RGB to XYZ conversion

use serde::{Deserialize, Serialize};

use crate::color::{ColorRgb, ColorXyz};
use crate::math::{Mat3x3, Vec3};

/// Parameters turning raw sensor RGB into tristimulus values
///
/// `xyz = matrix * (rgb * pre_scale - dark_offset) * post_scale`, optionally
/// clamping the dark-corrected value at zero before the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbToXyz {
    pub matrix: Mat3x3,
    pub dark_offset: Vec3,
    pub pre_scale: f64,
    pub post_scale: f64,
    pub clamp_negative: bool,
}

impl Default for RgbToXyz {
    fn default() -> Self {
        Self {
            matrix: Mat3x3::identity(),
            dark_offset: Vec3::zero(),
            pre_scale: 1.0,
            post_scale: 1.0,
            clamp_negative: false,
        }
    }
}

impl RgbToXyz {
    pub fn new(matrix: Mat3x3) -> Self {
        Self {
            matrix,
            ..Default::default()
        }
    }

    pub fn with_dark_offset(mut self, dark_offset: Vec3) -> Self {
        self.dark_offset = dark_offset;
        self
    }

    pub fn with_scales(mut self, pre_scale: f64, post_scale: f64) -> Self {
        self.pre_scale = pre_scale;
        self.post_scale = post_scale;
        self
    }

    pub fn with_clamp(mut self, clamp_negative: bool) -> Self {
        self.clamp_negative = clamp_negative;
        self
    }

    pub fn apply(&self, rgb: ColorRgb) -> ColorXyz {
        let mut tmp = Vec3::from(rgb).scale(self.pre_scale) - self.dark_offset;
        if self.clamp_negative {
            tmp = tmp.clamp_min(0.0);
        }
        (self.matrix * tmp).scale(self.post_scale).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_passes_through() {
        let xyz = RgbToXyz::default().apply(ColorRgb::new(0.1, 0.2, 0.3));
        assert_eq!(xyz, ColorXyz::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn test_order_of_operations() {
        let conv = RgbToXyz::new(Mat3x3::diagonal(Vec3::new(2.0, 2.0, 2.0)))
            .with_dark_offset(Vec3::new(1.0, 1.0, 1.0))
            .with_scales(10.0, 0.5);
        // (0.5 * 10 - 1) * 2 * 0.5 = 4
        let xyz = conv.apply(ColorRgb::new(0.5, 0.5, 0.5));
        assert_abs_diff_eq!(xyz.x, 4.0);
        assert_abs_diff_eq!(xyz.y, 4.0);
        assert_abs_diff_eq!(xyz.z, 4.0);
    }

    #[test]
    fn test_negative_clamp() {
        let conv = RgbToXyz::default().with_dark_offset(Vec3::new(0.5, 0.0, 0.0));
        assert!(conv.apply(ColorRgb::new(0.1, 0.1, 0.1)).x < 0.0);

        let clamped = conv.with_clamp(true).apply(ColorRgb::new(0.1, 0.1, 0.1));
        assert_eq!(clamped.x, 0.0);
        assert_abs_diff_eq!(clamped.y, 0.1);
    }
}
