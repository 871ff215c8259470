//! Color value types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::math::Vec3;

/// Marks a channel that was not measured or does not apply
pub const NO_VALUE: f64 = -1.0;

/// CIE 1931 tristimulus value
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorXyz {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
}

impl ColorXyz {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// A reading that only carries luminance
    pub const fn luminance(y: f64) -> Self {
        Self::new(NO_VALUE, y, NO_VALUE)
    }

    /// Scale so that Y = 1, leaving a zero-luminance color untouched
    pub fn normalize(self) -> Self {
        if self.y == 0.0 {
            return self;
        }
        Self::new(self.x / self.y, 1.0, self.z / self.y)
    }

    pub fn to_yxy(self) -> ColorYxy {
        let sum = self.x + self.y + self.z;
        if sum.abs() < f64::EPSILON {
            return ColorYxy::new(0.0, 0.0, 0.0);
        }
        ColorYxy::new(self.y, self.x / sum, self.y / sum)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<Vec3> for ColorXyz {
    fn from(v: Vec3) -> Self {
        Self::new(v.v0, v.v1, v.v2)
    }
}

impl From<ColorXyz> for Vec3 {
    fn from(c: ColorXyz) -> Self {
        Vec3::new(c.x, c.y, c.z)
    }
}

impl fmt::Display for ColorXyz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{:.6} Y:{:.6} Z:{:.6}", self.x, self.y, self.z)
    }
}

/// Device or display RGB triple
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorRgb {
    #[serde(rename = "R")]
    pub r: f64,
    #[serde(rename = "G")]
    pub g: f64,
    #[serde(rename = "B")]
    pub b: f64,
}

impl ColorRgb {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }
}

impl From<Vec3> for ColorRgb {
    fn from(v: Vec3) -> Self {
        Self::new(v.v0, v.v1, v.v2)
    }
}

impl From<ColorRgb> for Vec3 {
    fn from(c: ColorRgb) -> Self {
        Vec3::new(c.r, c.g, c.b)
    }
}

impl fmt::Display for ColorRgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R:{:.6} G:{:.6} B:{:.6}", self.r, self.g, self.b)
    }
}

/// Luminance plus chromaticity coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorYxy {
    #[serde(rename = "Y")]
    pub luminance: f64,
    pub x: f64,
    pub y: f64,
}

impl ColorYxy {
    pub const fn new(luminance: f64, x: f64, y: f64) -> Self {
        Self { luminance, x, y }
    }

    pub fn to_xyz(self) -> ColorXyz {
        if self.y == 0.0 {
            return ColorXyz::zero();
        }
        let scale = self.luminance / self.y;
        ColorXyz::new(
            self.x * scale,
            self.luminance,
            (1.0 - self.x - self.y) * scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_d65_chromaticity() {
        let d65 = ColorXyz::new(0.95047, 1.0, 1.08883);
        let yxy = d65.to_yxy();
        assert_abs_diff_eq!(yxy.x, 0.3127, epsilon = 1e-4);
        assert_abs_diff_eq!(yxy.y, 0.3290, epsilon = 1e-4);

        let back = yxy.to_xyz();
        assert_abs_diff_eq!(back.x, d65.x, epsilon = 1e-9);
        assert_abs_diff_eq!(back.z, d65.z, epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_by_luminance() {
        let c = ColorXyz::new(2.0, 4.0, 8.0).normalize();
        assert_eq!(c, ColorXyz::new(0.5, 1.0, 2.0));
        assert_eq!(ColorXyz::zero().normalize(), ColorXyz::zero());
    }

    #[test]
    fn test_luminance_only_reading() {
        let c = ColorXyz::luminance(120.0);
        assert_eq!(c.x, NO_VALUE);
        assert_eq!(c.y, 120.0);
        assert_eq!(c.z, NO_VALUE);
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_string(&ColorXyz::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(json, r#"{"X":1.0,"Y":2.0,"Z":3.0}"#);
    }
}
