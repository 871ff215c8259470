//! 3-vectors and 3x3 matrices
//!
//! Both types are small `Copy` values; every operation returns a new value,
//! so a source can never alias its destination.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Determinants with a smaller magnitude are treated as singular.
pub const SINGULAR_THRESHOLD: f64 = 1e-6;

/// A column vector of three components
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub v0: f64,
    pub v1: f64,
    pub v2: f64,
}

impl Vec3 {
    pub const fn new(v0: f64, v1: f64, v2: f64) -> Self {
        Self { v0, v1, v2 }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn from_array(data: [f64; 3]) -> Self {
        Self::new(data[0], data[1], data[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.v0, self.v1, self.v2]
    }

    pub fn scale(self, value: f64) -> Self {
        Self::new(self.v0 * value, self.v1 * value, self.v2 * value)
    }

    /// Sum of the squared component differences
    pub fn squared_error(self, other: Vec3) -> f64 {
        let d = self - other;
        d.v0 * d.v0 + d.v1 * d.v1 + d.v2 * d.v2
    }

    /// Replace every component below `min` with `min`
    pub fn clamp_min(self, min: f64) -> Self {
        Self::new(self.v0.max(min), self.v1.max(min), self.v2.max(min))
    }

    pub fn is_finite(self) -> bool {
        self.v0.is_finite() && self.v1.is_finite() && self.v2.is_finite()
    }

    /// Single-line rendering used by diagnostic dumps
    pub fn to_compact_string(self) -> String {
        format!("{:.6},{:.6},{:.6}", self.v0, self.v1, self.v2)
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.v0 + rhs.v0, self.v1 + rhs.v1, self.v2 + rhs.v2)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.v0 - rhs.v0, self.v1 - rhs.v1, self.v2 - rhs.v2)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\n/ {} \\\n| {} |\n\\ {} /",
            signed(self.v0),
            signed(self.v1),
            signed(self.v2)
        )
    }
}

/// A row-major 3x3 matrix
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Mat3x3 {
    pub m00: f64,
    pub m01: f64,
    pub m02: f64,
    pub m10: f64,
    pub m11: f64,
    pub m12: f64,
    pub m20: f64,
    pub m21: f64,
    pub m22: f64,
}

impl Mat3x3 {
    pub const fn zero() -> Self {
        Self::from_rows([[0.0; 3]; 3])
    }

    pub const fn identity() -> Self {
        Self::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub const fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self {
            m00: rows[0][0],
            m01: rows[0][1],
            m02: rows[0][2],
            m10: rows[1][0],
            m11: rows[1][1],
            m12: rows[1][2],
            m20: rows[2][0],
            m21: rows[2][1],
            m22: rows[2][2],
        }
    }

    /// Build from nine values in row-major order
    pub fn from_slice(data: &[f64; 9]) -> Self {
        Self::from_rows([
            [data[0], data[1], data[2]],
            [data[3], data[4], data[5]],
            [data[6], data[7], data[8]],
        ])
    }

    /// Build a matrix whose columns are the given vectors
    pub fn from_columns(c0: Vec3, c1: Vec3, c2: Vec3) -> Self {
        Self::from_rows([
            [c0.v0, c1.v0, c2.v0],
            [c0.v1, c1.v1, c2.v1],
            [c0.v2, c1.v2, c2.v2],
        ])
    }

    pub fn diagonal(d: Vec3) -> Self {
        Self::from_rows([[d.v0, 0.0, 0.0], [0.0, d.v1, 0.0], [0.0, 0.0, d.v2]])
    }

    pub fn to_array(&self) -> [f64; 9] {
        [
            self.m00, self.m01, self.m02, self.m10, self.m11, self.m12, self.m20, self.m21,
            self.m22,
        ]
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 * self.m22
            + self.m01 * self.m12 * self.m20
            + self.m02 * self.m10 * self.m21
            - self.m02 * self.m11 * self.m20
            - self.m01 * self.m10 * self.m22
            - self.m00 * self.m12 * self.m21
    }

    /// Inverse of the matrix, or `None` when `|det| < 1e-6`
    pub fn reciprocal(&self) -> Option<Mat3x3> {
        let det = self.m00 * (self.m11 * self.m22 - self.m12 * self.m21)
            - self.m01 * (self.m10 * self.m22 - self.m12 * self.m20)
            + self.m02 * (self.m10 * self.m21 - self.m11 * self.m20);

        if det.abs() < SINGULAR_THRESHOLD {
            return None;
        }

        Some(Mat3x3 {
            m00: (self.m11 * self.m22 - self.m12 * self.m21) / det,
            m01: (self.m02 * self.m21 - self.m01 * self.m22) / det,
            m02: (self.m01 * self.m12 - self.m02 * self.m11) / det,
            m10: (self.m12 * self.m20 - self.m10 * self.m22) / det,
            m11: (self.m00 * self.m22 - self.m02 * self.m20) / det,
            m12: (self.m02 * self.m10 - self.m00 * self.m12) / det,
            m20: (self.m10 * self.m21 - self.m11 * self.m20) / det,
            m21: (self.m01 * self.m20 - self.m00 * self.m21) / det,
            m22: (self.m00 * self.m11 - self.m01 * self.m10) / det,
        })
    }

    /// Divide every element by the determinant
    pub fn normalize(&self) -> Mat3x3 {
        self.scale(1.0 / self.determinant())
    }

    pub fn scale(&self, value: f64) -> Mat3x3 {
        let mut data = self.to_array();
        for v in data.iter_mut() {
            *v *= value;
        }
        Mat3x3::from_slice(&data)
    }

    pub fn transpose(&self) -> Mat3x3 {
        Mat3x3::from_rows([
            [self.m00, self.m10, self.m20],
            [self.m01, self.m11, self.m21],
            [self.m02, self.m12, self.m22],
        ])
    }

    pub fn mul_vec(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.m00 * v.v0 + self.m01 * v.v1 + self.m02 * v.v2,
            self.m10 * v.v0 + self.m11 * v.v1 + self.m12 * v.v2,
            self.m20 * v.v0 + self.m21 * v.v1 + self.m22 * v.v2,
        )
    }

    pub fn mul_mat(&self, other: &Mat3x3) -> Mat3x3 {
        let a = self.to_array();
        let b = other.to_array();
        let mut out = [0.0; 9];
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    out[i * 3 + j] += a[i * 3 + k] * b[k * 3 + j];
                }
            }
        }
        Mat3x3::from_slice(&out)
    }

    /// True when no element is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Single-line rendering used by diagnostic dumps
    pub fn to_compact_string(&self) -> String {
        self.to_array()
            .iter()
            .map(|v| format!("{:.6}", v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Mul<Vec3> for Mat3x3 {
    type Output = Vec3;

    fn mul(self, rhs: Vec3) -> Vec3 {
        self.mul_vec(rhs)
    }
}

impl Mul for Mat3x3 {
    type Output = Mat3x3;

    fn mul(self, rhs: Mat3x3) -> Mat3x3 {
        self.mul_mat(&rhs)
    }
}

impl fmt::Display for Mat3x3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\n/ {}  {}  {} \\\n| {}  {}  {} |\n\\ {}  {}  {} /",
            signed(self.m00),
            signed(self.m01),
            signed(self.m02),
            signed(self.m10),
            signed(self.m11),
            signed(self.m12),
            signed(self.m20),
            signed(self.m21),
            signed(self.m22)
        )
    }
}

// Positive values get a leading space so columns line up
fn signed(v: f64) -> String {
    if v.is_sign_negative() {
        format!("{:.6}", v)
    } else {
        format!(" {:.6}", v)
    }
}
