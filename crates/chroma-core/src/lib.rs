//! Chroma Core - color math for measurement devices
//!
//! This crate provides the numeric side of the sensor stack:
//! - 3-vector and 3x3 matrix arithmetic
//! - Color value types and the frame integer codec
//! - Device RGB to XYZ conversion with dark offset and scaling
//! - Bradford chromatic adaptation and display adaptation matrices
//! - ICC gamut coverage via lcms2 proofing transforms
//! - Spectral integration against the CIE 1931 observer

pub mod adapt;
pub mod buffer;
pub mod color;
pub mod convert;
pub mod error;
pub mod gamut;
pub mod icc;
pub mod math;
pub mod spectrum;

pub use adapt::{adaptation_matrix, adaptation_matrix_for_primaries, bradford_matrix};
pub use color::{ColorRgb, ColorXyz, ColorYxy, NO_VALUE};
pub use convert::RgbToXyz;
pub use error::{ColorError, Result};
pub use gamut::coverage;
pub use icc::{Primaries, Profile, ProfileAccess};
pub use math::{Mat3x3, Vec3};
pub use spectrum::{cie1931_cmf, illuminant_d65, spectrum_to_xyz, ColorMatchingFunction, Spectrum};
