//! Bradford chromatic adaptation and display adaptation matrices

use tracing::debug;

use crate::color::ColorXyz;
use crate::error::{ColorError, Result};
use crate::icc::{Primaries, ProfileAccess};
use crate::math::{Mat3x3, Vec3};

/// Bradford cone response matrix
pub const BRADFORD: Mat3x3 = Mat3x3::from_rows([
    [0.8951, 0.2664, -0.1614],
    [-0.7502, 1.7135, 0.0367],
    [0.0389, -0.0685, 1.0296],
]);

/// Adapt colors seen under `reference` white to `measured` white
///
/// Both whites are normalized by Y first.
pub fn bradford_matrix(reference: ColorXyz, measured: ColorXyz) -> Result<Mat3x3> {
    let inverse = BRADFORD.reciprocal().ok_or(ColorError::SingularMatrix)?;

    let reference_cone = BRADFORD * Vec3::from(reference.normalize());
    let measured_cone = BRADFORD * Vec3::from(measured.normalize());

    let ratio = Mat3x3::diagonal(Vec3::new(
        measured_cone.v0 / reference_cone.v0,
        measured_cone.v1 / reference_cone.v1,
        measured_cone.v2 / reference_cone.v2,
    ));

    let adaptation = inverse * ratio * BRADFORD;
    if !adaptation.is_finite() {
        return Err(ColorError::InvalidColorspace(
            "white point gives non-finite adaptation".to_string(),
        ));
    }
    Ok(adaptation)
}

/// Matrix mapping a measured display onto the reference colorspace
///
/// `inverse(bradford * measured_chroma) * reference_chroma`
pub fn adaptation_matrix_for_primaries(
    reference: &Primaries,
    measured: &Primaries,
) -> Result<Mat3x3> {
    let bradford = bradford_matrix(reference.white, measured.white)?;
    let adapted = bradford * measured.chroma_matrix();

    let inverse = adapted.reciprocal().ok_or_else(|| {
        ColorError::InvalidColorspace("measured primaries are degenerate".to_string())
    })?;

    let result = inverse * reference.chroma_matrix();
    debug!(matrix = %result.to_compact_string(), "computed display adaptation");

    if !result.is_finite() {
        return Err(ColorError::InvalidColorspace(
            "adaptation matrix is not finite".to_string(),
        ));
    }
    Ok(result)
}

pub fn adaptation_matrix<R, M>(reference: &R, measured: &M) -> Result<Mat3x3>
where
    R: ProfileAccess + ?Sized,
    M: ProfileAccess + ?Sized,
{
    let reference = Primaries::from_profile(reference)?;
    let measured = Primaries::from_profile(measured)?;
    adaptation_matrix_for_primaries(&reference, &measured)
}
