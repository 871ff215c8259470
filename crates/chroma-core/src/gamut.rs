//! Gamut coverage estimation
//!
//! A profile is sampled on a 33x33x33 grid of the RGB unit cube through a
//! gamut-checking proofing transform. Points the proofing profile cannot
//! reproduce come out non-zero.

use lcms2::{Flags, Intent, PixelFormat, Transform};
use tracing::debug;

use crate::error::{ColorError, Result};
use crate::icc::ProfileAccess;

/// Grid points per axis
pub const GRID_SIZE: usize = 33;

fn unit_cube_grid() -> Vec<[f32; 3]> {
    let step = 1.0 / (GRID_SIZE - 1) as f32;
    let mut grid = Vec::with_capacity(GRID_SIZE * GRID_SIZE * GRID_SIZE);
    for r in 0..GRID_SIZE {
        for g in 0..GRID_SIZE {
            for b in 0..GRID_SIZE {
                grid.push([r as f32 * step, g as f32 * step, b as f32 * step]);
            }
        }
    }
    grid
}

fn coverage_one_way<P, R>(profile: &P, reference: &R) -> Result<f64>
where
    P: ProfileAccess + ?Sized,
    R: ProfileAccess + ?Sized,
{
    let null = lcms2::Profile::new_null();
    let transform: Transform<[f32; 3], f32> = Transform::new_proofing(
        profile.handle(),
        PixelFormat::RGB_FLT,
        &null,
        PixelFormat::GRAY_FLT,
        reference.handle(),
        Intent::AbsoluteColorimetric,
        Intent::AbsoluteColorimetric,
        Flags::GAMUT_CHECK | Flags::SOFT_PROOFING,
    )
    .map_err(|e| {
        ColorError::Transform(format!(
            "Failed to setup transform for {}->{}: {}",
            profile.display_name(),
            reference.display_name(),
            e
        ))
    })?;

    let input = unit_cube_grid();
    let mut output = vec![0.0f32; input.len()];
    transform.transform_pixels(&input, &mut output);

    let in_gamut = output.iter().filter(|v| **v == 0.0).count();
    Ok(in_gamut as f64 / input.len() as f64)
}

/// Fraction of `profile` that `reference` can reproduce
///
/// When `profile` is entirely contained the reverse direction is computed and
/// its reciprocal returned, so a larger reference reports a value above 1.0.
pub fn coverage<P, R>(profile: &P, reference: &R) -> Result<f64>
where
    P: ProfileAccess + ?Sized,
    R: ProfileAccess + ?Sized,
{
    let forward = coverage_one_way(profile, reference)?;
    if forward < 1.0 {
        debug!(coverage = forward, "profile not contained by reference");
        return Ok(forward);
    }

    let reverse = coverage_one_way(reference, profile)?;
    debug!(coverage = reverse, "profile contained, using reverse coverage");
    if reverse <= 0.0 {
        return Err(ColorError::InvalidColorspace(format!(
            "{} has no volume inside {}",
            reference.display_name(),
            profile.display_name()
        )));
    }
    Ok(1.0 / reverse)
}
