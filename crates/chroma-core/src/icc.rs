//! ICC profile access
//!
//! The color library never parses ICC tags itself. It consumes profiles
//! through [`ProfileAccess`], which exposes the primaries, the media white
//! point and the underlying lcms2 handle.

use lcms2::{CIExyY, CIExyYTRIPLE, Tag, TagSignature, ToneCurve};
use std::path::{Path, PathBuf};

use crate::color::{ColorXyz, ColorYxy};
use crate::error::{ColorError, Result};
use crate::math::Mat3x3;

/// Read-only view of an ICC profile
pub trait ProfileAccess {
    fn red(&self) -> Result<ColorXyz>;
    fn green(&self) -> Result<ColorXyz>;
    fn blue(&self) -> Result<ColorXyz>;
    fn white(&self) -> Result<ColorXyz>;
    fn handle(&self) -> &lcms2::Profile;
    fn filename(&self) -> Option<&Path>;

    /// Name used in diagnostics
    fn display_name(&self) -> String {
        self.filename()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }
}

/// An lcms2 profile with an optional backing file
pub struct Profile {
    inner: lcms2::Profile,
    filename: Option<PathBuf>,
}

impl Profile {
    pub fn srgb() -> Self {
        Self {
            inner: lcms2::Profile::new_srgb(),
            filename: None,
        }
    }

    pub fn xyz() -> Self {
        Self {
            inner: lcms2::Profile::new_xyz(),
            filename: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = lcms2::Profile::new_file(path)
            .map_err(|e| ColorError::Profile(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            inner,
            filename: Some(path.to_path_buf()),
        })
    }

    pub fn from_icc(data: &[u8]) -> Result<Self> {
        let inner = lcms2::Profile::new_icc(data).map_err(|e| ColorError::Profile(e.to_string()))?;
        Ok(Self {
            inner,
            filename: None,
        })
    }

    /// Build a matrix/TRC RGB profile from chromaticities and a gamma
    pub fn from_primaries(white: ColorYxy, primaries: [ColorYxy; 3], gamma: f64) -> Result<Self> {
        let xyy = |c: ColorYxy| CIExyY {
            x: c.x,
            y: c.y,
            Y: c.luminance,
        };
        let curve = ToneCurve::new(gamma);
        let triple = CIExyYTRIPLE {
            Red: xyy(primaries[0]),
            Green: xyy(primaries[1]),
            Blue: xyy(primaries[2]),
        };
        let inner = lcms2::Profile::new_rgb(&xyy(white), &triple, &[&curve, &curve, &curve])
            .map_err(|e| ColorError::Profile(e.to_string()))?;
        Ok(Self {
            inner,
            filename: None,
        })
    }

    fn read_xyz(&self, sig: TagSignature) -> Result<ColorXyz> {
        match self.inner.read_tag(sig) {
            Tag::CIEXYZ(xyz) => Ok(ColorXyz::new(xyz.X, xyz.Y, xyz.Z)),
            _ => Err(ColorError::Profile(format!(
                "{} has no {:?} tag",
                self.display_name(),
                sig
            ))),
        }
    }
}

impl ProfileAccess for Profile {
    fn red(&self) -> Result<ColorXyz> {
        self.read_xyz(TagSignature::RedColorantTag)
    }

    fn green(&self) -> Result<ColorXyz> {
        self.read_xyz(TagSignature::GreenColorantTag)
    }

    fn blue(&self) -> Result<ColorXyz> {
        self.read_xyz(TagSignature::BlueColorantTag)
    }

    fn white(&self) -> Result<ColorXyz> {
        self.read_xyz(TagSignature::MediaWhitePointTag)
    }

    fn handle(&self) -> &lcms2::Profile {
        &self.inner
    }

    fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }
}

/// Red, green and blue primaries plus the white point, all in XYZ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Primaries {
    pub red: ColorXyz,
    pub green: ColorXyz,
    pub blue: ColorXyz,
    pub white: ColorXyz,
}

impl Primaries {
    pub fn from_profile<P: ProfileAccess + ?Sized>(profile: &P) -> Result<Self> {
        Ok(Self {
            red: profile.red()?,
            green: profile.green()?,
            blue: profile.blue()?,
            white: profile.white()?,
        })
    }

    /// Matrix with the primaries as columns
    pub fn chroma_matrix(&self) -> Mat3x3 {
        Mat3x3::from_columns(self.red.into(), self.green.into(), self.blue.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_srgb_primaries_sum_to_white() {
        let srgb = Profile::srgb();
        let p = Primaries::from_profile(&srgb).unwrap();

        // Colorant tags are D50 adapted, so R + G + B lands on D50
        let sum = p.red.y + p.green.y + p.blue.y;
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.red.x + p.green.x + p.blue.x, 0.9642, epsilon = 2e-3);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Profile::from_file(Path::new("/nonexistent/display.icc"))
            .err()
            .unwrap();
        assert!(matches!(err, ColorError::Profile(ref m) if m.contains("display.icc")));
    }

    #[test]
    fn test_file_round_trip_keeps_filename() {
        let data = Profile::srgb().handle().icc().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("srgb.icc");
        std::fs::write(&path, &data).unwrap();

        let loaded = Profile::from_file(&path).unwrap();
        assert_eq!(loaded.filename(), Some(path.as_path()));
        assert!(loaded.white().is_ok());
    }

    #[test]
    fn test_garbage_icc_rejected() {
        assert!(Profile::from_icc(b"not a profile").is_err());
    }
}
