//! Evenly sampled spectral data and spectral integration

use serde::{Deserialize, Serialize};

use crate::color::ColorXyz;
use crate::error::{ColorError, Result};

/// Samples evenly spaced between `start` and `end` nanometres inclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub id: String,
    pub start: f64,
    pub end: f64,
    pub values: Vec<f64>,
}

impl Spectrum {
    pub fn new(id: impl Into<String>, start: f64, end: f64, values: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            values,
        }
    }

    /// A flat spectrum of ones, the equal-energy illuminant
    pub fn unity(start: f64, end: f64) -> Self {
        Self::new("unity", start, end, vec![1.0, 1.0])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).copied()
    }

    pub fn wavelength(&self, idx: usize) -> f64 {
        if self.values.len() < 2 {
            return self.start;
        }
        self.start + idx as f64 * (self.end - self.start) / (self.values.len() - 1) as f64
    }

    /// Linear interpolation between the two nearest samples
    pub fn value_for_nm(&self, nm: f64) -> Option<f64> {
        if self.values.is_empty() || nm < self.start || nm > self.end {
            return None;
        }
        if self.values.len() == 1 {
            return Some(self.values[0]);
        }

        let step = (self.end - self.start) / (self.values.len() - 1) as f64;
        let pos = (nm - self.start) / step;
        let lower = (pos.floor() as usize).min(self.values.len() - 2);
        let frac = pos - lower as f64;
        let a = self.values[lower];
        let b = self.values[lower + 1];
        Some(a + (b - a) * frac)
    }

    /// Pointwise difference, both spectra must have the same number of samples
    pub fn subtract(&self, other: &Spectrum) -> Result<Spectrum> {
        if self.values.len() != other.values.len() {
            return Err(ColorError::Spectrum(format!(
                "size mismatch: {} != {}",
                self.values.len(),
                other.values.len()
            )));
        }
        let values = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a - b)
            .collect();
        Ok(Spectrum::new(self.id.clone(), self.start, self.end, values))
    }

    pub fn limit_min(&mut self, min: f64) {
        for v in self.values.iter_mut() {
            if *v < min {
                *v = min;
            }
        }
    }

    /// Scale so that the largest sample equals `height`
    pub fn normalize_max(&mut self, height: f64) {
        let max = self.values.iter().cloned().fold(f64::MIN, f64::max);
        if max <= 0.0 {
            return;
        }
        for v in self.values.iter_mut() {
            *v = *v / max * height;
        }
    }
}

/// Three observer curves sharing one wavelength range
#[derive(Debug, Clone, PartialEq)]
pub struct ColorMatchingFunction {
    pub x: Spectrum,
    pub y: Spectrum,
    pub z: Spectrum,
}

/// Integrate a spectrum against an observer under an illuminant
///
/// The result is normalized so the illuminant itself has Y = 1. Wavelengths
/// outside a spectrum's range contribute nothing.
pub fn spectrum_to_xyz(
    cmf: &ColorMatchingFunction,
    illuminant: &Spectrum,
    spectrum: &Spectrum,
    resolution: f64,
) -> Result<ColorXyz> {
    if resolution <= 0.0 {
        return Err(ColorError::Spectrum(format!(
            "invalid resolution {}",
            resolution
        )));
    }

    let start = cmf.x.start;
    let steps = ((cmf.x.end - start) / resolution).round() as usize;
    let mut xyz = ColorXyz::zero();
    let mut scale = 0.0;

    for i in 0..=steps {
        let nm = start + i as f64 * resolution;
        let i_val = illuminant.value_for_nm(nm).unwrap_or(0.0);
        let s_val = spectrum.value_for_nm(nm).unwrap_or(0.0);
        let x_bar = cmf.x.value_for_nm(nm).unwrap_or(0.0);
        let y_bar = cmf.y.value_for_nm(nm).unwrap_or(0.0);
        let z_bar = cmf.z.value_for_nm(nm).unwrap_or(0.0);

        xyz.x += i_val * x_bar * s_val;
        xyz.y += i_val * y_bar * s_val;
        xyz.z += i_val * z_bar * s_val;
        scale += i_val * y_bar;
    }

    if scale == 0.0 {
        return Err(ColorError::Spectrum(
            "illuminant has no luminance over the observer range".to_string(),
        ));
    }

    Ok(ColorXyz::new(xyz.x / scale, xyz.y / scale, xyz.z / scale))
}

// CIE 1931 2 degree standard observer, 380-780 nm at 10 nm
const CMF_X: [f64; 41] = [
    0.001368, 0.004243, 0.014310, 0.043510, 0.134380, 0.283900, 0.348280, 0.336200, 0.290800,
    0.195360, 0.095640, 0.032010, 0.004900, 0.009300, 0.063270, 0.165500, 0.290400, 0.433450,
    0.594500, 0.762100, 0.916300, 1.026300, 1.062200, 1.002600, 0.854450, 0.642400, 0.447900,
    0.283500, 0.164900, 0.087400, 0.046770, 0.022700, 0.011359, 0.005790, 0.002899, 0.001440,
    0.000690, 0.000332, 0.000166, 0.000083, 0.000042,
];

const CMF_Y: [f64; 41] = [
    0.000039, 0.000120, 0.000396, 0.001210, 0.004000, 0.011600, 0.023000, 0.038000, 0.060000,
    0.090980, 0.139020, 0.208020, 0.323000, 0.503000, 0.710000, 0.862000, 0.954000, 0.994950,
    0.995000, 0.952000, 0.870000, 0.757000, 0.631000, 0.503000, 0.381000, 0.265000, 0.175000,
    0.107000, 0.061000, 0.032000, 0.017000, 0.008210, 0.004102, 0.002091, 0.001047, 0.000520,
    0.000249, 0.000120, 0.000060, 0.000030, 0.000015,
];

const CMF_Z: [f64; 41] = [
    0.006450, 0.020050, 0.067850, 0.207400, 0.645600, 1.385600, 1.747060, 1.772110, 1.669200,
    1.287640, 0.812950, 0.465180, 0.272000, 0.158200, 0.078250, 0.042160, 0.020300, 0.008750,
    0.003900, 0.002100, 0.001650, 0.001100, 0.000800, 0.000340, 0.000190, 0.000050, 0.000020,
    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

// CIE standard illuminant D65 relative power, 380-780 nm at 10 nm
const D65: [f64; 41] = [
    49.9755, 54.6482, 82.7549, 91.486, 93.4318, 86.6823, 104.865, 117.008, 117.812, 114.861,
    115.923, 108.811, 109.354, 107.802, 104.790, 107.689, 104.405, 104.046, 100.0, 96.3342,
    95.788, 88.6856, 90.0062, 89.5991, 87.6987, 83.2886, 83.6992, 80.0268, 80.2146, 82.2778,
    78.2842, 69.7213, 71.6091, 74.349, 61.604, 69.8856, 75.087, 63.5927, 46.4182, 66.8054,
    63.3828,
];

pub fn cie1931_cmf() -> ColorMatchingFunction {
    ColorMatchingFunction {
        x: Spectrum::new("X", 380.0, 780.0, CMF_X.to_vec()),
        y: Spectrum::new("Y", 380.0, 780.0, CMF_Y.to_vec()),
        z: Spectrum::new("Z", 380.0, 780.0, CMF_Z.to_vec()),
    }
}

pub fn illuminant_d65() -> Spectrum {
    Spectrum::new("D65", 380.0, 780.0, D65.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_wavelength_spacing() {
        let s = Spectrum::new("s", 380.0, 700.0, vec![0.0; 1024]);
        assert_eq!(s.wavelength(0), 380.0);
        assert_abs_diff_eq!(s.wavelength(1023), 700.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.wavelength(1), 380.0 + 320.0 / 1023.0, epsilon = 1e-9);
    }

    #[test]
    fn test_interpolation() {
        let s = Spectrum::new("s", 400.0, 500.0, vec![0.0, 10.0, 20.0]);
        assert_eq!(s.value_for_nm(400.0), Some(0.0));
        assert_eq!(s.value_for_nm(425.0), Some(5.0));
        assert_eq!(s.value_for_nm(500.0), Some(20.0));
        assert_eq!(s.value_for_nm(399.0), None);
        assert_eq!(s.value_for_nm(501.0), None);
    }

    #[test]
    fn test_subtract_and_limit() {
        let a = Spectrum::new("a", 400.0, 500.0, vec![1.0, 2.0, 3.0]);
        let b = Spectrum::new("b", 400.0, 500.0, vec![2.0, 1.0, 1.0]);
        let mut diff = a.subtract(&b).unwrap();
        assert_eq!(diff.values, vec![-1.0, 1.0, 2.0]);

        diff.limit_min(0.0);
        assert_eq!(diff.values, vec![0.0, 1.0, 2.0]);

        diff.normalize_max(1.0);
        assert_eq!(diff.values, vec![0.0, 0.5, 1.0]);

        let short = Spectrum::new("c", 400.0, 500.0, vec![1.0]);
        assert!(a.subtract(&short).is_err());
    }

    #[test]
    fn test_unity_under_d65_is_d65_white() {
        let xyz = spectrum_to_xyz(
            &cie1931_cmf(),
            &illuminant_d65(),
            &Spectrum::unity(380.0, 780.0),
            10.0,
        )
        .unwrap();
        assert_abs_diff_eq!(xyz.x, 0.9504, epsilon = 0.01);
        assert_abs_diff_eq!(xyz.y, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(xyz.z, 1.0888, epsilon = 0.01);
    }

    #[test]
    fn test_out_of_range_spectrum_is_dark() {
        let outside = Spectrum::new("ir", 800.0, 900.0, vec![1.0, 1.0]);
        let xyz = spectrum_to_xyz(&cie1931_cmf(), &illuminant_d65(), &outside, 10.0).unwrap();
        assert_eq!(xyz, ColorXyz::zero());
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let unity = Spectrum::unity(380.0, 780.0);
        assert!(spectrum_to_xyz(&cie1931_cmf(), &illuminant_d65(), &unity, 0.0).is_err());
    }
}
