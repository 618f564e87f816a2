//! Resampling: turning discrete raster samples into a continuous value.
//!
//! A [`Resampling`] strategy first computes a [`ResamplingIndex`] of the
//! neighbour pixels it needs around a continuous pixel position, then reads
//! them back through the [`Raster`] capability and combines them. Pixel
//! `(i, j)` covers `[i, i+1) x [j, j+1)`, so its centre is at `(i + 0.5, j + 0.5)`.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Random access to the samples of a (virtual) global raster.
///
/// Invalid samples (missing tile, no-data) are reported as `NaN`. Errors are
/// reserved for failures that must abort the lookup.
pub trait Raster {
    /// Read a single sample.
    fn get_sample(&self, x: usize, y: usize) -> Result<f64>;

    /// Read the grid `ys x xs` into `samples` (row-major, `ys.len() * xs.len()`).
    ///
    /// Returns `true` if every sample is valid.
    fn get_samples(&self, xs: &[usize], ys: &[usize], samples: &mut [f64]) -> Result<bool>;
}

/// Neighbourhood of a continuous pixel position.
#[derive(Debug, Clone, PartialEq)]
pub struct ResamplingIndex {
    /// Continuous column.
    pub x: f64,
    /// Continuous row.
    pub y: f64,
    /// Raster width the indices are clamped to.
    pub width: usize,
    /// Raster height the indices are clamped to.
    pub height: usize,
    /// Neighbour columns.
    pub i: Vec<usize>,
    /// Neighbour rows.
    pub j: Vec<usize>,
    /// Column interpolation weight.
    pub ki: f64,
    /// Row interpolation weight.
    pub kj: f64,
}

impl ResamplingIndex {
    /// Index with room for `columns x rows` neighbours.
    pub fn new(columns: usize, rows: usize) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0,
            height: 0,
            i: vec![0; columns],
            j: vec![0; rows],
            ki: 0.0,
            kj: 0.0,
        }
    }

    fn set_position(&mut self, x: f64, y: f64, width: usize, height: usize) {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self.ki = 0.0;
        self.kj = 0.0;
    }
}

/// Clamp a signed pixel index into `[0, len)`.
fn crop(index: f64, len: usize) -> usize {
    if index <= 0.0 {
        0
    } else {
        (index as usize).min(len.saturating_sub(1))
    }
}

/// An interpolation algorithm.
pub trait Resampling: Send + Sync {
    /// Short name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// A fresh index sized for this algorithm.
    fn create_index(&self) -> ResamplingIndex;

    /// Fill `index` with the neighbours of `(x, y)` in a `width x height` raster.
    fn compute_index(&self, x: f64, y: f64, width: usize, height: usize, index: &mut ResamplingIndex);

    /// Combine the neighbours named by `index`. `NaN` means no valid value.
    fn resample(&self, raster: &dyn Raster, index: &ResamplingIndex) -> Result<f64>;
}

/// Value of the pixel containing the position.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbour;

impl Resampling for NearestNeighbour {
    fn name(&self) -> &'static str {
        "nearest-neighbour"
    }

    fn create_index(&self) -> ResamplingIndex {
        ResamplingIndex::new(1, 1)
    }

    fn compute_index(&self, x: f64, y: f64, width: usize, height: usize, index: &mut ResamplingIndex) {
        index.set_position(x, y, width, height);
        index.i[0] = crop(x.floor(), width);
        index.j[0] = crop(y.floor(), height);
    }

    fn resample(&self, raster: &dyn Raster, index: &ResamplingIndex) -> Result<f64> {
        raster.get_sample(index.i[0], index.j[0])
    }
}

/// Bilinear interpolation between the four surrounding pixel centres.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bilinear;

impl Bilinear {
    /// Lower neighbour and weight of the upper one along one axis.
    fn axis(p: f64) -> (f64, f64) {
        let p0 = p.floor();
        let d = p - (p0 + 0.5);
        if d >= 0.0 {
            (p0, d)
        } else {
            (p0 - 1.0, d + 1.0)
        }
    }
}

impl Resampling for Bilinear {
    fn name(&self) -> &'static str {
        "bilinear"
    }

    fn create_index(&self) -> ResamplingIndex {
        ResamplingIndex::new(2, 2)
    }

    fn compute_index(&self, x: f64, y: f64, width: usize, height: usize, index: &mut ResamplingIndex) {
        index.set_position(x, y, width, height);

        let (i0, ki) = Self::axis(x);
        let (j0, kj) = Self::axis(y);
        index.i[0] = crop(i0, width);
        index.i[1] = crop(i0 + 1.0, width);
        index.j[0] = crop(j0, height);
        index.j[1] = crop(j0 + 1.0, height);
        index.ki = ki;
        index.kj = kj;
    }

    fn resample(&self, raster: &dyn Raster, index: &ResamplingIndex) -> Result<f64> {
        let mut samples = [0.0f64; 4];
        if !raster.get_samples(&index.i, &index.j, &mut samples)? {
            return Ok(f64::NAN);
        }

        let (ki, kj) = (index.ki, index.kj);
        let top = samples[0] + ki * (samples[1] - samples[0]);
        let bottom = samples[2] + ki * (samples[3] - samples[2]);
        Ok(top + kj * (bottom - top))
    }
}

/// Resampling algorithms selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResamplingMethod {
    /// See [`NearestNeighbour`].
    NearestNeighbour,
    /// See [`Bilinear`].
    #[default]
    Bilinear,
}

impl ResamplingMethod {
    /// Instantiate the algorithm.
    pub fn create(&self) -> Box<dyn Resampling> {
        match self {
            ResamplingMethod::NearestNeighbour => Box::new(NearestNeighbour),
            ResamplingMethod::Bilinear => Box::new(Bilinear),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResamplingMethod::NearestNeighbour => "nearest-neighbour",
            ResamplingMethod::Bilinear => "bilinear",
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResamplingMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest-neighbour" | "nearest-neighbor" | "nearest" => {
                Ok(ResamplingMethod::NearestNeighbour)
            }
            "bilinear" => Ok(ResamplingMethod::Bilinear),
            _ => Err(format!(
                "unknown resampling method '{}' (expected nearest-neighbour or bilinear)",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// 4x4 raster with value `10 * y + x`, column 3 of row 3 missing.
    struct Plane;

    impl Raster for Plane {
        fn get_sample(&self, x: usize, y: usize) -> Result<f64> {
            if x == 3 && y == 3 {
                return Ok(f64::NAN);
            }
            Ok((10 * y + x) as f64)
        }

        fn get_samples(&self, xs: &[usize], ys: &[usize], samples: &mut [f64]) -> Result<bool> {
            let mut all_valid = true;
            for (row, &y) in ys.iter().enumerate() {
                for (col, &x) in xs.iter().enumerate() {
                    let v = self.get_sample(x, y)?;
                    all_valid &= !v.is_nan();
                    samples[row * xs.len() + col] = v;
                }
            }
            Ok(all_valid)
        }
    }

    fn resample(r: &dyn Resampling, x: f64, y: f64) -> f64 {
        let mut index = r.create_index();
        r.compute_index(x, y, 4, 4, &mut index);
        r.resample(&Plane, &index).unwrap()
    }

    #[test]
    fn test_nearest_picks_containing_pixel() {
        assert_eq!(resample(&NearestNeighbour, 1.2, 2.9), 21.0);
        assert_eq!(resample(&NearestNeighbour, 0.0, 0.0), 0.0);
        // Clamped at the raster edge
        assert_eq!(resample(&NearestNeighbour, 7.5, 0.5), 3.0);
        assert!(resample(&NearestNeighbour, 3.5, 3.5).is_nan());
    }

    #[test]
    fn test_bilinear_at_pixel_centre_is_exact() {
        assert_abs_diff_eq!(resample(&Bilinear, 1.5, 2.5), 21.0, epsilon = 1e-12);
        assert_abs_diff_eq!(resample(&Bilinear, 0.5, 0.5), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bilinear_interpolates_plane() {
        // Halfway between the centres of (1, 1) and (2, 2)
        assert_abs_diff_eq!(resample(&Bilinear, 2.0, 2.0), 16.5, epsilon = 1e-12);
        assert_abs_diff_eq!(resample(&Bilinear, 1.75, 1.5), 11.25, epsilon = 1e-12);
    }

    #[test]
    fn test_bilinear_index_neighbours() {
        let mut index = Bilinear.create_index();
        Bilinear.compute_index(1.2, 2.7, 4, 4, &mut index);
        assert_eq!(index.i, vec![0, 1]);
        assert_eq!(index.j, vec![2, 3]);
        assert_abs_diff_eq!(index.ki, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(index.kj, 0.2, epsilon = 1e-12);

        // Edges are clamped
        Bilinear.compute_index(0.1, 3.9, 4, 4, &mut index);
        assert_eq!(index.i, vec![0, 0]);
        assert_eq!(index.j, vec![3, 3]);
    }

    #[test]
    fn test_bilinear_missing_neighbour_is_nan() {
        assert!(resample(&Bilinear, 3.0, 3.0).is_nan());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("bilinear".parse::<ResamplingMethod>(), Ok(ResamplingMethod::Bilinear));
        assert_eq!("Nearest".parse::<ResamplingMethod>(), Ok(ResamplingMethod::NearestNeighbour));
        assert!("cubic".parse::<ResamplingMethod>().is_err());
        assert_eq!(ResamplingMethod::default().create().name(), "bilinear");
        assert_eq!(
            ResamplingMethod::NearestNeighbour.create().name(),
            ResamplingMethod::NearestNeighbour.name()
        );
    }
}
