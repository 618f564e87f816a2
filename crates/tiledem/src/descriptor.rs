//! Static description of a tiled DEM grid.

use crate::resampling::Resampling;
use crate::{DemError, DemFamily, ElevationModel, Result};
use std::path::{Path, PathBuf};

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPos {
    /// Latitude (positive = north).
    pub lat: f64,
    /// Longitude (positive = east).
    pub lon: f64,
}

impl GeoPos {
    /// Create a new position.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Copy of this position with longitude wrapped into `[-180, 180)`.
    pub fn normalized(&self) -> Self {
        Self {
            lat: self.lat,
            lon: (self.lon + 180.0).rem_euclid(360.0) - 180.0,
        }
    }
}

/// Continuous pixel coordinates in the global raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPos {
    /// Column (0 at 180°W).
    pub x: f64,
    /// Row (0 at the northern edge of the grid).
    pub y: f64,
}

impl PixelPos {
    /// Create a new pixel position.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Column/row of a tile slot in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    /// Column, increasing eastward.
    pub x: u32,
    /// Row, increasing southward.
    pub y: u32,
}

impl TileIndex {
    /// Create a new tile index.
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Read-only tiling scheme of a DEM.
///
/// The global raster is `num_tiles_x * tile_width_pixels` pixels wide and
/// `num_tiles_y * tile_width_pixels` pixels tall. The grid always spans the
/// full 360° of longitude and is centred on the equator.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDescriptor {
    family: DemFamily,
    no_data_value: f64,
    tile_width_pixels: usize,
    tile_width_degrees: f64,
    num_tiles_x: usize,
    num_tiles_y: usize,
    install_dir: PathBuf,
    downloadable: bool,
    remote_base_url: Option<String>,
}

impl GridDescriptor {
    /// Descriptor using the published tiling of a family.
    pub fn for_family<P: AsRef<Path>>(family: DemFamily, install_dir: P) -> Result<Self> {
        let d = family.defaults();
        Self::new(
            family,
            d.tile_width_pixels,
            d.tile_width_degrees,
            d.num_tiles_x,
            d.num_tiles_y,
            d.no_data_value,
            install_dir,
        )
    }

    /// Descriptor with an explicit tiling scheme.
    ///
    /// Downloading is enabled by default; see [`GridDescriptor::with_downloadable`].
    pub fn new<P: AsRef<Path>>(
        family: DemFamily,
        tile_width_pixels: usize,
        tile_width_degrees: f64,
        num_tiles_x: usize,
        num_tiles_y: usize,
        no_data_value: f64,
        install_dir: P,
    ) -> Result<Self> {
        if tile_width_pixels == 0 {
            return Err(DemError::InvalidDescriptor(
                "tile width in pixels must be positive".to_string(),
            ));
        }
        if !(tile_width_degrees.is_finite() && tile_width_degrees > 0.0) {
            return Err(DemError::InvalidDescriptor(format!(
                "tile width in degrees must be positive, got {}",
                tile_width_degrees
            )));
        }
        if num_tiles_x == 0 || num_tiles_y == 0 {
            return Err(DemError::InvalidDescriptor(format!(
                "tile counts must be positive, got {}x{}",
                num_tiles_x, num_tiles_y
            )));
        }
        if (num_tiles_x as f64 * tile_width_degrees - 360.0).abs() > 1e-9 {
            return Err(DemError::InvalidDescriptor(format!(
                "{} tiles of {}° do not span 360° of longitude",
                num_tiles_x, tile_width_degrees
            )));
        }
        if num_tiles_y as f64 * tile_width_degrees > 180.0 + 1e-9 {
            return Err(DemError::InvalidDescriptor(format!(
                "{} tiles of {}° exceed 180° of latitude",
                num_tiles_y, tile_width_degrees
            )));
        }
        if u32::try_from(num_tiles_x).is_err() || u32::try_from(num_tiles_y).is_err() {
            return Err(DemError::InvalidDescriptor("too many tiles".to_string()));
        }
        if no_data_value.is_nan() {
            return Err(DemError::InvalidDescriptor(
                "no-data value must not be NaN".to_string(),
            ));
        }

        Ok(Self {
            family,
            no_data_value,
            tile_width_pixels,
            tile_width_degrees,
            num_tiles_x,
            num_tiles_y,
            install_dir: install_dir.as_ref().to_path_buf(),
            downloadable: true,
            remote_base_url: None,
        })
    }

    /// Enable or disable fetching missing tiles from the remote archive.
    pub fn with_downloadable(mut self, downloadable: bool) -> Self {
        self.downloadable = downloadable;
        self
    }

    /// Override the family's default download endpoint.
    pub fn with_remote_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.remote_base_url = Some(url.into());
        self
    }

    /// Override the no-data sentinel.
    pub fn with_no_data_value(mut self, no_data_value: f64) -> Result<Self> {
        if no_data_value.is_nan() {
            return Err(DemError::InvalidDescriptor(
                "no-data value must not be NaN".to_string(),
            ));
        }
        self.no_data_value = no_data_value;
        Ok(self)
    }

    /// Build an elevation model over this grid with the given resampling.
    pub fn create_model(&self, resampling: Box<dyn Resampling>) -> Result<ElevationModel> {
        ElevationModel::builder(self.clone())
            .resampling(resampling)
            .build()
    }

    pub fn family(&self) -> DemFamily {
        self.family
    }

    pub fn no_data_value(&self) -> f64 {
        self.no_data_value
    }

    pub fn tile_width_pixels(&self) -> usize {
        self.tile_width_pixels
    }

    pub fn tile_width_degrees(&self) -> f64 {
        self.tile_width_degrees
    }

    pub fn num_tiles_x(&self) -> usize {
        self.num_tiles_x
    }

    pub fn num_tiles_y(&self) -> usize {
        self.num_tiles_y
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn is_downloadable(&self) -> bool {
        self.downloadable
    }

    pub fn remote_base_url(&self) -> Option<&str> {
        self.remote_base_url.as_deref()
    }

    /// Width of the global raster in pixels.
    pub fn raster_width(&self) -> usize {
        self.num_tiles_x * self.tile_width_pixels
    }

    /// Height of the global raster in pixels.
    pub fn raster_height(&self) -> usize {
        self.num_tiles_y * self.tile_width_pixels
    }

    /// Latitude of the grid's northern edge.
    pub fn north_edge(&self) -> f64 {
        self.num_tiles_y as f64 * self.tile_width_degrees / 2.0
    }

    /// Pixels per degree in both directions.
    pub fn pixels_per_degree(&self) -> f64 {
        self.tile_width_pixels as f64 / self.tile_width_degrees
    }

    /// Total number of tile slots.
    pub fn tile_count(&self) -> usize {
        self.num_tiles_x * self.num_tiles_y
    }

    /// Path of the extracted tile file for a slot.
    pub fn tile_path(&self, index: TileIndex) -> PathBuf {
        self.install_dir
            .join(self.family.tile_file_name(index, self))
    }

    /// Path of the tile archive for a slot.
    pub fn archive_path(&self, index: TileIndex) -> PathBuf {
        self.install_dir
            .join(self.family.archive_file_name(index, self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_extent() {
        let d = GridDescriptor::for_family(DemFamily::Srtm3Hgt, "/dem").unwrap();
        assert_eq!(d.raster_width(), 360 * 1201);
        assert_eq!(d.raster_height(), 180 * 1201);
        assert_eq!(d.north_edge(), 90.0);
        assert_eq!(d.tile_count(), 64_800);
        assert!(d.is_downloadable());

        let d = GridDescriptor::for_family(DemFamily::Srtm3GeoTiff, "/dem").unwrap();
        assert_eq!(d.raster_width(), 72 * 6000);
        assert_eq!(d.north_edge(), 60.0);
    }

    #[test]
    fn test_invalid_tiling_rejected() {
        let cases = [
            (0, 1.0, 360, 180),
            (1201, 0.0, 360, 180),
            (1201, f64::NAN, 360, 180),
            (1201, 1.0, 0, 180),
            (1201, 1.0, 359, 180),
            (1201, 1.0, 360, 181),
        ];
        for (px, deg, nx, ny) in cases {
            let result = GridDescriptor::new(DemFamily::Srtm3Hgt, px, deg, nx, ny, -32768.0, "/dem");
            assert!(
                matches!(result, Err(DemError::InvalidDescriptor(_))),
                "expected rejection of {}px {}° {}x{}",
                px,
                deg,
                nx,
                ny
            );
        }
    }

    #[test]
    fn test_nan_no_data_rejected() {
        let d = GridDescriptor::for_family(DemFamily::Srtm3Hgt, "/dem").unwrap();
        assert!(d.with_no_data_value(f64::NAN).is_err());
    }

    #[test]
    fn test_longitude_normalization() {
        assert_eq!(GeoPos::new(0.0, 185.0).normalized().lon, -175.0);
        assert_eq!(GeoPos::new(0.0, 180.0).normalized().lon, -180.0);
        assert_eq!(GeoPos::new(0.0, -180.0).normalized().lon, -180.0);
        assert_eq!(GeoPos::new(0.0, -190.0).normalized().lon, 170.0);
        assert_eq!(GeoPos::new(0.0, 725.0).normalized().lon, 5.0);
        assert_eq!(GeoPos::new(12.5, 10.0).normalized(), GeoPos::new(12.5, 10.0));
    }

    #[test]
    fn test_tile_paths() {
        let d = GridDescriptor::for_family(DemFamily::Srtm3Hgt, "/dem").unwrap();
        let index = TileIndex::new(57, 42);
        assert_eq!(d.tile_path(index), PathBuf::from("/dem/N47W123.hgt"));
        assert_eq!(d.archive_path(index), PathBuf::from("/dem/N47W123.hgt.zip"));
    }
}
