//! DEM families: tile naming, download endpoints and projection.
//!
//! Each elevation source lays its tiles out on a regular latitude/longitude
//! grid, but names the files and hosts the archives differently:
//!
//! - SRTM HGT tiles are named by their south-west corner, e.g. `N47W123.hgt`
//!   covers 47°N..48°N, 123°W..122°W.
//! - CGIAR SRTM GeoTIFF tiles are named by 1-based column and row of a
//!   5x5 degree grid starting at 180°W / 60°N, e.g. `srtm_12_03.tif`.

use crate::descriptor::{GeoPos, GridDescriptor, PixelPos, TileIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default download endpoint for 3 arc-second HGT tiles.
const SRTM3_HGT_BASE_URL: &str = "https://step.esa.int/auxdata/dem/SRTMGL3";

/// Default download endpoint for 1 arc-second HGT tiles.
const SRTM1_HGT_BASE_URL: &str = "https://step.esa.int/auxdata/dem/SRTMGL1";

/// Default download endpoint for CGIAR 3 arc-second GeoTIFF tiles.
const SRTM3_GEOTIFF_BASE_URL: &str = "https://step.esa.int/auxdata/dem/SRTM90/tiff";

/// A family of tiled elevation products sharing one naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemFamily {
    /// SRTM 3 arc-second HGT tiles (1201x1201, 1 degree).
    #[default]
    Srtm3Hgt,
    /// SRTM 1 arc-second HGT tiles (3601x3601, 1 degree).
    Srtm1Hgt,
    /// CGIAR SRTM 3 arc-second GeoTIFF tiles (6000x6000, 5 degrees, 60°N..60°S).
    #[serde(rename = "srtm3-geotiff")]
    Srtm3GeoTiff,
}

/// Tiling defaults for a family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FamilyDefaults {
    /// Tile width and height in pixels.
    pub tile_width_pixels: usize,
    /// Tile width and height in degrees.
    pub tile_width_degrees: f64,
    /// Number of tile columns.
    pub num_tiles_x: usize,
    /// Number of tile rows.
    pub num_tiles_y: usize,
    /// No-data sentinel.
    pub no_data_value: f64,
}

impl DemFamily {
    /// All supported families.
    pub const ALL: [DemFamily; 3] = [
        DemFamily::Srtm3Hgt,
        DemFamily::Srtm1Hgt,
        DemFamily::Srtm3GeoTiff,
    ];

    /// Canonical configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            DemFamily::Srtm3Hgt => "srtm3-hgt",
            DemFamily::Srtm1Hgt => "srtm1-hgt",
            DemFamily::Srtm3GeoTiff => "srtm3-geotiff",
        }
    }

    /// The tiling scheme of the published product.
    pub fn defaults(&self) -> FamilyDefaults {
        match self {
            DemFamily::Srtm3Hgt => FamilyDefaults {
                tile_width_pixels: 1201,
                tile_width_degrees: 1.0,
                num_tiles_x: 360,
                num_tiles_y: 180,
                no_data_value: -32768.0,
            },
            DemFamily::Srtm1Hgt => FamilyDefaults {
                tile_width_pixels: 3601,
                tile_width_degrees: 1.0,
                num_tiles_x: 360,
                num_tiles_y: 180,
                no_data_value: -32768.0,
            },
            DemFamily::Srtm3GeoTiff => FamilyDefaults {
                tile_width_pixels: 6000,
                tile_width_degrees: 5.0,
                num_tiles_x: 72,
                num_tiles_y: 24,
                no_data_value: -32768.0,
            },
        }
    }

    /// Default remote directory the tile archives are served from.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            DemFamily::Srtm3Hgt => SRTM3_HGT_BASE_URL,
            DemFamily::Srtm1Hgt => SRTM1_HGT_BASE_URL,
            DemFamily::Srtm3GeoTiff => SRTM3_GEOTIFF_BASE_URL,
        }
    }

    /// File name stem shared by the tile file and its archive.
    fn stem(&self, index: TileIndex, descriptor: &GridDescriptor) -> String {
        match self {
            DemFamily::Srtm3Hgt | DemFamily::Srtm1Hgt => {
                let (lat, lon) = south_west_corner(index, descriptor);
                format!(
                    "{}{:02}{}{:03}",
                    if lat >= 0 { 'N' } else { 'S' },
                    lat.abs(),
                    if lon >= 0 { 'E' } else { 'W' },
                    lon.abs()
                )
            }
            DemFamily::Srtm3GeoTiff => format!("srtm_{:02}_{:02}", index.x + 1, index.y + 1),
        }
    }

    /// Name of the extracted tile file in the install directory.
    pub fn tile_file_name(&self, index: TileIndex, descriptor: &GridDescriptor) -> String {
        let stem = self.stem(index, descriptor);
        match self {
            DemFamily::Srtm3Hgt | DemFamily::Srtm1Hgt => format!("{}.hgt", stem),
            DemFamily::Srtm3GeoTiff => format!("{}.tif", stem),
        }
    }

    /// Name of the downloadable archive containing the tile file.
    pub fn archive_file_name(&self, index: TileIndex, descriptor: &GridDescriptor) -> String {
        let stem = self.stem(index, descriptor);
        match self {
            DemFamily::Srtm3Hgt => format!("{}.hgt.zip", stem),
            DemFamily::Srtm1Hgt => format!("{}.SRTMGL1.hgt.zip", stem),
            DemFamily::Srtm3GeoTiff => format!("{}.zip", stem),
        }
    }

    /// URL of the tile archive, using the descriptor's base URL override if set.
    pub fn remote_url(&self, index: TileIndex, descriptor: &GridDescriptor) -> String {
        let base = descriptor
            .remote_base_url()
            .unwrap_or_else(|| self.default_base_url());
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.archive_file_name(index, descriptor)
        )
    }

    /// Project a geographic position onto continuous global pixel coordinates.
    ///
    /// Pixel `(i, j)` covers `[i, i+1) x [j, j+1)`; column 0 starts at 180°W and
    /// row 0 at the northern edge of the grid.
    pub fn pixel_position(&self, geo: GeoPos, descriptor: &GridDescriptor) -> PixelPos {
        let pixels_per_degree = descriptor.pixels_per_degree();
        PixelPos {
            x: (geo.lon + 180.0) * pixels_per_degree,
            y: (descriptor.north_edge() - geo.lat) * pixels_per_degree,
        }
    }

    /// Inverse of [`DemFamily::pixel_position`].
    pub fn geo_position(&self, pixel: PixelPos, descriptor: &GridDescriptor) -> GeoPos {
        let degrees_per_pixel = 1.0 / descriptor.pixels_per_degree();
        GeoPos {
            lat: descriptor.north_edge() - pixel.y * degrees_per_pixel,
            lon: pixel.x * degrees_per_pixel - 180.0,
        }
    }
}

/// Integer latitude/longitude of a tile's south-west corner.
fn south_west_corner(index: TileIndex, descriptor: &GridDescriptor) -> (i32, i32) {
    let degrees = descriptor.tile_width_degrees();
    let lat = descriptor.north_edge() - (index.y as f64 + 1.0) * degrees;
    let lon = -180.0 + index.x as f64 * degrees;
    (lat.round() as i32, lon.round() as i32)
}

impl fmt::Display for DemFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DemFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        DemFamily::ALL
            .into_iter()
            .find(|family| family.name() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown DEM family '{}' (expected one of: srtm3-hgt, srtm1-hgt, srtm3-geotiff)",
                    s
                )
            })
    }
}
