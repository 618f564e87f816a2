//! # tiledem
//!
//! On-demand elevation lookup over global tiled DEMs (SRTM HGT and CGIAR
//! GeoTIFF), with tiles read from a local install directory or downloaded
//! from a remote archive the first time they are needed.
//!
//! ## Overview
//!
//! A [`GridDescriptor`] describes how a DEM is cut into tiles: pixels and
//! degrees per tile, tile counts, the no-data value and where tiles live.
//! The [`DemFamily`] it carries decides the file naming, the download
//! endpoint and the projection.
//!
//! An [`ElevationModel`] turns the descriptor into a virtual global raster:
//!
//! - every tile slot has a [`TileResource`] that resolves its tile lazily:
//!   local file, then local archive, then download;
//! - a tile the source confirms missing is remembered and never requested
//!   again, and reads as the no-data value;
//! - opened tiles cache their rows, and only the most recently used tiles
//!   (60 by default) keep them;
//! - a pluggable [`Resampling`] turns neighbouring samples into a value.
//!
//! An unreachable remote source is the one failure that surfaces as an error
//! from a lookup; everything else degrades to no-data for the affected pixels.
//!
//! ## Examples
//!
//! ```no_run
//! use tiledem::{DemFamily, GeoPos, GridDescriptor, ResamplingMethod};
//!
//! let descriptor = GridDescriptor::for_family(DemFamily::Srtm3Hgt, "dem_data")?;
//! let model = descriptor.create_model(ResamplingMethod::Bilinear.create())?;
//!
//! let elevation = model.get_elevation(GeoPos::new(47.6062, -122.3321))?;
//! println!("Seattle elevation: {} meters", elevation);
//!
//! // Elevation profile between two points
//! let profile = model.sample_line(
//!     GeoPos::new(47.6062, -122.3321),
//!     GeoPos::new(46.8523, -121.7603),
//!     50,
//! )?;
//! # Ok::<(), tiledem::DemError>(())
//! ```
//!
//! ### From a configuration file
//!
//! ```no_run
//! use tiledem::{DemConfig, GeoPos};
//!
//! let config = DemConfig::load("dem.yaml")?;
//! let model = config.build_model()?;
//! let elevation = model.get_elevation(GeoPos::new(27.9881, 86.9250))?;
//! # Ok::<(), tiledem::DemError>(())
//! ```

mod archive;
mod config;
mod descriptor;
mod entry;
mod error;
mod family;
mod hot_list;
mod model;
mod raster;
mod resampling;
mod resource;
mod transport;

pub use archive::extract_tile;
pub use config::DemConfig;
pub use descriptor::{GeoPos, GridDescriptor, PixelPos, TileIndex};
pub use entry::{ConstantOffset, NoCorrection, SampleCorrection, TileCacheEntry};
pub use error::DemError;
pub use family::{DemFamily, FamilyDefaults};
pub use hot_list::HotList;
pub use model::{haversine_distance, ElevationModel, ElevationModelBuilder, DEFAULT_HOT_TILES};
pub use raster::{FileRasterReader, HgtRaster, RasterReader, TiffRaster, TileRaster};
pub use resampling::{
    Bilinear, NearestNeighbour, Raster, Resampling, ResamplingIndex, ResamplingMethod,
};
pub use resource::{TileLookup, TileResource, TileSources, TileState};
pub use transport::{DownloadCallback, DownloadStats, FetchOutcome, HttpTransport, Transport};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
