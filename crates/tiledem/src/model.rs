//! Elevation lookup over a tiled global grid.
//!
//! [`ElevationModel`] presents the whole grid as one virtual raster. A query
//! is projected to continuous pixel coordinates, the configured
//! [`Resampling`] picks the neighbour pixels it needs, and each neighbour is
//! read from its tile through the model's [`Raster`] implementation, which
//! resolves tiles lazily and keeps the most recently used ones hot.

use crate::descriptor::{GeoPos, GridDescriptor, PixelPos, TileIndex};
use crate::entry::{NoCorrection, SampleCorrection, TileCacheEntry};
use crate::hot_list::HotList;
use crate::raster::{FileRasterReader, RasterReader};
use crate::resampling::{Raster, Resampling, ResamplingMethod};
use crate::resource::{TileLookup, TileResource, TileSources, TileState};
use crate::transport::{DownloadCallback, DownloadStats, HttpTransport, Transport};
use crate::{DemError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Number of tiles whose rows are kept in memory by default.
pub const DEFAULT_HOT_TILES: usize = 60;

/// Elevation model over a tiled DEM.
///
/// Every tile slot gets a [`TileResource`] up front; tiles are opened, and
/// downloaded if allowed, the first time one of their samples is needed. At
/// most `hot_capacity` opened tiles keep their rows cached; when a tile falls
/// out of that list its rows are dropped and its file closed, but it stays
/// resolved.
///
/// This type is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```no_run
/// use tiledem::{DemFamily, GeoPos, GridDescriptor, ResamplingMethod};
///
/// let descriptor = GridDescriptor::for_family(DemFamily::Srtm3Hgt, "dem_data")?;
/// let model = descriptor.create_model(ResamplingMethod::Bilinear.create())?;
///
/// let elevation = model.get_elevation(GeoPos::new(47.6062, -122.3321))?; // Seattle
/// println!("Seattle elevation: {} meters", elevation);
/// # Ok::<(), tiledem::DemError>(())
/// ```
pub struct ElevationModel {
    descriptor: Arc<GridDescriptor>,
    resampling: Box<dyn Resampling>,
    sources: TileSources,
    /// One per slot, row-major.
    resources: Vec<TileResource>,
    hot: Mutex<HotList<TileIndex, Arc<TileCacheEntry>>>,
    disposed: AtomicBool,
}

impl fmt::Debug for ElevationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevationModel")
            .field("family", &self.descriptor.family())
            .field("resampling", &self.resampling.name())
            .field("hot_tiles", &self.hot_tile_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ElevationModel {
    /// Start configuring a model over `descriptor`.
    pub fn builder(descriptor: GridDescriptor) -> ElevationModelBuilder {
        ElevationModelBuilder::new(descriptor)
    }

    /// The grid this model reads.
    pub fn descriptor(&self) -> &GridDescriptor {
        &self.descriptor
    }

    /// Name of the resampling algorithm in use.
    pub fn resampling_name(&self) -> &'static str {
        self.resampling.name()
    }

    /// Elevation at `geo` in metres, or the no-data value.
    ///
    /// Longitude is wrapped into `[-180, 180)`. Positions outside the grid's
    /// latitude extent, missing tiles and no-data samples all produce the
    /// descriptor's no-data value.
    ///
    /// # Errors
    ///
    /// [`DemError::SourceUnreachable`] if a needed tile had to be downloaded
    /// and the remote source could not be contacted, and
    /// [`DemError::Disposed`] after [`ElevationModel::dispose`].
    pub fn get_elevation(&self, geo: GeoPos) -> Result<f64> {
        self.check_disposed()?;
        let no_data = self.descriptor.no_data_value();

        let pixel = self.get_index(geo);
        let width = self.descriptor.raster_width();
        let height = self.descriptor.raster_height();
        if pixel.x.is_nan() || pixel.y.is_nan() || pixel.y < 0.0 || pixel.y >= height as f64 {
            return Ok(no_data);
        }

        let mut index = self.resampling.create_index();
        self.resampling
            .compute_index(pixel.x, pixel.y, width, height, &mut index);
        let value = self.resampling.resample(self, &index)?;
        Ok(if value.is_nan() { no_data } else { value })
    }

    /// Continuous global pixel position of `geo`, longitude wrapped.
    pub fn get_index(&self, geo: GeoPos) -> PixelPos {
        self.descriptor
            .family()
            .pixel_position(geo.normalized(), &self.descriptor)
    }

    /// Geographic position of a continuous global pixel position.
    pub fn get_geo_pos(&self, pixel: PixelPos) -> GeoPos {
        self.descriptor
            .family()
            .geo_position(pixel, &self.descriptor)
    }

    /// Sample elevations along a line between two points.
    ///
    /// Returns `(distance_m, elevation)` pairs; distance is measured from
    /// `start` along the great circle, positions are interpolated linearly.
    pub fn sample_line(
        &self,
        start: GeoPos,
        end: GeoPos,
        num_samples: usize,
    ) -> Result<Vec<(f64, f64)>> {
        let mut results = Vec::with_capacity(num_samples);
        let total_distance = haversine_distance(start, end);

        for i in 0..num_samples {
            let t = if num_samples > 1 {
                i as f64 / (num_samples - 1) as f64
            } else {
                0.0
            };
            let geo = GeoPos::new(
                start.lat + t * (end.lat - start.lat),
                start.lon + t * (end.lon - start.lon),
            );
            results.push((t * total_distance, self.get_elevation(geo)?));
        }

        Ok(results)
    }

    /// Resolve every tile intersecting a region, downloading where allowed.
    ///
    /// Longitudes are wrapped; a region whose western bound lies east of its
    /// eastern bound crosses the antimeridian. Tiles are opened but not
    /// promoted, so prefetching does not evict hot tiles.
    ///
    /// Returns the number of tiles in the region that are ready.
    pub fn prefetch_region(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    ) -> Result<usize> {
        self.check_disposed()?;
        let bounds = [min_lat, max_lat, min_lon, max_lon];
        if bounds.iter().any(|v| !v.is_finite()) || min_lat > max_lat {
            return Err(DemError::InvalidRegion(format!(
                "lat {}..{}, lon {}..{}",
                min_lat, max_lat, min_lon, max_lon
            )));
        }

        let degrees = self.descriptor.tile_width_degrees();
        let num_tiles_x = self.descriptor.num_tiles_x();
        let num_tiles_y = self.descriptor.num_tiles_y();

        // Rows, in tile units from the northern edge; the southern bound is exclusive
        let north = (self.descriptor.north_edge() - max_lat) / degrees;
        let south = (self.descriptor.north_edge() - min_lat) / degrees;
        if south <= 0.0 || north >= num_tiles_y as f64 {
            return Ok(0);
        }
        let first_y = north.floor().max(0.0) as usize;
        let last_y = ((south.ceil() - 1.0) as usize).clamp(first_y, num_tiles_y - 1);

        // Columns, walking east from the western bound and wrapping at 180°
        let mut span = max_lon - min_lon;
        if span < 0.0 {
            span += 360.0;
        }
        let columns: Vec<usize> = if span >= 360.0 {
            (0..num_tiles_x).collect()
        } else {
            let west = (GeoPos::new(0.0, min_lon).normalized().lon + 180.0) / degrees;
            let east = west + span / degrees;
            let first_x = west.floor() as usize;
            let count = ((east.ceil() as usize).saturating_sub(first_x)).max(1);
            (0..count).map(|i| (first_x + i) % num_tiles_x).collect()
        };

        debug!(
            rows = last_y - first_y + 1,
            columns = columns.len(),
            "Prefetching region"
        );

        let mut ready = 0;
        for y in first_y..=last_y {
            for &x in &columns {
                let index = TileIndex::new(x as u32, y as u32);
                if let TileLookup::Ready(_) = self.resource(index).get_tile(&self.sources)? {
                    ready += 1;
                }
            }
        }

        info!(ready, "Prefetch complete");
        Ok(ready)
    }

    /// Resolution state of a tile slot, `None` outside the grid.
    pub fn tile_state(&self, index: TileIndex) -> Option<TileState> {
        self.try_resource(index).map(TileResource::state)
    }

    /// The resource for a tile slot, `None` outside the grid.
    pub fn try_resource(&self, index: TileIndex) -> Option<&TileResource> {
        let (x, y) = (index.x as usize, index.y as usize);
        if x >= self.descriptor.num_tiles_x() || y >= self.descriptor.num_tiles_y() {
            return None;
        }
        self.resources.get(y * self.descriptor.num_tiles_x() + x)
    }

    fn resource(&self, index: TileIndex) -> &TileResource {
        &self.resources[index.y as usize * self.descriptor.num_tiles_x() + index.x as usize]
    }

    /// Number of tiles currently in the hot list.
    pub fn hot_tile_count(&self) -> usize {
        self.hot.lock().len()
    }

    /// Tiles in the hot list, most recently used first.
    pub fn hot_tiles(&self) -> Vec<TileIndex> {
        self.hot.lock().keys()
    }

    /// Maximum number of hot tiles.
    pub fn hot_capacity(&self) -> usize {
        self.hot.lock().capacity()
    }

    /// Tiles and bytes downloaded by this model.
    pub fn download_stats(&self) -> DownloadStats {
        self.sources.download_stats()
    }

    /// Release every tile. Later queries return [`DemError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let hot = self.hot.lock().drain();
        for (_, entry) in hot {
            entry.clear_cache();
        }
        for resource in &self.resources {
            resource.dispose();
        }
        info!(family = %self.descriptor.family(), "Elevation model disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(DemError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Move `entry` to the front of the hot list, dropping the rows of
    /// whichever tile falls off the end.
    fn promote(&self, index: TileIndex, entry: Arc<TileCacheEntry>) {
        let evicted = self.hot.lock().touch(index, entry);
        if let Some((evicted_index, evicted)) = evicted {
            trace!(tile = ?evicted_index, rows = evicted.cached_row_count(), "Evicting hot tile");
            evicted.clear_cache();
        }
    }

    /// One global pixel, `NaN` if it has no valid value.
    fn read_pixel(&self, x: usize, y: usize) -> Result<f64> {
        let px = self.descriptor.tile_width_pixels();
        if x >= self.descriptor.raster_width() || y >= self.descriptor.raster_height() {
            return Ok(f64::NAN);
        }

        let index = TileIndex::new((x / px) as u32, (y / px) as u32);
        let entry = match self.resource(index).get_tile(&self.sources)? {
            TileLookup::Ready(entry) => entry,
            TileLookup::Absent | TileLookup::Unavailable(_) => return Ok(f64::NAN),
        };

        let local_x = x - index.x as usize * px;
        let local_y = y - index.y as usize * px;
        let sample = match entry.get_sample(local_x, local_y) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(tile = ?index, x = local_x, y = local_y, error = %e, "Failed to read sample");
                return Ok(f64::NAN);
            }
        };
        self.promote(index, entry);

        let sample = sample as f64;
        if sample == self.descriptor.no_data_value() {
            Ok(f64::NAN)
        } else {
            Ok(sample)
        }
    }
}

impl Raster for ElevationModel {
    fn get_sample(&self, x: usize, y: usize) -> Result<f64> {
        self.check_disposed()?;
        self.read_pixel(x, y)
    }

    fn get_samples(&self, xs: &[usize], ys: &[usize], samples: &mut [f64]) -> Result<bool> {
        self.check_disposed()?;
        let mut all_valid = true;
        for (row, &y) in ys.iter().enumerate() {
            for (col, &x) in xs.iter().enumerate() {
                let value = self.read_pixel(x, y)?;
                all_valid &= !value.is_nan();
                samples[row * xs.len() + col] = value;
            }
        }
        Ok(all_valid)
    }
}

/// Configures and builds an [`ElevationModel`].
pub struct ElevationModelBuilder {
    descriptor: GridDescriptor,
    resampling: Option<Box<dyn Resampling>>,
    transport: Option<Box<dyn Transport>>,
    raster_reader: Option<Box<dyn RasterReader>>,
    correction: Arc<dyn SampleCorrection>,
    hot_capacity: usize,
    download_callback: Option<DownloadCallback>,
}

impl ElevationModelBuilder {
    pub fn new(descriptor: GridDescriptor) -> Self {
        Self {
            descriptor,
            resampling: None,
            transport: None,
            raster_reader: None,
            correction: Arc::new(NoCorrection),
            hot_capacity: DEFAULT_HOT_TILES,
            download_callback: None,
        }
    }

    /// Resampling algorithm. Defaults to bilinear.
    pub fn resampling(mut self, resampling: Box<dyn Resampling>) -> Self {
        self.resampling = Some(resampling);
        self
    }

    /// Transport for tile downloads. Defaults to [`HttpTransport`].
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Tile file reader. Defaults to [`FileRasterReader`].
    pub fn raster_reader(mut self, reader: Box<dyn RasterReader>) -> Self {
        self.raster_reader = Some(reader);
        self
    }

    /// Correction applied to each row as it is loaded.
    pub fn correction(mut self, correction: Arc<dyn SampleCorrection>) -> Self {
        self.correction = correction;
        self
    }

    /// Number of tiles whose rows stay cached. At least one.
    pub fn hot_capacity(mut self, capacity: usize) -> Self {
        self.hot_capacity = capacity;
        self
    }

    /// Called with a message when a download starts and finishes.
    pub fn download_callback(mut self, callback: DownloadCallback) -> Self {
        self.download_callback = Some(callback);
        self
    }

    pub fn build(self) -> Result<ElevationModel> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new()?),
        };
        let reader = self
            .raster_reader
            .unwrap_or_else(|| Box::new(FileRasterReader));
        let resampling = self
            .resampling
            .unwrap_or_else(|| ResamplingMethod::default().create());

        let descriptor = Arc::new(self.descriptor);
        let mut resources = Vec::with_capacity(descriptor.tile_count());
        for y in 0..descriptor.num_tiles_y() {
            for x in 0..descriptor.num_tiles_x() {
                resources.push(TileResource::new(
                    TileIndex::new(x as u32, y as u32),
                    descriptor.clone(),
                ));
            }
        }

        let hot = HotList::new(self.hot_capacity);
        info!(
            family = %descriptor.family(),
            install_dir = %descriptor.install_dir().display(),
            tiles = resources.len(),
            hot_capacity = hot.capacity(),
            resampling = resampling.name(),
            downloadable = descriptor.is_downloadable(),
            "Elevation model ready"
        );

        Ok(ElevationModel {
            descriptor,
            resampling,
            sources: TileSources::new(transport, reader, self.correction, self.download_callback),
            resources,
            hot: Mutex::new(hot),
            disposed: AtomicBool::new(false),
        })
    }
}

/// Calculate the distance between two points using the haversine formula.
///
/// Returns the distance in meters.
pub fn haversine_distance(a: GeoPos, b: GeoPos) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}
