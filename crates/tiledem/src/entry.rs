//! A loaded tile with row-granular sample caching.

use crate::descriptor::TileIndex;
use crate::raster::TileRaster;
use crate::{DemError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Adjustment applied to every row of samples when it is first loaded.
///
/// Used e.g. to convert geoid-referenced heights to ellipsoid heights.
/// Samples equal to the no-data value are never passed through the hook.
pub trait SampleCorrection: Send + Sync {
    /// Correct `samples` in place; they form row `row` of tile `tile`.
    fn correct(&self, tile: TileIndex, row: usize, samples: &mut [f32]);
}

/// The default: samples are used as stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl SampleCorrection for NoCorrection {
    fn correct(&self, _tile: TileIndex, _row: usize, _samples: &mut [f32]) {}
}

/// Adds a fixed offset in metres to every sample.
#[derive(Debug, Clone, Copy)]
pub struct ConstantOffset(pub f32);

impl SampleCorrection for ConstantOffset {
    fn correct(&self, _tile: TileIndex, _row: usize, samples: &mut [f32]) {
        for sample in samples {
            *sample += self.0;
        }
    }
}

struct EntryState {
    raster: Option<Box<dyn TileRaster>>,
    rows: Vec<Option<Box<[f32]>>>,
    cached_rows: usize,
}

/// One opened tile and the rows read from it so far.
///
/// Rows are loaded on first access and kept until [`TileCacheEntry::clear_cache`]
/// drops all of them at once; there is no per-row eviction.
pub struct TileCacheEntry {
    index: TileIndex,
    width: usize,
    no_data_value: f32,
    correction: Arc<dyn SampleCorrection>,
    state: Mutex<EntryState>,
}

impl fmt::Debug for TileCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCacheEntry")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("cached_rows", &self.cached_row_count())
            .finish()
    }
}

impl TileCacheEntry {
    /// Wrap an opened raster. Rows of `width` samples are served from it.
    pub fn new(
        index: TileIndex,
        raster: Box<dyn TileRaster>,
        width: usize,
        no_data_value: f64,
        correction: Arc<dyn SampleCorrection>,
    ) -> Result<Self> {
        if raster.width() < width || raster.height() < width {
            return Err(DemError::InvalidRaster(format!(
                "tile {:?} is {}x{}, expected at least {}x{}",
                index,
                raster.width(),
                raster.height(),
                width,
                width
            )));
        }

        Ok(Self {
            index,
            width,
            no_data_value: no_data_value as f32,
            correction,
            state: Mutex::new(EntryState {
                raster: Some(raster),
                rows: vec![None; width],
                cached_rows: 0,
            }),
        })
    }

    /// Tile slot this entry belongs to.
    pub fn index(&self) -> TileIndex {
        self.index
    }

    /// Tile width and height in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Read one sample, loading and correcting its row on first access.
    pub fn get_sample(&self, local_x: usize, local_y: usize) -> Result<f32> {
        if local_x >= self.width || local_y >= self.width {
            return Err(DemError::OutOfBounds {
                x: local_x,
                y: local_y,
                width: self.width,
                height: self.width,
            });
        }

        let mut state = self.state.lock();
        if let Some(row) = &state.rows[local_y] {
            return Ok(row[local_x]);
        }

        let raster = state.raster.as_mut().ok_or(DemError::Disposed)?;
        let mut row = vec![0.0f32; self.width].into_boxed_slice();
        raster.read_row(local_y, &mut row)?;
        self.apply_correction(local_y, &mut row);

        let value = row[local_x];
        state.rows[local_y] = Some(row);
        state.cached_rows += 1;
        Ok(value)
    }

    /// Run the correction hook over the valid runs of a row.
    fn apply_correction(&self, y: usize, row: &mut [f32]) {
        let mut start = 0;
        while start < row.len() {
            if row[start] == self.no_data_value {
                start += 1;
                continue;
            }
            let end = row[start..]
                .iter()
                .position(|&v| v == self.no_data_value)
                .map_or(row.len(), |n| start + n);
            self.correction.correct(self.index, y, &mut row[start..end]);
            start = end;
        }
    }

    /// Number of rows currently held in memory.
    pub fn cached_row_count(&self) -> usize {
        self.state.lock().cached_rows
    }

    /// Drop every cached row and release the raster's file handle.
    ///
    /// The entry stays usable; the next read reopens the raster.
    pub fn clear_cache(&self) {
        let mut state = self.state.lock();
        if state.cached_rows > 0 {
            state.rows.iter_mut().for_each(|row| *row = None);
            state.cached_rows = 0;
        }
        if let Some(raster) = state.raster.as_mut() {
            raster.release();
        }
    }

    /// Drop every cached row and close the raster.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.rows.iter_mut().for_each(|row| *row = None);
        state.cached_rows = 0;
        state.raster = None;
    }

    /// Whether [`TileCacheEntry::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().raster.is_none()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory raster whose sample at `(x, y)` is `y * 1000 + x`, counting row reads.
    pub(crate) struct GradientRaster {
        pub side: usize,
        pub reads: Arc<AtomicUsize>,
        pub releases: Arc<AtomicUsize>,
    }

    impl TileRaster for GradientRaster {
        fn width(&self) -> usize {
            self.side
        }

        fn height(&self) -> usize {
            self.side
        }

        fn read_row(&mut self, y: usize, out: &mut [f32]) -> Result<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            for (x, sample) in out.iter_mut().enumerate() {
                *sample = (y * 1000 + x) as f32;
            }
            Ok(())
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entry_with(
        side: usize,
        width: usize,
        correction: Arc<dyn SampleCorrection>,
    ) -> (TileCacheEntry, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let raster = GradientRaster {
            side,
            reads: reads.clone(),
            releases: Arc::new(AtomicUsize::new(0)),
        };
        let entry =
            TileCacheEntry::new(TileIndex::new(0, 0), Box::new(raster), width, 0.0, correction)
                .unwrap();
        (entry, reads)
    }

    fn entry(side: usize, width: usize) -> (TileCacheEntry, Arc<AtomicUsize>) {
        entry_with(side, width, Arc::new(NoCorrection))
    }

    #[test]
    fn test_rows_are_memoized() {
        let (entry, reads) = entry(8, 8);

        assert_eq!(entry.get_sample(3, 2).unwrap(), 2003.0);
        assert_eq!(entry.get_sample(7, 2).unwrap(), 2007.0);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(entry.cached_row_count(), 1);

        assert_eq!(entry.get_sample(0, 5).unwrap(), 5000.0);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(entry.cached_row_count(), 2);
    }

    #[test]
    fn test_clear_cache_reloads_rows() {
        let (entry, reads) = entry(4, 4);
        entry.get_sample(1, 1).unwrap();
        entry.get_sample(1, 2).unwrap();
        entry.clear_cache();
        assert_eq!(entry.cached_row_count(), 0);

        assert_eq!(entry.get_sample(1, 1).unwrap(), 1001.0);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_clear_cache_releases_raster() {
        let releases = Arc::new(AtomicUsize::new(0));
        let raster = GradientRaster {
            side: 4,
            reads: Arc::new(AtomicUsize::new(0)),
            releases: releases.clone(),
        };
        let entry =
            TileCacheEntry::new(TileIndex::new(0, 0), Box::new(raster), 4, 0.0, Arc::new(NoCorrection))
                .unwrap();

        entry.get_sample(2, 3).unwrap();
        entry.clear_cache();
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // Still readable afterwards
        assert_eq!(entry.get_sample(2, 3).unwrap(), 3002.0);
        assert!(!entry.is_disposed());
    }

    #[test]
    fn test_dispose_releases_raster() {
        let (entry, _) = entry(4, 4);
        entry.get_sample(0, 0).unwrap();
        entry.dispose();
        assert!(entry.is_disposed());
        assert_eq!(entry.cached_row_count(), 0);
        assert!(matches!(
            entry.get_sample(0, 0),
            Err(DemError::Disposed)
        ));
    }

    #[test]
    fn test_out_of_tile_pixel() {
        let (entry, _) = entry(5, 4);
        assert!(matches!(
            entry.get_sample(4, 0),
            Err(DemError::OutOfBounds { .. })
        ));
        assert!(entry.get_sample(0, 4).is_err());
    }

    #[test]
    fn test_raster_smaller_than_tile_rejected() {
        let raster = GradientRaster {
            side: 3,
            reads: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        };
        let result = TileCacheEntry::new(
            TileIndex::new(0, 0),
            Box::new(raster),
            4,
            0.0,
            Arc::new(NoCorrection),
        );
        assert!(matches!(result, Err(DemError::InvalidRaster(_))));
    }

    #[test]
    fn test_correction_skips_no_data() {
        // Row 0 of the gradient raster is 0, 1, 2, 3 and the no-data value is 0.0
        let (entry, _) = entry_with(4, 4, Arc::new(ConstantOffset(10.0)));
        assert_eq!(entry.get_sample(0, 0).unwrap(), 0.0);
        assert_eq!(entry.get_sample(1, 0).unwrap(), 11.0);
        assert_eq!(entry.get_sample(3, 0).unwrap(), 13.0);
    }

    #[test]
    fn test_correction_applied_once_per_row() {
        let (entry, _) = entry_with(4, 4, Arc::new(ConstantOffset(0.5)));
        assert_eq!(entry.get_sample(2, 1).unwrap(), 1002.5);
        assert_eq!(entry.get_sample(2, 1).unwrap(), 1002.5);
        entry.clear_cache();
        assert_eq!(entry.get_sample(2, 1).unwrap(), 1002.5);
    }
}
