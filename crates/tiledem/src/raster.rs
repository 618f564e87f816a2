//! Tile raster readers.
//!
//! A [`RasterReader`] opens a tile file and returns a [`TileRaster`] that can
//! read one row of samples at a time. [`FileRasterReader`] understands:
//!
//! - SRTM `.hgt` files: headerless square grids of big-endian `i16`, the side
//!   length derived from the file size.
//! - GeoTIFF `.tif`/`.tiff` files: single-band images of any numeric sample
//!   type, decoded one strip or tile at a time with the `tiff` crate.
//!
//! Both keep their file open between reads until [`TileRaster::release`] is
//! called, and reopen it on the next read.

use crate::{DemError, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::ColorType;

/// One opened tile raster.
pub trait TileRaster: Send {
    /// Width in pixels.
    fn width(&self) -> usize;

    /// Height in pixels.
    fn height(&self) -> usize;

    /// Read the first `out.len()` samples of row `y`.
    fn read_row(&mut self, y: usize, out: &mut [f32]) -> Result<()>;

    /// Close file handles and drop decoded data until the next read.
    fn release(&mut self) {}
}

/// Opens tile files.
pub trait RasterReader: Send + Sync {
    /// Open the tile file at `path`.
    fn open(&self, path: &Path) -> Result<Box<dyn TileRaster>>;
}

/// Reader for tile files on the local file system, dispatching on extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRasterReader;

impl RasterReader for FileRasterReader {
    fn open(&self, path: &Path) -> Result<Box<dyn TileRaster>> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());

        match extension.as_deref() {
            Some("hgt") => Ok(Box::new(HgtRaster::open(path)?)),
            Some("tif") | Some("tiff") => Ok(Box::new(TiffRaster::open(path)?)),
            _ => Err(DemError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Check that `out` fits a row of the raster and `y` is a valid row.
fn check_row(y: usize, len: usize, width: usize, height: usize) -> Result<()> {
    if y >= height || len > width {
        return Err(DemError::OutOfBounds {
            x: len.saturating_sub(1),
            y,
            width,
            height,
        });
    }
    Ok(())
}

/// SRTM HGT tile: square grid of big-endian signed 16-bit samples.
#[derive(Debug)]
pub struct HgtRaster {
    path: PathBuf,
    file: Option<BufReader<File>>,
    side: usize,
    buffer: Vec<u8>,
}

impl HgtRaster {
    /// Open an HGT file, inferring its side length from the file size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let samples = len / 2;
        let side = (samples as f64).sqrt().round() as u64;
        if len == 0 || len % 2 != 0 || side * side != samples {
            return Err(DemError::InvalidRaster(format!(
                "{} is {} bytes, not a square grid of 16-bit samples",
                path.display(),
                len
            )));
        }

        let side = side as usize;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(BufReader::new(file)),
            side,
            buffer: vec![0; side * 2],
        })
    }

    /// Whether the file handle is currently held.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl TileRaster for HgtRaster {
    fn width(&self) -> usize {
        self.side
    }

    fn height(&self) -> usize {
        self.side
    }

    fn read_row(&mut self, y: usize, out: &mut [f32]) -> Result<()> {
        check_row(y, out.len(), self.side, self.side)?;

        let file = match self.file.take() {
            Some(file) => file,
            None => BufReader::new(File::open(&self.path)?),
        };
        let file = self.file.insert(file);

        let bytes = &mut self.buffer[..out.len() * 2];
        file.seek(SeekFrom::Start((y * self.side * 2) as u64))?;
        file.read_exact(bytes)?;

        for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
            *sample = i16::from_be_bytes([chunk[0], chunk[1]]) as f32;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.file = None;
    }
}

type TiffDecoder = Decoder<BufReader<File>>;

/// Open a GeoTIFF with limits large enough for full-resolution tiles.
fn open_decoder(path: &Path) -> Result<TiffDecoder> {
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file))?;

    // 1 arc-second and CGIAR tiles exceed the decoder's default limits
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;
    limits.ifd_value_size = 1024 * 1024 * 1024;
    Ok(decoder.with_limits(limits))
}

/// Horizontal band of decoded chunks covering whole image rows.
#[derive(Debug)]
struct ChunkBand {
    /// Index of the band, i.e. chunk row.
    index: usize,
    /// `rows x width` samples, row-major.
    samples: Vec<f32>,
    rows: usize,
}

/// Single-band GeoTIFF tile, decoded a strip or tile at a time.
///
/// The most recently decoded band of chunks is kept so consecutive rows of a
/// multi-row strip decode once.
pub struct TiffRaster {
    path: PathBuf,
    decoder: Option<TiffDecoder>,
    band: Option<ChunkBand>,
    width: usize,
    height: usize,
    chunk_width: usize,
    chunk_height: usize,
}

impl std::fmt::Debug for TiffRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffRaster")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunk_width", &self.chunk_width)
            .field("chunk_height", &self.chunk_height)
            .field("open", &self.decoder.is_some())
            .finish()
    }
}

impl TiffRaster {
    /// Open a GeoTIFF tile and read its layout. No pixels are decoded yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;

        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(DemError::InvalidRaster(format!(
                    "{} is {:?}, expected a single band",
                    path.display(),
                    other
                )))
            }
        }

        let (width, height) = decoder.dimensions()?;
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        if width == 0 || height == 0 || chunk_width == 0 || chunk_height == 0 {
            return Err(DemError::InvalidRaster(format!(
                "{} has an empty {}x{} image",
                path.display(),
                width,
                height
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            decoder: Some(decoder),
            band: None,
            width: width as usize,
            height: height as usize,
            chunk_width: chunk_width as usize,
            chunk_height: chunk_height as usize,
        })
    }

    /// Whether the file handle is currently held.
    pub fn is_open(&self) -> bool {
        self.decoder.is_some()
    }

    /// Decode every chunk of band `index` into one row-major buffer.
    fn decode_band(&mut self, index: usize) -> Result<ChunkBand> {
        let decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => open_decoder(&self.path)?,
        };
        let decoder = self.decoder.insert(decoder);

        let rows = self.chunk_height.min(self.height - index * self.chunk_height);
        let chunks_across = (self.width + self.chunk_width - 1) / self.chunk_width;
        let mut samples = vec![0.0f32; rows * self.width];

        for cx in 0..chunks_across {
            let chunk_index = (index * chunks_across + cx) as u32;
            let (data_width, data_height) = decoder.chunk_data_dimensions(chunk_index);
            let data = to_f32(decoder.read_chunk(chunk_index)?);

            let (data_width, data_height) = (data_width as usize, data_height as usize);
            let x0 = cx * self.chunk_width;
            let cols = data_width.min(self.width - x0);
            for r in 0..data_height.min(rows) {
                let src = &data[r * data_width..r * data_width + cols];
                let dst = r * self.width + x0;
                samples[dst..dst + cols].copy_from_slice(src);
            }
        }

        Ok(ChunkBand {
            index,
            samples,
            rows,
        })
    }
}

/// Convert decoded samples of any numeric type to `f32`.
fn to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}

impl TileRaster for TiffRaster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn read_row(&mut self, y: usize, out: &mut [f32]) -> Result<()> {
        check_row(y, out.len(), self.width, self.height)?;

        let index = y / self.chunk_height;
        let band = match self.band.take() {
            Some(band) if band.index == index => band,
            _ => self.decode_band(index)?,
        };

        let r = y - index * self.chunk_height;
        if r >= band.rows || band.samples.len() < (r + 1) * self.width {
            return Err(DemError::InvalidRaster(format!(
                "{} is missing row {}",
                self.path.display(),
                y
            )));
        }
        let start = r * self.width;
        out.copy_from_slice(&band.samples[start..start + out.len()]);
        self.band = Some(band);
        Ok(())
    }

    fn release(&mut self) {
        self.decoder = None;
        self.band = None;
    }
}
