//! Lazy lifecycle of a single tile slot.
//!
//! A [`TileResource`] exists for every slot of the grid from the moment the
//! model is built, but touches the disk or the network only when a sample of
//! its tile is first requested. Resolution tries, in order:
//!
//! 1. the extracted tile file in the install directory,
//! 2. the tile archive in the install directory,
//! 3. the remote archive, if the grid is downloadable.
//!
//! The outcome is remembered. A tile the source confirms missing is never
//! requested again; a tile that failed for any other reason is retried on
//! the next access.

use crate::descriptor::{GridDescriptor, TileIndex};
use crate::entry::{SampleCorrection, TileCacheEntry};
use crate::raster::RasterReader;
use crate::transport::{DownloadCallback, DownloadStats, FetchOutcome, Transport};
use crate::{archive, DemError, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Resolution state of a tile slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileState {
    /// Not requested yet, or disposed.
    Unresolved,
    /// Opened and serving samples.
    Ready,
    /// The tile does not exist anywhere. Permanent.
    ConfirmedAbsent,
    /// The last attempt failed; the next access retries.
    TransientError(String),
    /// The remote source was unreachable on the last attempt.
    FatalError(String),
}

/// Result of asking a resource for its tile.
#[derive(Debug, Clone)]
pub enum TileLookup {
    /// The tile is open.
    Ready(Arc<TileCacheEntry>),
    /// The tile does not exist.
    Absent,
    /// The tile could not be loaded this time.
    Unavailable(String),
}

/// Everything a resource needs to resolve its tile, shared by all slots.
pub struct TileSources {
    transport: Box<dyn Transport>,
    reader: Box<dyn RasterReader>,
    correction: Arc<dyn SampleCorrection>,
    progress: Option<DownloadCallback>,
    tiles_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
}

impl TileSources {
    pub fn new(
        transport: Box<dyn Transport>,
        reader: Box<dyn RasterReader>,
        correction: Arc<dyn SampleCorrection>,
        progress: Option<DownloadCallback>,
    ) -> Self {
        Self {
            transport,
            reader,
            correction,
            progress,
            tiles_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
        }
    }

    /// Downloads performed through these sources so far.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    fn record_download(&self, bytes: u64) {
        self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Size and modification time of a file, used to notice it was replaced.
type FileStamp = (u64, Option<SystemTime>);

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let metadata = std::fs::metadata(path).ok()?;
    Some((metadata.len(), metadata.modified().ok()))
}

struct ResourceState {
    state: TileState,
    entry: Option<Arc<TileCacheEntry>>,
    local_file_exists: bool,
    remote_file_exists: bool,
    error_in_local_file: bool,
    /// Stamp of the local file when it was found unreadable.
    bad_local_file: Option<FileStamp>,
}

impl ResourceState {
    fn new() -> Self {
        Self {
            state: TileState::Unresolved,
            entry: None,
            local_file_exists: false,
            remote_file_exists: true,
            error_in_local_file: false,
            bad_local_file: None,
        }
    }

    fn local_file_ok(&mut self) {
        self.local_file_exists = true;
        self.error_in_local_file = false;
        self.bad_local_file = None;
    }
}

/// One slot of the tile grid.
pub struct TileResource {
    index: TileIndex,
    descriptor: Arc<GridDescriptor>,
    local_path: PathBuf,
    local_archive_path: PathBuf,
    state: Mutex<ResourceState>,
}

impl std::fmt::Debug for TileResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileResource")
            .field("index", &self.index)
            .field("local_path", &self.local_path)
            .field("state", &self.state())
            .finish()
    }
}

impl TileResource {
    /// Create an unresolved resource. Does no I/O.
    pub fn new(index: TileIndex, descriptor: Arc<GridDescriptor>) -> Self {
        let local_path = descriptor.tile_path(index);
        let local_archive_path = descriptor.archive_path(index);
        Self {
            index,
            descriptor,
            local_path,
            local_archive_path,
            state: Mutex::new(ResourceState::new()),
        }
    }

    pub fn index(&self) -> TileIndex {
        self.index
    }

    /// Where the extracted tile file lives.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Where the tile archive is kept.
    pub fn local_archive_path(&self) -> &Path {
        &self.local_archive_path
    }

    pub fn state(&self) -> TileState {
        self.state.lock().state.clone()
    }

    /// Whether the extracted tile file was present at the last resolution.
    pub fn local_file_exists(&self) -> bool {
        self.state.lock().local_file_exists
    }

    /// False once the remote source has reported the tile missing.
    pub fn remote_file_exists(&self) -> bool {
        self.state.lock().remote_file_exists
    }

    /// Whether the local tile file failed to open and has not changed since.
    pub fn error_in_local_file(&self) -> bool {
        self.state.lock().error_in_local_file
    }

    /// Return the tile, resolving it if needed.
    ///
    /// Resolution holds this resource's lock, so concurrent callers for the
    /// same tile wait for one download instead of starting their own.
    ///
    /// # Errors
    ///
    /// Only [`DemError::SourceUnreachable`] is returned as an error. Every
    /// other failure is reported as [`TileLookup::Unavailable`].
    pub fn get_tile(&self, sources: &TileSources) -> Result<TileLookup> {
        let mut state = self.state.lock();
        match state.state {
            TileState::Ready => {
                if let Some(entry) = &state.entry {
                    return Ok(TileLookup::Ready(entry.clone()));
                }
            }
            TileState::ConfirmedAbsent => return Ok(TileLookup::Absent),
            _ => {}
        }

        match self.resolve(&mut state, sources) {
            Ok(Some(entry)) => {
                debug!(tile = ?self.index, path = %self.local_path.display(), "Tile ready");
                state.state = TileState::Ready;
                state.entry = Some(entry.clone());
                Ok(TileLookup::Ready(entry))
            }
            Ok(None) => {
                debug!(tile = ?self.index, "Tile confirmed absent");
                state.state = TileState::ConfirmedAbsent;
                Ok(TileLookup::Absent)
            }
            Err(e) if e.is_fatal() => {
                warn!(tile = ?self.index, error = %e, "Tile source unreachable");
                if let Some(entry) = state.entry.take() {
                    entry.dispose();
                }
                state.state = TileState::FatalError(e.to_string());
                Err(e)
            }
            Err(e) => {
                warn!(tile = ?self.index, error = %e, "Tile unavailable, will retry");
                let reason = e.to_string();
                state.state = TileState::TransientError(reason.clone());
                Ok(TileLookup::Unavailable(reason))
            }
        }
    }

    /// Find, fetch and open the tile. `Ok(None)` means it does not exist.
    ///
    /// A local file that failed to decode is skipped until its size or
    /// modification time changes, but keeps the tile out of the absent state.
    fn resolve(
        &self,
        state: &mut ResourceState,
        sources: &TileSources,
    ) -> Result<Option<Arc<TileCacheEntry>>> {
        let mut local_error = None;

        state.local_file_exists = self.local_path.is_file();
        if state.error_in_local_file && file_stamp(&self.local_path) != state.bad_local_file {
            debug!(path = %self.local_path.display(), "Tile file changed, reopening");
            state.error_in_local_file = false;
            state.bad_local_file = None;
        }

        if state.local_file_exists {
            if state.error_in_local_file {
                local_error = Some(DemError::InvalidRaster(format!(
                    "{} is unchanged since it failed to open",
                    self.local_path.display()
                )));
            } else {
                match self.open_entry(sources) {
                    Ok(entry) => return Ok(Some(entry)),
                    Err(e) => {
                        warn!(path = %self.local_path.display(), error = %e, "Ignoring unreadable tile file");
                        // I/O failures such as running out of descriptors say nothing about the file
                        if !matches!(e, DemError::Io(_)) {
                            state.error_in_local_file = true;
                            state.bad_local_file = file_stamp(&self.local_path);
                        }
                        local_error = Some(e);
                    }
                }
            }
        }

        if self.local_archive_path.is_file() {
            match self.open_from_archive(sources) {
                Ok(entry) => {
                    state.local_file_ok();
                    return Ok(Some(entry));
                }
                Err(e) => {
                    warn!(path = %self.local_archive_path.display(), error = %e, "Ignoring unreadable tile archive");
                    local_error = Some(e);
                }
            }
        }

        if self.descriptor.is_downloadable() && state.remote_file_exists {
            let url = self
                .descriptor
                .family()
                .remote_url(self.index, &self.descriptor);
            let outcome = sources.transport.fetch(
                &url,
                &self.local_archive_path,
                None,
                sources.progress.as_ref(),
            )?;
            match outcome {
                FetchOutcome::Downloaded { bytes } => {
                    sources.record_download(bytes);
                    let entry = self.open_from_archive(sources)?;
                    state.local_file_ok();
                    return Ok(Some(entry));
                }
                FetchOutcome::NotFound => {
                    state.remote_file_exists = false;
                }
                FetchOutcome::Unreachable(reason) => {
                    return Err(DemError::SourceUnreachable { url, reason });
                }
            }
        }

        // Local data that exists but cannot be read is a disk problem, not absence
        match local_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn open_from_archive(&self, sources: &TileSources) -> Result<Arc<TileCacheEntry>> {
        let file_name = self
            .descriptor
            .family()
            .tile_file_name(self.index, &self.descriptor);
        archive::extract_tile(&self.local_archive_path, &file_name, &self.local_path)?;
        self.open_entry(sources)
    }

    /// Open the local tile file and check that its first row can be read.
    fn open_entry(&self, sources: &TileSources) -> Result<Arc<TileCacheEntry>> {
        let raster = sources.reader.open(&self.local_path)?;
        let entry = TileCacheEntry::new(
            self.index,
            raster,
            self.descriptor.tile_width_pixels(),
            self.descriptor.no_data_value(),
            sources.correction.clone(),
        )?;
        entry.get_sample(0, 0)?;
        entry.clear_cache();
        Ok(Arc::new(entry))
    }

    /// The open entry, if the tile is ready.
    pub fn entry(&self) -> Option<Arc<TileCacheEntry>> {
        self.state.lock().entry.clone()
    }

    /// Close the tile and forget the resolution outcome.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entry.take() {
            entry.dispose();
        }
        *state = ResourceState::new();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::entry::NoCorrection;
    use crate::raster::tests::{hgt_bytes, write_hgt};
    use crate::raster::FileRasterReader;
    use crate::DemFamily;
    use std::fs;

    /// What a [`StubTransport`] answers.
    #[derive(Clone)]
    pub(crate) enum Serve {
        Archive(Vec<u8>),
        NotFound,
        Unreachable,
        Fail,
    }

    /// Transport that answers from memory and counts requests.
    ///
    /// Clones share the answer and the counter, so a test can keep one
    /// handle while the model owns another.
    #[derive(Clone)]
    pub(crate) struct StubTransport {
        serve: Arc<Mutex<Serve>>,
        calls: Arc<AtomicUsize>,
    }

    impl StubTransport {
        pub(crate) fn new(serve: Serve) -> Self {
            Self {
                serve: Arc::new(Mutex::new(serve)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn set(&self, serve: Serve) {
            *self.serve.lock() = serve;
        }
    }

    impl Transport for StubTransport {
        fn fetch(
            &self,
            url: &str,
            target: &Path,
            _expected_size: Option<u64>,
            _progress: Option<&DownloadCallback>,
        ) -> Result<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &*self.serve.lock() {
                Serve::Archive(bytes) => {
                    fs::write(target, bytes)?;
                    Ok(FetchOutcome::Downloaded {
                        bytes: bytes.len() as u64,
                    })
                }
                Serve::NotFound => Ok(FetchOutcome::NotFound),
                Serve::Unreachable => Ok(FetchOutcome::Unreachable("connection refused".to_string())),
                Serve::Fail => Err(DemError::DownloadFailed {
                    url: url.to_string(),
                    reason: "HTTP 503".to_string(),
                }),
            }
        }
    }

    /// Zip holding a 4x4 HGT tile named `name` with value `y * 10 + x`.
    pub(crate) fn tile_archive(dir: &Path, name: &str) -> Vec<u8> {
        let path = dir.join("staging.zip");
        let hgt = hgt_bytes(4, |x, y| (y * 10 + x) as i16);
        write_zip(&path, &[(name, hgt.as_slice())]);
        let bytes = fs::read(&path).unwrap();
        fs::remove_file(&path).unwrap();
        bytes
    }

    /// 4-pixel 1° tiles covering the globe.
    pub(crate) fn small_grid(dir: &Path) -> GridDescriptor {
        GridDescriptor::new(DemFamily::Srtm3Hgt, 4, 1.0, 360, 180, -32768.0, dir).unwrap()
    }

    const ORIGIN: TileIndex = TileIndex { x: 180, y: 89 };

    fn setup(
        serve: Serve,
        downloadable: bool,
    ) -> (tempfile::TempDir, TileResource, TileSources, StubTransport) {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = Arc::new(small_grid(dir.path()).with_downloadable(downloadable));
        let resource = TileResource::new(ORIGIN, descriptor);
        let transport = StubTransport::new(serve);
        let calls = transport.clone();
        let sources = TileSources::new(
            Box::new(transport),
            Box::new(FileRasterReader),
            Arc::new(NoCorrection),
            None,
        );
        (dir, resource, sources, calls)
    }

    fn ready(lookup: TileLookup) -> Arc<TileCacheEntry> {
        match lookup {
            TileLookup::Ready(entry) => entry,
            other => panic!("expected a ready tile, got {:?}", other),
        }
    }

    #[test]
    fn test_paths_follow_family_naming() {
        let (dir, resource, _, _) = setup(Serve::NotFound, true);
        assert_eq!(resource.local_path(), dir.path().join("N00E000.hgt"));
        assert_eq!(resource.local_archive_path(), dir.path().join("N00E000.hgt.zip"));
        assert_eq!(resource.state(), TileState::Unresolved);
    }

    #[test]
    fn test_local_file_is_used_without_network() {
        let (dir, resource, sources, calls) = setup(Serve::Fail, true);
        write_hgt(&dir.path().join("N00E000.hgt"), 4, |x, y| (y * 10 + x) as i16);

        let entry = ready(resource.get_tile(&sources).unwrap());
        assert_eq!(entry.get_sample(2, 3).unwrap(), 32.0);
        assert_eq!(resource.state(), TileState::Ready);
        assert!(resource.local_file_exists());
        assert_eq!(calls.calls(), 0);

        // Second lookup returns the same entry
        let again = ready(resource.get_tile(&sources).unwrap());
        assert!(Arc::ptr_eq(&entry, &again));
    }

    #[test]
    fn test_local_archive_is_extracted() {
        let (dir, resource, sources, calls) = setup(Serve::Fail, false);
        let bytes = tile_archive(dir.path(), "N00E000.hgt");
        fs::write(dir.path().join("N00E000.hgt.zip"), bytes).unwrap();

        let entry = ready(resource.get_tile(&sources).unwrap());
        assert_eq!(entry.get_sample(1, 0).unwrap(), 1.0);
        assert!(dir.path().join("N00E000.hgt").is_file());
        assert_eq!(calls.calls(), 0);
    }

    #[test]
    fn test_download_then_extract() {
        let staging = tempfile::tempdir().unwrap();
        let archive = tile_archive(staging.path(), "N00E000.hgt");
        let size = archive.len() as u64;
        let (dir, resource, sources, calls) = setup(Serve::Archive(archive), true);

        let entry = ready(resource.get_tile(&sources).unwrap());
        assert_eq!(entry.get_sample(3, 3).unwrap(), 33.0);
        assert_eq!(calls.calls(), 1);
        assert!(dir.path().join("N00E000.hgt.zip").is_file());
        assert_eq!(
            sources.download_stats(),
            DownloadStats {
                tiles_downloaded: 1,
                bytes_downloaded: size,
            }
        );
    }

    #[test]
    fn test_absence_is_permanent() {
        let (_dir, resource, sources, calls) = setup(Serve::NotFound, true);

        for _ in 0..3 {
            assert!(matches!(resource.get_tile(&sources).unwrap(), TileLookup::Absent));
        }
        assert_eq!(resource.state(), TileState::ConfirmedAbsent);
        assert!(!resource.remote_file_exists());
        assert_eq!(calls.calls(), 1);
    }

    #[test]
    fn test_not_downloadable_without_local_data_is_absent() {
        let (_dir, resource, sources, calls) = setup(Serve::Fail, false);
        assert!(matches!(resource.get_tile(&sources).unwrap(), TileLookup::Absent));
        assert_eq!(resource.state(), TileState::ConfirmedAbsent);
        assert_eq!(calls.calls(), 0);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let (dir, resource, sources, calls) = setup(Serve::Fail, true);

        assert!(matches!(
            resource.get_tile(&sources).unwrap(),
            TileLookup::Unavailable(_)
        ));
        assert!(matches!(resource.state(), TileState::TransientError(_)));

        let archive = tile_archive(dir.path(), "N00E000.hgt");
        calls.set(Serve::Archive(archive));
        ready(resource.get_tile(&sources).unwrap());
        assert_eq!(calls.calls(), 2);
        assert_eq!(resource.state(), TileState::Ready);
    }

    #[test]
    fn test_unreachable_source_is_fatal() {
        let (_dir, resource, sources, calls) = setup(Serve::Unreachable, true);

        let err = resource.get_tile(&sources).unwrap_err();
        assert!(matches!(err, DemError::SourceUnreachable { .. }));
        assert!(matches!(resource.state(), TileState::FatalError(_)));

        // Retried on the next access
        assert!(resource.get_tile(&sources).is_err());
        assert_eq!(calls.calls(), 2);
    }

    #[test]
    fn test_corrupt_local_file_falls_back_to_archive() {
        let (dir, resource, sources, _) = setup(Serve::Fail, false);
        fs::write(dir.path().join("N00E000.hgt"), [1u8, 2, 3]).unwrap();
        let bytes = tile_archive(dir.path(), "N00E000.hgt");
        fs::write(dir.path().join("N00E000.hgt.zip"), bytes).unwrap();

        let entry = ready(resource.get_tile(&sources).unwrap());
        assert_eq!(entry.get_sample(0, 2).unwrap(), 20.0);
        assert!(!resource.error_in_local_file());
    }

    #[test]
    fn test_corrupt_local_file_without_fallback_is_transient() {
        let (dir, resource, sources, calls) = setup(Serve::Fail, false);
        fs::write(dir.path().join("N00E000.hgt"), [1u8, 2, 3]).unwrap();

        assert!(matches!(
            resource.get_tile(&sources).unwrap(),
            TileLookup::Unavailable(_)
        ));
        assert!(resource.error_in_local_file());
        assert!(matches!(resource.state(), TileState::TransientError(_)));

        // Still unreadable, still retryable rather than absent
        assert!(matches!(
            resource.get_tile(&sources).unwrap(),
            TileLookup::Unavailable(_)
        ));
        assert!(matches!(resource.state(), TileState::TransientError(_)));
        assert_eq!(calls.calls(), 0);
    }

    #[test]
    fn test_repaired_local_file_is_reopened() {
        let (dir, resource, sources, _) = setup(Serve::Fail, false);
        let path = dir.path().join("N00E000.hgt");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(matches!(
            resource.get_tile(&sources).unwrap(),
            TileLookup::Unavailable(_)
        ));

        write_hgt(&path, 4, |x, y| (y * 10 + x) as i16);
        let entry = ready(resource.get_tile(&sources).unwrap());
        assert_eq!(entry.get_sample(3, 1).unwrap(), 13.0);
        assert_eq!(resource.state(), TileState::Ready);
        assert!(!resource.error_in_local_file());
    }

    #[test]
    fn test_removed_corrupt_file_without_remote_is_absent() {
        let (dir, resource, sources, _) = setup(Serve::Fail, false);
        let path = dir.path().join("N00E000.hgt");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        resource.get_tile(&sources).unwrap();

        fs::remove_file(&path).unwrap();
        assert!(matches!(resource.get_tile(&sources).unwrap(), TileLookup::Absent));
        assert!(!resource.error_in_local_file());
    }

    #[test]
    fn test_corrupt_local_file_after_remote_not_found_stays_transient() {
        let (dir, resource, sources, calls) = setup(Serve::NotFound, true);
        fs::write(dir.path().join("N00E000.hgt"), [1u8, 2, 3]).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                resource.get_tile(&sources).unwrap(),
                TileLookup::Unavailable(_)
            ));
        }
        assert!(!resource.remote_file_exists());
        assert!(matches!(resource.state(), TileState::TransientError(_)));
        assert_eq!(calls.calls(), 1);
    }

    #[test]
    fn test_dispose_resets_state() {
        let (dir, resource, sources, _) = setup(Serve::Fail, false);
        write_hgt(&dir.path().join("N00E000.hgt"), 4, |_, _| 5);

        let entry = ready(resource.get_tile(&sources).unwrap());
        resource.dispose();
        assert!(entry.is_disposed());
        assert!(resource.entry().is_none());
        assert_eq!(resource.state(), TileState::Unresolved);

        // Resolves again from disk
        let entry = ready(resource.get_tile(&sources).unwrap());
        assert_eq!(entry.get_sample(0, 0).unwrap(), 5.0);
    }
}
