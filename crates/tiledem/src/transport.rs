//! Fetching tile archives from a remote source.
//!
//! The [`Transport`] trait separates the three outcomes the tile lifecycle
//! cares about:
//!
//! - [`FetchOutcome::Downloaded`]: the archive is now at the target path.
//! - [`FetchOutcome::NotFound`]: the source confirms the tile does not exist
//!   (most DEMs have no tiles over open ocean). Permanent.
//! - [`FetchOutcome::Unreachable`]: the source itself cannot be reached.
//!
//! Any other failure (unexpected HTTP status, truncated body, disk error) is
//! returned as `Err` and treated as transient.

use crate::{DemError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// HTTP timeout for a single tile download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Callback for tile download progress.
pub type DownloadCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Result of a single fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was written to the target path.
    Downloaded {
        /// Number of bytes written.
        bytes: u64,
    },
    /// The source has no such file.
    NotFound,
    /// The source could not be contacted.
    Unreachable(String),
}

/// Downloads remote files to local paths.
pub trait Transport: Send + Sync {
    /// Fetch `url` into `target`.
    ///
    /// `expected_size`, when known, is checked against the received length.
    fn fetch(
        &self,
        url: &str,
        target: &Path,
        expected_size: Option<u64>,
        progress: Option<&DownloadCallback>,
    ) -> Result<FetchOutcome>;
}

/// Download statistics for a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of tiles downloaded this session.
    pub tiles_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
}

/// Blocking HTTP(S) transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish()
    }
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tiledem/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(
        &self,
        url: &str,
        target: &Path,
        expected_size: Option<u64>,
        progress: Option<&DownloadCallback>,
    ) -> Result<FetchOutcome> {
        if let Some(cb) = progress {
            cb(&format!("Downloading {}", url));
        }
        debug!(url, "Requesting tile archive");

        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return Ok(FetchOutcome::Unreachable(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            debug!(url, %status, "Tile archive not found");
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(DemError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let bytes = match response.bytes() {
            Ok(bytes) => bytes,
            Err(e) if e.is_timeout() => return Ok(FetchOutcome::Unreachable(e.to_string())),
            Err(e) => return Err(e.into()),
        };
        write_download(&bytes, target, expected_size)?;

        info!(url, bytes = bytes.len(), "Downloaded tile archive");
        if let Some(cb) = progress {
            cb(&format!("Downloaded {} ({} bytes)", url, bytes.len()));
        }
        Ok(FetchOutcome::Downloaded {
            bytes: bytes.len() as u64,
        })
    }
}

/// Write downloaded bytes to `target` through a `.part` file.
pub(crate) fn write_download(bytes: &[u8], target: &Path, expected_size: Option<u64>) -> Result<()> {
    if let Some(expected) = expected_size {
        if bytes.len() as u64 != expected {
            return Err(DemError::DownloadFailed {
                url: target.display().to_string(),
                reason: format!("received {} bytes, expected {}", bytes.len(), expected),
            });
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = target.with_extension("part");
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&partial)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&partial, target)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}
