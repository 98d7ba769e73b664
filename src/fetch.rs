// src/fetch.rs

//! Download cache for recipe sources
//!
//! Archives are cached by the basename of their URL path, so two recipes
//! that share a source URL share one cache entry. A cached file whose
//! checksum no longer matches is discarded and downloaded again; a fresh
//! download that still mismatches is fatal.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// Transfers a URL to a local file
pub trait Downloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Downloads over HTTP(S); `file://` URLs and bare paths are copied
#[derive(Debug, Default)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(local) = local_source_path(url) {
            fs::copy(&local, dest).map_err(|e| Error::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(());
        }

        let download_err = |reason: String| Error::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = reqwest::blocking::get(url).map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        let mut out = fs::File::create(dest)?;
        io::copy(&mut response, &mut out).map_err(|e| download_err(e.to_string()))?;
        Ok(())
    }
}

/// Resolve `file://` URLs and plain filesystem paths
fn local_source_path(url: &str) -> Option<PathBuf> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed.to_file_path().ok(),
        Ok(_) => None,
        Err(_) => Some(PathBuf::from(url)),
    }
}

/// Cache file name for a source URL
pub fn cache_file_name(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("source")
        .to_string()
}

/// Shared download cache for one environment root
pub struct SourceCache {
    dir: PathBuf,
    downloader: Box<dyn Downloader>,
}

impl SourceCache {
    pub fn new(dir: PathBuf, downloader: Box<dyn Downloader>) -> Self {
        Self { dir, downloader }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path the given URL is (or would be) cached at
    pub fn cached_path(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }

    /// Fetch `url` into the cache, verifying `checksum` when given
    pub fn fetch(&self, url: &str, checksum: Option<&Checksum>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let cached = self.cached_path(url);

        if let Some(sum) = checksum
            && cached.exists()
            && let Err(actual) = sum.verify_file(&cached)?
        {
            warn!(
                "Bad checksum for cached {} (expected {}, got {}), re-downloading",
                cached.display(),
                sum,
                actual
            );
            fs::remove_file(&cached)?;
        }

        if cached.exists() {
            debug!("Using cached source: {}", cached.display());
            return Ok(cached);
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            self.download_into(url, &cached)?;

            let Some(sum) = checksum else {
                return Ok(cached);
            };

            match sum.verify_file(&cached)? {
                Ok(()) => return Ok(cached),
                Err(actual) if attempts < 2 => {
                    warn!("Corrupted download of {} (got {}), retrying once", url, actual);
                    fs::remove_file(&cached)?;
                }
                Err(actual) => {
                    fs::remove_file(&cached)?;
                    return Err(Error::ChecksumMismatch {
                        url: url.to_string(),
                        expected: sum.to_string(),
                        actual,
                    });
                }
            }
        }
    }

    fn download_into(&self, url: &str, cached: &Path) -> Result<()> {
        info!("DOWNLOADING {}", url);
        let partial = cached.with_extension("part");
        if let Err(e) = self.downloader.download(url, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, cached)?;
        Ok(())
    }
}
