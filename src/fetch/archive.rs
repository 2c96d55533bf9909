//! Checksummed archive sources
//!
//! The archive is downloaded next to the target (or copied, for local paths
//! and `file://` URIs), checked against the recipe's sha256, and unpacked into
//! the target. A marker file inside the extracted tree records the hash it was
//! extracted from, which is what `ready` looks at.

use super::extract;
use super::hash::sha256_file;
use super::{Fetch, SourceKind};
use crate::core::output::{self, ProgressGuard};
use crate::error::{Error, Result, ignore_not_found};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker written into an extracted tree, holding the archive's sha256
pub const HASH_MARKER: &str = ".forge-hash";

/// Recognized archive suffixes, longest first
const EXTENSIONS: &[&str] = &[
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".tgz", ".tbz2", ".tbz", ".txz", ".tzst",
    ".tar", ".zip", ".7z", ".rar",
];

#[derive(Debug)]
pub struct Archive {
    uri: String,
    hash: String,
    filename: String,
    target: PathBuf,
    timeout: Duration,
    /// The archive already sat at `archive_path` before we fetched it; it is
    /// used in place and never deleted
    in_place: bool,
}

impl Archive {
    /// Create an archive source.
    ///
    /// The download filename is `filename` when given, else the URI's last
    /// path segment, which must then end in a known archive suffix.
    pub fn new(
        uri: impl Into<String>,
        hash: impl Into<String>,
        filename: Option<String>,
    ) -> Result<Self> {
        let uri = uri.into();
        let filename = match filename {
            Some(name) if !name.is_empty() && !name.contains('/') => name,
            Some(name) => {
                return Err(Error::InvalidSource(format!(
                    "archive filename {:?} must be a plain file name",
                    name
                )));
            }
            None => archive_filename(&uri).ok_or_else(|| Error::UnsupportedArchive(uri.clone()))?,
        };
        Ok(Self {
            uri,
            hash: hash.into().trim().to_lowercase(),
            filename,
            target: PathBuf::new(),
            timeout: Duration::from_secs(600),
            in_place: false,
        })
    }

    /// Whether a URI names an archive this fetcher can handle
    pub fn valid_uri(uri: &str) -> bool {
        archive_filename(uri).is_some()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Where the downloaded archive is kept while the source is acquired
    pub fn archive_path(&self) -> PathBuf {
        match self.target.parent() {
            Some(parent) => parent.join(&self.filename),
            None => PathBuf::from(&self.filename),
        }
    }

    fn marker_path(&self) -> PathBuf {
        self.target.join(HASH_MARKER)
    }

    /// Download or copy the archive and verify its checksum
    fn download(&mut self) -> Result<PathBuf> {
        let dest = self.archive_path();
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.in_place = false;
        match local_path(&self.uri) {
            Some(src) if same_file(&src, &dest) => {
                debug!(archive = %dest.display(), "archive already in place");
                self.in_place = true;
            }
            Some(src) => {
                std::fs::copy(&src, &dest).map_err(|e| Error::Download {
                    url: self.uri.clone(),
                    message: e.to_string(),
                })?;
            }
            None => download_with_progress(&self.uri, &dest, &self.filename)?,
        }

        let actual = sha256_file(&dest)?;
        if actual != self.hash {
            return Err(Error::HashMismatch {
                path: dest,
                expected: self.hash.clone(),
                actual,
            });
        }

        debug!(archive = %dest.display(), "checksum verified");
        Ok(dest)
    }

    fn unpack(&mut self) -> Result<()> {
        let archive = self.download()?;
        extract::unpack_into(&archive, &self.target, self.timeout)?;
        std::fs::write(self.marker_path(), format!("{}\n", self.hash))?;
        Ok(())
    }

    fn remove_archive(&self) -> Result<()> {
        if self.in_place {
            return Ok(());
        }
        ignore_not_found(std::fs::remove_file(self.archive_path()))
    }
}

impl Fetch for Archive {
    fn kind(&self) -> SourceKind {
        SourceKind::Archive
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn target(&self) -> &Path {
        &self.target
    }

    fn bind(&mut self, target: PathBuf, timeout: Duration) {
        self.target = target;
        self.timeout = timeout;
    }

    fn ready(&self) -> bool {
        std::fs::read_to_string(self.marker_path())
            .map(|marker| marker.trim() == self.hash)
            .unwrap_or(false)
    }

    fn acquire(&mut self) -> Result<()> {
        if self.ready() {
            debug!(target_dir = %self.target.display(), "archive already extracted");
            return Ok(());
        }

        info!(uri = %self.uri, "fetching archive");
        let unpacked = self.unpack();
        if unpacked.is_err() {
            // partial download, bad checksum or failed extraction: leave no trace
            if let Err(e) = self.release() {
                warn!(target_dir = %self.target.display(), "cleanup after failed fetch: {}", e);
            }
        }
        unpacked
    }

    fn release(&mut self) -> Result<()> {
        self.remove_archive()?;
        ignore_not_found(std::fs::remove_dir_all(&self.target))
    }

    fn current_hash(&self) -> Result<String> {
        Ok(self.hash.clone())
    }

    fn src_hash(&mut self) -> Result<String> {
        Ok(self.hash.clone())
    }
}

/// Filename of an archive URI: the last path segment, if it carries a known
/// archive suffix
fn archive_filename(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next()?;
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    let lower = name.to_lowercase();
    EXTENSIONS
        .iter()
        .any(|ext| lower.len() > ext.len() && lower.ends_with(ext))
        .then(|| name.to_string())
}

/// Whether two paths name the same existing file
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Local filesystem path for `file://` URIs and bare paths
fn local_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    (!uri.contains("://")).then(|| PathBuf::from(uri))
}

fn download_with_progress(url: &str, dest: &Path, filename: &str) -> Result<()> {
    let download_error = |message: String| Error::Download {
        url: url.to_string(),
        message,
    };

    let spinner = ProgressGuard(output::spinner(&format!("downloading {}", filename)));
    let response = ureq::get(url)
        .call()
        .map_err(|e| download_error(e.to_string()))?;

    let total: Option<u64> = response
        .header("content-length")
        .and_then(|s| s.parse().ok());
    let progress = match total {
        Some(len) => {
            drop(spinner);
            ProgressGuard(output::download_progress(len))
        }
        None => spinner,
    };

    let mut file = std::fs::File::create(dest)?;
    let mut reader = response.into_reader();
    let mut buffer = [0u8; 8192];
    let mut written = 0u64;

    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| download_error(format!("read error: {}", e)))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        written += n as u64;
        progress.0.set_position(written);
    }

    drop(progress);
    output::detail(&format!("downloaded {} ({} bytes)", filename, written));
    Ok(())
}
