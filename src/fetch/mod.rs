//! Source fetchers
//!
//! A fetcher materializes a recipe's source tree at its target directory and
//! can clean it up again. Every fetcher shares one lifecycle:
//!
//! ```text
//! acquire() -> [build, link, verify] -> release()
//! ```
//!
//! `acquire_scoped` wraps that lifecycle in a guard so `release` runs on every
//! exit path, including an early return with `?`.
//!
//! Recipes declare sources as maps in their `repos` table:
//!
//! ```rhai
//! let repos = #{
//!     stable:   #{ archive: "https://example.com/foo-1.0.tar.gz", hash: "ab12..." },
//!     unstable: #{ git: "https://github.com/example/foo", branch: "main" },
//!     pinned:   #{ hg: "https://hg.example.com/foo", tag: "1.0" },
//!     probed:   #{ uri: "https://example.com/foo.git" },
//!     none:     #{ dummy: true },
//! };
//! ```

mod archive;
mod dummy;
mod extract;
mod hash;
mod vcs;

pub use archive::Archive;
pub use dummy::Dummy;
pub use extract::Format;
pub use hash::sha256_file;
pub use vcs::{Git, GitRepo, Hg, HgRepo, Vcs, VersionRepo};

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Which kind of source a fetcher handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Archive,
    Git,
    Hg,
    Dummy,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Archive => "archive",
            Self::Git => "git",
            Self::Hg => "hg",
            Self::Dummy => "dummy",
        };
        f.write_str(name)
    }
}

/// A source provider bound to one target directory.
///
/// `ready` must stay cheap and free of side effects: it only looks at what is
/// already on disk. `release` is idempotent.
pub trait Fetch: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Source location as declared by the recipe (empty for dummy sources)
    fn uri(&self) -> &str;

    /// Directory the source is materialized into
    fn target(&self) -> &Path;

    /// Point the fetcher at its target and set the idle timeout used for any
    /// process it spawns
    fn bind(&mut self, target: PathBuf, timeout: Duration);

    /// Whether the target already holds the expected source
    fn ready(&self) -> bool;

    /// Make the target hold the expected source, doing as little work as
    /// `ready` allows
    fn acquire(&mut self) -> Result<()>;

    /// Remove or reset whatever `acquire` left behind
    fn release(&mut self) -> Result<()>;

    /// Identity of the source currently at the target (acquired state)
    fn current_hash(&self) -> Result<String>;

    /// Identity of the source this fetcher would produce.
    ///
    /// The default enters and leaves the acquire scope to read it.
    fn src_hash(&mut self) -> Result<String> {
        self.acquire()?;
        let hash = self.current_hash();
        let released = self.release();
        let hash = hash?;
        released?;
        Ok(hash)
    }

    /// Human-readable one-liner for `info` output
    fn describe(&self) -> String {
        if self.uri().is_empty() {
            self.kind().to_string()
        } else {
            format!("{} {}", self.kind(), self.uri())
        }
    }
}

impl fmt::Debug for dyn Fetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetch")
            .field("kind", &self.kind())
            .field("uri", &self.uri())
            .field("target", &self.target())
            .finish()
    }
}

impl<'f> dyn Fetch + 'f {
    /// Acquire the source and return a guard that releases it when dropped
    pub fn acquire_scoped(&mut self) -> Result<Acquired<'_>> {
        self.acquire()?;
        Ok(Acquired {
            fetcher: self,
            released: false,
        })
    }
}

/// Guard for an acquired source.
///
/// `finish` releases and reports the result. Dropping the guard without
/// calling `finish` still releases, logging any failure.
pub struct Acquired<'a> {
    fetcher: &'a mut (dyn Fetch + 'a),
    released: bool,
}

impl Acquired<'_> {
    pub fn target(&self) -> &Path {
        self.fetcher.target()
    }

    /// Hash of the acquired source, read without leaving the scope
    pub fn src_hash(&self) -> Result<String> {
        self.fetcher.current_hash()
    }

    pub fn finish(mut self) -> Result<()> {
        self.released = true;
        self.fetcher.release()
    }
}

impl Drop for Acquired<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.fetcher.release() {
            warn!(path = %self.fetcher.target().display(), "release failed: {}", e);
        }
    }
}

/// A channel's source declaration, as written in a recipe's `repos` map
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub archive: Option<String>,
    pub hash: Option<String>,
    pub filename: Option<String>,
    pub git: Option<String>,
    pub hg: Option<String>,
    pub uri: Option<String>,
    pub tag: Option<String>,
    pub branch: Option<String>,
    #[serde(default)]
    pub dummy: bool,
}

impl SourceSpec {
    /// Turn the declaration into an unbound fetcher
    pub fn into_fetcher(self) -> Result<Box<dyn Fetch>> {
        let declared = [
            self.archive.is_some(),
            self.git.is_some(),
            self.hg.is_some(),
            self.uri.is_some(),
            self.dummy,
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if declared != 1 {
            return Err(Error::InvalidSource(
                "exactly one of archive, git, hg, uri or dummy must be set".to_string(),
            ));
        }
        if self.tag.is_some() && self.branch.is_some() {
            return Err(Error::InvalidSource(
                "tag and branch are mutually exclusive".to_string(),
            ));
        }

        if self.dummy {
            return Ok(Box::new(Dummy::new()));
        }
        if let Some(url) = self.archive.clone() {
            return self.archive_fetcher(url);
        }
        if let Some(url) = self.git.clone() {
            return Ok(Box::new(self.revision(GitRepo::new(url))));
        }
        if let Some(url) = self.hg.clone() {
            return Ok(Box::new(self.revision(HgRepo::new(url))));
        }

        let uri = self.uri.clone().unwrap_or_default();
        match detect_kind(&uri)? {
            SourceKind::Archive => self.archive_fetcher(uri),
            SourceKind::Git => Ok(Box::new(self.revision(GitRepo::new(uri)))),
            SourceKind::Hg => Ok(Box::new(self.revision(HgRepo::new(uri)))),
            SourceKind::Dummy => Ok(Box::new(Dummy::new())),
        }
    }

    fn archive_fetcher(&self, url: String) -> Result<Box<dyn Fetch>> {
        let hash = self.hash.clone().ok_or_else(|| {
            Error::InvalidSource(format!("archive {} needs a sha256 hash", url))
        })?;
        let archive = Archive::new(url, hash, self.filename.clone())?;
        Ok(Box::new(archive))
    }

    fn revision<V: Vcs>(&self, mut repo: VersionRepo<V>) -> VersionRepo<V> {
        if let Some(tag) = &self.tag {
            repo.set_tag(tag.clone());
        } else if let Some(branch) = &self.branch {
            repo.set_branch(branch.clone());
        }
        repo
    }
}

/// Pick a fetcher kind for a bare URI by probing, in order: archive filename
/// pattern, git remote, hg remote
pub fn detect_kind(uri: &str) -> Result<SourceKind> {
    if Archive::valid_uri(uri) {
        Ok(SourceKind::Archive)
    } else if Git::valid_uri(uri) {
        Ok(SourceKind::Git)
    } else if Hg::valid_uri(uri) {
        Ok(SourceKind::Hg)
    } else {
        Err(Error::UnsupportedUri(uri.to_string()))
    }
}

/// Build a fetcher for `uri`, bound to `target`.
///
/// Archives found this way need their expected hash; pass it as `hash`.
pub fn fetcher_for_uri(
    uri: &str,
    hash: Option<&str>,
    target: PathBuf,
    timeout: Duration,
) -> Result<Box<dyn Fetch>> {
    let spec = SourceSpec {
        uri: Some(uri.to_string()),
        hash: hash.map(str::to_string),
        ..SourceSpec::default()
    };
    let mut fetcher = spec.into_fetcher()?;
    fetcher.bind(target, timeout);
    Ok(fetcher)
}
