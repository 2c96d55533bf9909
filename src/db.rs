//! Install database: what is installed, from which channel, at which source hash
//!
//! ## Format
//!
//! ```toml
//! [ripgrep]
//! hash = "4f1c9a0..."
//! repo = "stable"
//! date = "2026-03-02T14:07:11+00:00"
//! timestamp = 1772460431
//! ```
//!
//! The whole file is rewritten on every save.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One installed recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// Source hash at install time (commit id, archive sha256, or "dummy")
    pub hash: String,
    /// Channel the source came from
    pub repo: String,
    /// Install time, RFC 3339
    pub date: String,
    /// Install time, seconds since the epoch
    pub timestamp: i64,
}

impl InstallRecord {
    /// A record stamped with the current time
    pub fn now(hash: impl Into<String>, repo: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            hash: hash.into(),
            repo: repo.into(),
            date: now.to_rfc3339(),
            timestamp: now.timestamp(),
        }
    }
}

#[derive(Debug)]
pub struct InstallDb {
    path: PathBuf,
    records: BTreeMap<String, InstallRecord>,
}

impl InstallDb {
    /// Read the database; a missing file is an empty database
    pub fn open(path: &Path) -> Result<Self> {
        let records = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| Error::Database {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&InstallRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Record an install and persist
    pub fn add(&mut self, name: &str, record: InstallRecord) -> Result<()> {
        self.records.insert(name.to_string(), record);
        self.save()
    }

    /// Forget an install and persist; returns the removed record
    pub fn remove(&mut self, name: &str) -> Result<Option<InstallRecord>> {
        let removed = self.records.remove(name);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstallRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rewrite the whole file; a crash mid-write leaves the previous version
    pub fn save(&self) -> Result<()> {
        let db_error = |message: String| Error::Database {
            path: self.path.clone(),
            message,
        };
        let content = toml::to_string_pretty(&self.records).map_err(|e| db_error(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| db_error(e.error.to_string()))?;
        Ok(())
    }
}
