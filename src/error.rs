//! Error taxonomy for fetch, build, link, and bookkeeping failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the forge library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("command not found: {cmd}")]
    CommandNotFound { cmd: String },

    #[error("working directory does not exist: {}", .0.display())]
    DirectoryMissing(PathBuf),

    #[error("command failed: {cmd} (exit code: {code:?})\n{}", tail.join("\n"))]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        tail: Vec<String>,
    },

    #[error("command timed out after {idle_secs}s without output: {cmd}\n{}", tail.join("\n"))]
    CommandTimeout {
        cmd: String,
        idle_secs: u64,
        tail: Vec<String>,
    },

    #[error("sha256 mismatch for {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("cannot extract {}: {message}", archive.display())]
    Extract { archive: PathBuf, message: String },

    #[error("link destination already exists: {}", .0.display())]
    LinkCollision(PathBuf),

    #[error("dependency cycle detected among: {}", remaining.join(", "))]
    CycleDetected { remaining: Vec<String> },

    #[error("recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("no fetcher supports uri: {0}")]
    UnsupportedUri(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("recipe '{recipe}' has no channel '{channel}'")]
    UnknownChannel { recipe: String, channel: String },

    #[error("{hook}() failed for {recipe}: {message}")]
    Hook {
        recipe: String,
        hook: &'static str,
        message: String,
    },

    #[error("invalid recipe {}: {message}", path.display())]
    Script { path: PathBuf, message: String },

    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("invalid configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("install database {}: {message}", path.display())]
    Database { path: PathBuf, message: String },

    #[error("another forge process holds {}", .0.display())]
    Locked(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Treat a missing path as success; cleanup goals are idempotent absence.
pub(crate) fn ignore_not_found(result: std::io::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other.map_err(Error::from),
    }
}
