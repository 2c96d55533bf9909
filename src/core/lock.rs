//! Install database lock
//!
//! The database and link root are mutated in place, so only one forge process
//! may run a mutating command at a time. A second invocation fails fast instead
//! of interleaving its writes.
//!
//! The lock is an advisory `flock` on `<database>.lock`, so it dies with the
//! process that holds it. A lock file left behind by a crash is simply locked
//! again; nothing is ever removed based on its age.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Acquire an exclusive lock next to the install database.
/// Returns a guard that releases the lock when dropped.
pub fn acquire_db_lock(db_path: &Path) -> Result<DbLock> {
    let lock_path = lock_path_for(db_path);

    if let Some(parent) = lock_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let lock_file = File::create(&lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(Error::Locked(lock_path));
    }

    Ok(DbLock {
        _file: lock_file,
        path: lock_path,
    })
}

/// RAII guard for the database lock - releases lock and deletes lock file when dropped
#[derive(Debug)]
pub struct DbLock {
    _file: File,
    path: PathBuf,
}

impl Drop for DbLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
