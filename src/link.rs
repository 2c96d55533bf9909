//! Symlink mirroring of install prefixes into the shared link root
//!
//! `walk_and_link(prefix, link)` recreates the prefix's directory structure
//! under the link root and symlinks every file into it, so `prefix/bin/rg`
//! becomes `link/bin/rg -> prefix/bin/rg`. Directories are shared between
//! programs; files never are.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Mirror `src` into `dst`.
///
/// Directories are created as needed. Every non-directory entry (including
/// symlinks inside `src`) gets a symlink at the same relative path under
/// `dst`. An occupied destination fails with `LinkCollision`; links made
/// before the collision are left for the caller to remove with `unlink`.
/// Returns the links created.
pub fn walk_and_link(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    std::fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(walk_error)?;
        let rel = relative(src, entry.path())?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            match std::fs::symlink_metadata(&target) {
                Ok(md) if md.is_dir() => {}
                Ok(_) => return Err(Error::LinkCollision(target)),
                Err(_) => std::fs::create_dir(&target)?,
            }
            continue;
        }

        if std::fs::symlink_metadata(&target).is_ok() {
            return Err(Error::LinkCollision(target));
        }
        std::os::unix::fs::symlink(entry.path(), &target)?;
        created.push(target);
    }

    debug!(src = %src.display(), dst = %dst.display(), links = created.len(), "linked");
    Ok(created)
}

/// Remove the links `walk_and_link(src, dst)` would have made.
///
/// Only symlinks pointing at the matching file under `src` are removed, so
/// another program's files are never touched. Directories left empty are
/// removed; non-empty ones stay. Returns how many links were removed.
pub fn unlink(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(src).min_depth(1).contents_first(true) {
        let entry = entry.map_err(walk_error)?;
        let target = dst.join(relative(src, entry.path())?);

        if entry.file_type().is_dir() {
            // fails unless empty or shared, both fine
            let _ = std::fs::remove_dir(&target);
            continue;
        }

        if points_to(&target, entry.path()) {
            std::fs::remove_file(&target)?;
            removed += 1;
        }
    }

    debug!(src = %src.display(), dst = %dst.display(), removed, "unlinked");
    Ok(removed)
}

/// Remove every symlink under `link_root` that points into `prefix`.
///
/// Used when the prefix is already gone, so `unlink` has nothing to walk.
/// Directories left empty by a removed link are pruned up to, not including,
/// `link_root`; other directories are never touched.
pub fn remove_links_into(link_root: &Path, prefix: &Path) -> Result<usize> {
    if !link_root.is_dir() {
        return Ok(0);
    }

    let mut removed = Vec::new();
    for entry in WalkDir::new(link_root).min_depth(1) {
        let entry = entry.map_err(walk_error)?;
        if !entry.path_is_symlink() {
            continue;
        }
        let path = entry.path();
        if let Ok(target) = std::fs::read_link(path)
            && target.starts_with(prefix)
        {
            std::fs::remove_file(path)?;
            removed.push(path.to_path_buf());
        }
    }

    for link in &removed {
        prune_empty_parents(link, link_root);
    }
    Ok(removed.len())
}

/// Remove the now-empty directories above `path`, stopping at `root` or the
/// first directory that still has entries
fn prune_empty_parents(path: &Path, root: &Path) {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if std::fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

fn points_to(link: &Path, expected: &Path) -> bool {
    match std::fs::symlink_metadata(link) {
        Ok(md) if md.file_type().is_symlink() => std::fs::read_link(link)
            .map(|target| target == expected)
            .unwrap_or(false),
        _ => false,
    }
}

fn relative<'a>(root: &Path, path: &'a Path) -> Result<&'a Path> {
    path.strip_prefix(root).map_err(|_| {
        Error::Io(std::io::Error::other(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        )))
    })
}

fn walk_error(e: walkdir::Error) -> Error {
    Error::Io(e.into())
}
