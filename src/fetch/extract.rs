//! Archive extraction
//!
//! The format is read from the file's leading bytes; the filename extension is
//! only consulted when the content is not recognized. tar (plain, gzip, bzip2,
//! xz, zstd) and zip are unpacked natively. 7z and rar go through the `7z` and
//! `unrar` tools.
//!
//! Extraction happens in a staging directory next to the target. If the
//! archive holds a single top-level directory, that directory becomes the
//! target; otherwise the staging directory itself does.

use crate::core::output::{self, ProgressGuard};
use crate::error::{Error, Result};
use crate::process::{self, Command};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Bytes needed to see the tar `ustar` magic at offset 257
const SNIFF_LEN: usize = 512;

/// Archive container and compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
    Zip,
    SevenZip,
    Rar,
}

impl Format {
    /// Recognize a format from leading bytes
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        const MAGIC: &[(&[u8], Format)] = &[
            (&[0x1f, 0x8b], Format::TarGz),
            (b"BZh", Format::TarBz2),
            (&[0xfd, b'7', b'z', b'X', b'Z', 0x00], Format::TarXz),
            (&[0x28, 0xb5, 0x2f, 0xfd], Format::TarZst),
            (&[b'P', b'K', 0x03, 0x04], Format::Zip),
            (&[b'P', b'K', 0x05, 0x06], Format::Zip),
            (&[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c], Format::SevenZip),
            (b"Rar!\x1a\x07", Format::Rar),
        ];

        if let Some((_, format)) = MAGIC.iter().find(|(magic, _)| head.starts_with(magic)) {
            return Some(*format);
        }
        if head.len() >= 262 && &head[257..262] == b"ustar" {
            return Some(Format::Tar);
        }
        None
    }

    /// Recognize a format from a filename suffix
    pub fn from_extension(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Format::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Format::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
            Some(Format::TarBz2)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Format::TarZst)
        } else if name.ends_with(".tar") {
            Some(Format::Tar)
        } else if name.ends_with(".zip") {
            Some(Format::Zip)
        } else if name.ends_with(".7z") {
            Some(Format::SevenZip)
        } else if name.ends_with(".rar") {
            Some(Format::Rar)
        } else {
            None
        }
    }

    /// Detect the format of a file on disk: content first, then extension
    pub fn detect(path: &Path) -> Result<Self> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;

        if let Some(format) = Self::from_magic(&head) {
            return Ok(format);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_extension(&name).ok_or(Error::UnsupportedArchive(name))
    }
}

/// Extract `archive` so that its content ends up at `target`.
///
/// Any existing `target` is replaced.
pub fn unpack_into(archive: &Path, target: &Path, timeout: Duration) -> Result<()> {
    let format = Format::detect(archive)?;
    let parent = target
        .parent()
        .ok_or_else(|| Error::DirectoryMissing(target.to_path_buf()))?;
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".forge-extract-")
        .tempdir_in(parent)?;

    let filename = archive
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());

    {
        let _spinner = ProgressGuard(output::spinner(&format!("extracting {}", filename)));
        match format {
            Format::SevenZip => {
                let out = format!("-o{}", staging.path().display());
                process::run(
                    Command::argv(["7z".to_string(), "x".into(), "-y".into(), out, path_arg(archive)]),
                    timeout,
                )?;
            }
            Format::Rar => {
                let out = format!("{}/", staging.path().display());
                process::run(
                    Command::argv(["unrar".to_string(), "x".into(), "-o+".into(), path_arg(archive), out]),
                    timeout,
                )?;
            }
            native => extract_native(native, archive, staging.path()).map_err(|message| {
                Error::Extract {
                    archive: archive.to_path_buf(),
                    message,
                }
            })?,
        }
    }

    crate::error::ignore_not_found(std::fs::remove_dir_all(target))?;
    match single_top_level_dir(staging.path())? {
        Some(top) => std::fs::rename(top, target)?,
        None => {
            let staged = staging.keep();
            std::fs::rename(&staged, target)?;
        }
    }

    output::detail(&format!("extracted {} to {}", filename, target.display()));
    Ok(())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// The only entry of `dir`, if there is exactly one and it is a directory
fn single_top_level_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(None),
    };
    if entries.next().is_some() {
        return Ok(None);
    }
    let is_dir = first.file_type()?.is_dir();
    Ok(is_dir.then(|| first.path()))
}

fn extract_native(
    format: Format,
    archive_path: &Path,
    dest: &Path,
) -> std::result::Result<(), String> {
    let file = File::open(archive_path)
        .map_err(|e| format!("cannot open {}: {}", archive_path.display(), e))?;
    let reader = BufReader::new(file);

    match format {
        Format::Tar => extract_tar(reader, dest),
        Format::TarGz => extract_tar(flate2::read::GzDecoder::new(reader), dest),
        Format::TarBz2 => extract_tar(bzip2::read::BzDecoder::new(reader), dest),
        Format::TarXz => extract_tar(xz2::read::XzDecoder::new(reader), dest),
        Format::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(reader)
                .map_err(|e| format!("zstd init error: {}", e))?;
            extract_tar(decoder, dest)
        }
        Format::Zip => extract_zip(archive_path, dest),
        Format::SevenZip | Format::Rar => Err(format!("{:?} needs an external tool", format)),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    // Lexical only: link targets are validated without following symlinks.
    let mut out = PathBuf::new();
    let mut has_root = false;

    for c in path.components() {
        match c {
            Component::Prefix(p) => {
                out.clear();
                out.push(p.as_os_str());
                has_root = true;
            }
            Component::RootDir => {
                out.push(Component::RootDir.as_os_str());
                has_root = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = out
                    .components()
                    .next_back()
                    .is_some_and(|last| matches!(last, Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !has_root {
                    out.push("..");
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }

    out
}

fn ensure_no_symlink_components(dest: &Path, full_path: &Path) -> std::result::Result<(), String> {
    let rel = full_path
        .strip_prefix(dest)
        .map_err(|_| format!("path outside destination: {}", full_path.display()))?;

    let mut cur = dest.to_path_buf();
    for comp in rel.components() {
        cur.push(comp);
        if let Ok(md) = std::fs::symlink_metadata(&cur)
            && md.file_type().is_symlink()
        {
            return Err(format!(
                "extraction blocked: symlink in path component: {}",
                cur.display()
            ));
        }
    }

    Ok(())
}

fn ensure_link_target_within_dest(
    dest: &Path,
    link_parent: &Path,
    link_name: &Path,
) -> std::result::Result<(), String> {
    if link_name.is_absolute()
        || link_name
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(format!(
            "unsafe link target (absolute): {}",
            link_name.display()
        ));
    }

    let candidate = normalize_lexical(&link_parent.join(link_name));
    let norm_dest = normalize_lexical(dest);
    if candidate.strip_prefix(&norm_dest).is_err() {
        return Err(format!(
            "unsafe link target (escapes dest): {} -> {}",
            link_parent.display(),
            link_name.display()
        ));
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> std::result::Result<(), String> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive
        .entries()
        .map_err(|e| format!("tar read error: {}", e))?
    {
        let mut entry = entry.map_err(|e| format!("tar entry error: {}", e))?;
        let path = entry
            .path()
            .map_err(|e| format!("tar path error: {}", e))?
            .into_owned();

        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return Err(format!("unsafe path: {}", path.display()));
        }
        if path.as_os_str().is_empty() || path == Path::new(".") {
            continue;
        }

        let full_path = dest.join(&path);
        ensure_no_symlink_components(dest, &full_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type == tar::EntryType::Symlink || entry_type == tar::EntryType::Link {
            let link_name = entry
                .link_name()
                .map_err(|e| format!("tar link_name error: {}", e))?
                .ok_or_else(|| format!("link without target: {}", path.display()))?;
            // Hard link names are archive-relative; symlinks resolve from their parent.
            let link_parent = if entry_type == tar::EntryType::Link {
                dest
            } else {
                full_path.parent().unwrap_or(dest)
            };
            ensure_link_target_within_dest(dest, link_parent, &link_name)?;
        }

        if let Some(parent) = full_path.parent() {
            if parent.starts_with(dest) {
                ensure_no_symlink_components(dest, parent)?;
            }
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create directory {}: {}", parent.display(), e))?;
        }

        entry
            .unpack_in(dest)
            .map_err(|e| format!("unpack error for {}: {}", path.display(), e))?;
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path) -> std::result::Result<(), String> {
    let file = File::open(archive_path)
        .map_err(|e| format!("cannot open {}: {}", archive_path.display(), e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| format!("zip read error: {}", e))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| format!("zip entry error: {}", e))?;

        let Some(relative) = file.enclosed_name() else {
            return Err(format!("unsafe path: {}", file.name()));
        };
        let outpath = dest.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .map_err(|e| format!("cannot create directory {}: {}", outpath.display(), e))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create directory {}: {}", parent.display(), e))?;
        }
        let mut outfile = File::create(&outpath)
            .map_err(|e| format!("cannot create {}: {}", outpath.display(), e))?;
        std::io::copy(&mut file, &mut outfile)
            .map_err(|e| format!("write error for {}: {}", outpath.display(), e))?;

        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = file.unix_mode() {
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        let encoder = builder.into_inner().unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(Format::from_extension("foo.tar.gz"), Some(Format::TarGz));
        assert_eq!(Format::from_extension("foo.tgz"), Some(Format::TarGz));
        assert_eq!(Format::from_extension("foo.tar.xz"), Some(Format::TarXz));
        assert_eq!(Format::from_extension("foo.tar.bz2"), Some(Format::TarBz2));
        assert_eq!(Format::from_extension("foo.tar.zst"), Some(Format::TarZst));
        assert_eq!(Format::from_extension("FOO.ZIP"), Some(Format::Zip));
        assert_eq!(Format::from_extension("foo.tar"), Some(Format::Tar));
        assert_eq!(Format::from_extension("foo.7z"), Some(Format::SevenZip));
        assert_eq!(Format::from_extension("foo.rar"), Some(Format::Rar));
        assert_eq!(Format::from_extension("foo.unknown"), None);
    }

    #[test]
    fn test_from_magic() {
        assert_eq!(Format::from_magic(&[0x1f, 0x8b, 0x08]), Some(Format::TarGz));
        assert_eq!(Format::from_magic(b"BZh91AY"), Some(Format::TarBz2));
        assert_eq!(Format::from_magic(b"PK\x03\x04rest"), Some(Format::Zip));
        assert_eq!(Format::from_magic(b"Rar!\x1a\x07\x00"), Some(Format::Rar));
        assert_eq!(Format::from_magic(b"plain text"), None);

        let mut tar_head = vec![0u8; SNIFF_LEN];
        tar_head[257..262].copy_from_slice(b"ustar");
        assert_eq!(Format::from_magic(&tar_head), Some(Format::Tar));
    }

    #[test]
    fn test_content_wins_over_extension() {
        let dir = tempfile::tempdir().unwrap();
        // gzip content behind a misleading name
        let path = dir.path().join("release.zip");
        write_tar_gz(&path, &[("a.txt", b"a")]);
        assert_eq!(Format::detect(&path).unwrap(), Format::TarGz);
    }

    #[test]
    fn test_unrecognized_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "just text").unwrap();
        assert!(matches!(
            Format::detect(&path),
            Err(Error::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn test_unpack_single_top_level_becomes_target() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("foo-1.0.tar.gz");
        write_tar_gz(
            &archive,
            &[("foo-1.0/README", b"readme"), ("foo-1.0/src/main.c", b"int main;")],
        );
        let target = dir.path().join("sources/foo");

        unpack_into(&archive, &target, Duration::from_secs(10)).unwrap();

        assert_eq!(std::fs::read_to_string(target.join("README")).unwrap(), "readme");
        assert!(target.join("src/main.c").exists());
        assert!(!target.join("foo-1.0").exists());
    }

    #[test]
    fn test_unpack_flat_archive_keeps_all_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("flat.tar.gz");
        write_tar_gz(&archive, &[("a.txt", b"a"), ("b.txt", b"b")]);
        let target = dir.path().join("flat");

        unpack_into(&archive, &target, Duration::from_secs(10)).unwrap();

        assert!(target.join("a.txt").exists());
        assert!(target.join("b.txt").exists());
    }

    #[test]
    fn test_unpack_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("foo.tar.gz");
        write_tar_gz(&archive, &[("foo/new.txt", b"new")]);
        let target = dir.path().join("foo");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("stale.txt"), "old").unwrap();

        unpack_into(&archive, &target, Duration::from_secs(10)).unwrap();

        assert!(target.join("new.txt").exists());
        assert!(!target.join("stale.txt").exists());
    }

    #[test]
    fn test_unpack_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        let file = File::create(&archive).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.add_directory("pkg/bin/", options).unwrap();
        zip.start_file("pkg/bin/tool", options).unwrap();
        zip.write_all(b"#!/bin/sh\n").unwrap();
        zip.finish().unwrap();
        let target = dir.path().join("pkg");

        unpack_into(&archive, &target, Duration::from_secs(10)).unwrap();

        assert!(target.join("bin/tool").exists());
    }

    #[test]
    fn test_tar_blocks_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("escape.tar.gz");
        let dest = dir.path().join("extracted");

        let file = File::create(&archive).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut link_header = tar::Header::new_gnu();
        link_header.set_entry_type(tar::EntryType::Symlink);
        link_header.set_size(0);
        link_header.set_mode(0o777);
        link_header.set_cksum();
        link_header.set_link_name("/").unwrap();
        builder
            .append_data(&mut link_header, "a", std::io::empty())
            .unwrap();

        let content = b"pwned";
        let mut file_header = tar::Header::new_gnu();
        file_header.set_size(content.len() as u64);
        file_header.set_mode(0o644);
        file_header.set_cksum();
        builder
            .append_data(&mut file_header, "a/evil.txt", &content[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        std::fs::create_dir_all(&dest).unwrap();
        let err = extract_native(Format::TarGz, &archive, &dest).unwrap_err();
        assert!(
            err.contains("unsafe link target") || err.contains("symlink"),
            "expected link/symlink safety error, got: {err}"
        );
        assert!(!dest.join("a/evil.txt").exists());
    }

    #[test]
    fn test_tar_blocks_hardlink_outside_dest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("hardlink.tar.gz");
        let dest = dir.path().join("extracted");

        let file = File::create(&archive).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Link);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_cksum();
        header.set_link_name("/etc/passwd").unwrap();
        builder
            .append_data(&mut header, "hl", std::io::empty())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        std::fs::create_dir_all(&dest).unwrap();
        let err = extract_native(Format::TarGz, &archive, &dest).unwrap_err();
        assert!(err.contains("unsafe link target"), "got: {err}");
    }
}
