//! Common test utilities: a sandboxed forge root and source fixtures.

#![allow(dead_code)]

mod fixtures;

pub use fixtures::*;

use flate2::Compression;
use flate2::write::GzEncoder;
use recipe_forge::{Config, Tasks};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A forge root where every path lives under one temp directory
pub struct TestEnv {
    dir: TempDir,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config::rooted(dir.path());
        std::fs::create_dir_all(&config.paths.recipes[0]).unwrap();
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn link(&self) -> PathBuf {
        self.config.paths.link.clone()
    }

    pub fn prefix(&self, name: &str) -> PathBuf {
        self.config.paths.prefix.join(name)
    }

    pub fn source(&self, name: &str) -> PathBuf {
        self.config.paths.source.join(name)
    }

    /// Write `<name>.rhai` into the recipe directory
    pub fn write_recipe(&self, name: &str, content: &str) -> PathBuf {
        let path = self.config.paths.recipes[0].join(format!("{}.rhai", name));
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Fresh task engine over the current recipes and database
    pub fn tasks(&self) -> Tasks {
        Tasks::open(self.config.clone()).unwrap()
    }

    /// Build `<stem>.tar.gz` holding `files` under a `<stem>/` top directory.
    /// Returns the archive path and its sha256.
    pub fn tarball(&self, stem: &str, files: &[(&str, &str)]) -> (PathBuf, String) {
        let dist = self.root().join("dist");
        std::fs::create_dir_all(&dist).unwrap();
        let path = dist.join(format!("{}.tar.gz", stem));

        let file = std::fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/{}", stem, name), content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let hash = recipe_forge::fetch::sha256_file(&path).unwrap();
        (path, hash)
    }

    /// Create a git repository with one commit holding `files`
    pub fn git_repo(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let repo = self.root().join("upstream").join(name);
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "--quiet"]);
        git(&repo, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        commit_files(&repo, files, "initial");
        repo
    }
}

/// Write `files` into `repo` and commit them
pub fn commit_files(repo: &Path, files: &[(&str, &str)], message: &str) {
    for (name, content) in files {
        std::fs::write(repo.join(name), content).unwrap();
    }
    git(repo, &["add", "."]);
    git(
        repo,
        &[
            "-c",
            "user.name=forge",
            "-c",
            "user.email=forge@localhost",
            "commit",
            "--quiet",
            "-m",
            message,
        ],
    );
}

pub fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn have(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether `path` is a symlink (dangling or not)
pub fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|md| md.file_type().is_symlink())
        .unwrap_or(false)
}
