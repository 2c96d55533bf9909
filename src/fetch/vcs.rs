//! Version-control sources (git, mercurial)
//!
//! One generic fetcher drives both systems; the `Vcs` implementations only
//! know which commands to run. A repository tracks either a tag or a branch,
//! never both. Branch tracking pulls fast-forward only, so a diverged local
//! checkout fails instead of being merged.

use super::{Fetch, SourceKind};
use crate::core::output::{self, ProgressGuard};
use crate::error::{Result, ignore_not_found};
use crate::process::{self, Command};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Idle timeout for probing whether a URI is a repository
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle timeout for local metadata queries
const LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Command vocabulary of a version-control system
pub trait Vcs: Send + Sync + 'static {
    const KIND: SourceKind;
    /// Metadata directory inside a checkout
    const META_DIR: &'static str;
    const DEFAULT_BRANCH: &'static str;

    fn clone_cmd(uri: &str, target: &Path) -> Command;
    /// Switch the working tree to a tag or branch, discarding local edits
    fn checkout_cmds(rev: &str) -> Vec<Command>;
    /// Bring a checked-out branch up to date with its remote, fast-forward only
    fn update_cmds(branch: &str) -> Vec<Command>;
    /// Fetch remote revisions without touching the working tree
    fn pull_cmd() -> Command;
    /// Print the identity of the checked-out revision
    fn hash_cmd() -> Command;
    /// Reset tracked files and remove untracked ones
    fn clean_cmds() -> Vec<Command>;
    /// Print the URL of the remote the checkout was cloned from, alone
    fn remote_cmd() -> Command;
    /// Succeed only if `uri` is a reachable repository
    fn probe_cmd(uri: &str) -> Command;

    fn valid_uri(uri: &str) -> bool {
        process::run(Self::probe_cmd(uri), PROBE_TIMEOUT).is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Git;

impl Vcs for Git {
    const KIND: SourceKind = SourceKind::Git;
    const META_DIR: &'static str = ".git";
    const DEFAULT_BRANCH: &'static str = "master";

    fn clone_cmd(uri: &str, target: &Path) -> Command {
        let target = target.to_string_lossy();
        git(["clone", "--recursive", "--quiet", uri, &*target])
    }

    fn checkout_cmds(rev: &str) -> Vec<Command> {
        vec![
            git(["checkout", "--quiet", "--force", rev]),
            git(["submodule", "update", "--init", "--recursive", "--quiet"]),
        ]
    }

    fn update_cmds(branch: &str) -> Vec<Command> {
        vec![git(["pull", "--ff-only", "--quiet", "origin", branch])]
    }

    fn pull_cmd() -> Command {
        git(["fetch", "--tags", "--quiet", "origin"])
    }

    fn hash_cmd() -> Command {
        git(["rev-parse", "HEAD"])
    }

    fn clean_cmds() -> Vec<Command> {
        vec![
            git(["reset", "--hard", "--quiet"]),
            git(["clean", "-fdx", "--quiet"]),
        ]
    }

    fn remote_cmd() -> Command {
        git(["remote", "get-url", "origin"])
    }

    fn probe_cmd(uri: &str) -> Command {
        git(["ls-remote", "--quiet", uri])
    }
}

fn git<const N: usize>(args: [&str; N]) -> Command {
    Command::argv(std::iter::once("git").chain(args)).env("GIT_TERMINAL_PROMPT", "0")
}

#[derive(Debug, Clone, Copy)]
pub struct Hg;

impl Vcs for Hg {
    const KIND: SourceKind = SourceKind::Hg;
    const META_DIR: &'static str = ".hg";
    const DEFAULT_BRANCH: &'static str = "default";

    fn clone_cmd(uri: &str, target: &Path) -> Command {
        let target = target.to_string_lossy();
        hg(["clone", "--quiet", uri, &*target])
    }

    fn checkout_cmds(rev: &str) -> Vec<Command> {
        vec![hg(["update", "--clean", "--quiet", rev])]
    }

    fn update_cmds(branch: &str) -> Vec<Command> {
        vec![
            hg(["pull", "--quiet", "--branch", branch]),
            hg(["update", "--check", "--quiet", branch]),
        ]
    }

    fn pull_cmd() -> Command {
        hg(["pull", "--quiet"])
    }

    fn hash_cmd() -> Command {
        hg(["log", "-r", ".", "--template", "{node}"])
    }

    fn clean_cmds() -> Vec<Command> {
        vec![
            hg(["update", "--clean", "--quiet", "."]),
            hg(["purge", "--all", "--config", "extensions.purge="]),
        ]
    }

    fn remote_cmd() -> Command {
        hg(["paths", "default"])
    }

    fn probe_cmd(uri: &str) -> Command {
        hg(["identify", uri])
    }
}

fn hg<const N: usize>(args: [&str; N]) -> Command {
    Command::argv(std::iter::once("hg").chain(args)).env("HGPLAIN", "1")
}

/// What a repository is pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Revision {
    Tag(String),
    Branch(String),
}

/// A repository checkout tracking one tag or one branch
#[derive(Debug)]
pub struct VersionRepo<V: Vcs> {
    uri: String,
    target: PathBuf,
    revision: Revision,
    timeout: Duration,
    vcs: PhantomData<V>,
}

pub type GitRepo = VersionRepo<Git>;
pub type HgRepo = VersionRepo<Hg>;

impl<V: Vcs> VersionRepo<V> {
    /// A repository tracking the system's default branch
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            target: PathBuf::new(),
            revision: Revision::Branch(V::DEFAULT_BRANCH.to_string()),
            timeout: Duration::from_secs(600),
            vcs: PhantomData,
        }
    }

    /// Track a tag; deactivates branch tracking
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.revision = Revision::Tag(tag.into());
    }

    /// Track a branch; deactivates tag tracking
    pub fn set_branch(&mut self, branch: impl Into<String>) {
        self.revision = Revision::Branch(branch.into());
    }

    pub fn tag_active(&self) -> bool {
        matches!(self.revision, Revision::Tag(_))
    }

    pub fn branch_active(&self) -> bool {
        matches!(self.revision, Revision::Branch(_))
    }

    /// The tag or branch name being tracked
    pub fn revision(&self) -> &str {
        match &self.revision {
            Revision::Tag(name) | Revision::Branch(name) => name,
        }
    }

    fn run(&self, command: Command) -> Result<Vec<String>> {
        process::run(command.current_dir(&self.target), self.timeout)
    }

    fn run_all(&self, commands: Vec<Command>) -> Result<()> {
        for command in commands {
            self.run(command)?;
        }
        Ok(())
    }

    fn clone_repo(&self) -> Result<()> {
        if let Some(parent) = self.target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        output::detail(&format!("{} clone {}", V::KIND, self.uri));
        let _spinner = ProgressGuard(output::spinner(&format!("cloning {}", self.uri)));
        process::run(V::clone_cmd(&self.uri, &self.target), self.timeout).map(|_| ())
    }

    fn checkout(&self) -> Result<()> {
        match &self.revision {
            Revision::Tag(tag) => {
                if let Err(e) = self.run_all(V::checkout_cmds(tag)) {
                    debug!(tag = %tag, "tag not found locally, pulling: {}", e);
                    self.run(V::pull_cmd())?;
                    self.run_all(V::checkout_cmds(tag))?;
                }
            }
            Revision::Branch(branch) => {
                self.run_all(V::checkout_cmds(branch))?;
                self.run_all(V::update_cmds(branch))?;
            }
        }
        Ok(())
    }
}

impl<V: Vcs> Fetch for VersionRepo<V> {
    fn kind(&self) -> SourceKind {
        V::KIND
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
        if !self.target.join(V::META_DIR).is_dir() {
            return false;
        }
        let command = V::remote_cmd().current_dir(&self.target);
        match process::run(command, LOCAL_TIMEOUT) {
            Ok(lines) => lines.first().is_some_and(|url| url.trim() == self.uri),
            Err(_) => false,
        }
    }

    fn acquire(&mut self) -> Result<()> {
        if self.ready() {
            debug!(uri = %self.uri, rev = self.revision(), "updating existing checkout");
            return self.checkout();
        }

        if self.target.exists() {
            warn!(target_dir = %self.target.display(), "replacing directory that is not a checkout of {}", self.uri);
            std::fs::remove_dir_all(&self.target)?;
        }

        info!(uri = %self.uri, rev = self.revision(), "cloning");
        let cloned = self.clone_repo().and_then(|_| self.checkout());
        if cloned.is_err() {
            ignore_not_found(std::fs::remove_dir_all(&self.target))?;
        }
        cloned
    }

    fn release(&mut self) -> Result<()> {
        if !self.target.join(V::META_DIR).is_dir() {
            return Ok(());
        }
        self.run_all(V::clean_cmds())
    }

    fn current_hash(&self) -> Result<String> {
        let lines = self.run(V::hash_cmd())?;
        Ok(lines
            .into_iter()
            .next()
            .map(|line| line.trim().to_string())
            .unwrap_or_default())
    }

    fn describe(&self) -> String {
        let pin = if self.tag_active() { "tag" } else { "branch" };
        format!("{} {} ({} {})", V::KIND, self.uri, pin, self.revision())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn have(tool: &str) -> bool {
        std::process::Command::new(tool)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn sh(dir: &Path, cmd: &str) -> String {
        let out = std::process::Command::new("sh")
            .args(["-c", cmd])
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "{}: {}", cmd, String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// A local git repository on `master` with two commits; `v1` tags the first
    fn git_upstream(dir: &Path) -> PathBuf {
        let repo = dir.join("upstream");
        std::fs::create_dir_all(&repo).unwrap();
        sh(&repo, "git init --quiet && git symbolic-ref HEAD refs/heads/master");
        sh(&repo, "echo one > file && git add file && git -c user.email=t@t -c user.name=t commit --quiet -m one && git tag v1");
        sh(&repo, "echo two > file && git -c user.email=t@t -c user.name=t commit --quiet -am two");
        repo
    }

    #[test]
    fn test_tag_and_branch_are_exclusive() {
        let mut repo = GitRepo::new("https://example.com/foo");
        assert!(repo.branch_active());
        assert_eq!(repo.revision(), "master");

        repo.set_tag("v1.0");
        assert!(repo.tag_active());
        assert!(!repo.branch_active());

        repo.set_branch("develop");
        assert!(repo.branch_active());
        assert!(!repo.tag_active());
        assert_eq!(repo.revision(), "develop");
    }

    #[test]
    fn test_hg_default_branch() {
        let repo = HgRepo::new("https://example.com/foo");
        assert_eq!(repo.revision(), "default");
        assert_eq!(repo.kind(), SourceKind::Hg);
    }

    #[test]
    fn test_describe_names_pin() {
        let mut repo = GitRepo::new("https://example.com/foo");
        repo.set_tag("v2");
        assert_eq!(repo.describe(), "git https://example.com/foo (tag v2)");
    }

    #[test]
    fn test_git_not_ready_without_checkout() {
        let dir = TempDir::new().unwrap();
        let mut repo = GitRepo::new("https://example.com/foo");
        repo.bind(dir.path().join("foo"), Duration::from_secs(10));
        assert!(!repo.ready());
    }

    #[test]
    fn test_git_tag_checkout_and_clean() {
        if !have("git") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = git_upstream(dir.path());
        let v1 = sh(&upstream, "git rev-parse v1");
        let uri = upstream.display().to_string();

        let mut repo = GitRepo::new(uri.clone());
        repo.set_tag("v1");
        let target = dir.path().join("sources/foo");
        repo.bind(target.clone(), Duration::from_secs(30));

        repo.acquire().unwrap();
        assert!(repo.ready());
        assert_eq!(std::fs::read_to_string(target.join("file")).unwrap(), "one\n");
        assert_eq!(repo.current_hash().unwrap(), v1);

        std::fs::write(target.join("build.o"), "junk").unwrap();
        std::fs::write(target.join("file"), "edited").unwrap();
        repo.release().unwrap();
        assert!(!target.join("build.o").exists());
        assert_eq!(std::fs::read_to_string(target.join("file")).unwrap(), "one\n");

        assert_eq!(repo.src_hash().unwrap(), v1);
    }

    #[test]
    fn test_git_branch_follows_upstream() {
        if !have("git") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = git_upstream(dir.path());
        let mut repo = GitRepo::new(upstream.display().to_string());
        let target = dir.path().join("sources/foo");
        repo.bind(target.clone(), Duration::from_secs(30));

        let first = repo.src_hash().unwrap();
        assert_eq!(first, sh(&upstream, "git rev-parse HEAD"));

        sh(&upstream, "echo three > file && git -c user.email=t@t -c user.name=t commit --quiet -am three");
        let second = repo.src_hash().unwrap();
        assert_ne!(first, second);
        assert_eq!(second, sh(&upstream, "git rev-parse HEAD"));
    }

    #[test]
    fn test_git_replaces_foreign_directory() {
        if !have("git") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = git_upstream(dir.path());
        let target = dir.path().join("sources/foo");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("leftover"), "x").unwrap();

        let mut repo = GitRepo::new(upstream.display().to_string());
        repo.bind(target.clone(), Duration::from_secs(30));
        repo.acquire().unwrap();
        assert!(!target.join("leftover").exists());
        assert!(target.join(".git").is_dir());
    }

    #[test]
    fn test_git_missing_tag_leaves_no_checkout() {
        if !have("git") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = git_upstream(dir.path());
        let mut repo = GitRepo::new(upstream.display().to_string());
        repo.set_tag("v404");
        let target = dir.path().join("sources/foo");
        repo.bind(target.clone(), Duration::from_secs(30));

        assert!(repo.acquire().is_err());
        assert!(!target.exists());
    }

    #[test]
    fn test_git_probe() {
        if !have("git") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = git_upstream(dir.path());
        assert!(Git::valid_uri(&upstream.display().to_string()));
        assert!(!Git::valid_uri(&dir.path().join("nothing").display().to_string()));
    }

    #[test]
    fn test_git_ready_requires_exact_origin() {
        if !have("git") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = git_upstream(dir.path());
        let uri = upstream.display().to_string();
        let target = dir.path().join("sources/foo");

        let mut repo = GitRepo::new(uri.clone());
        repo.bind(target.clone(), Duration::from_secs(30));
        repo.acquire().unwrap();
        assert!(repo.ready());

        // a prefix of the origin url is a different repository
        let mut shorter = GitRepo::new(uri[..uri.len() - 1].to_string());
        shorter.bind(target.clone(), Duration::from_secs(30));
        assert!(!shorter.ready());

        // only origin counts
        sh(
            &target,
            &format!("git remote set-url origin https://example.com/elsewhere && git remote add mirror {}", uri),
        );
        assert!(!repo.ready());
    }

    #[test]
    fn test_git_branch_refuses_to_diverge() {
        if !have("git") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = git_upstream(dir.path());
        let mut repo = GitRepo::new(upstream.display().to_string());
        let target = dir.path().join("sources/foo");
        repo.bind(target.clone(), Duration::from_secs(30));
        repo.acquire().unwrap();
        let before = repo.current_hash().unwrap();

        // rewrite upstream history so the checkout cannot fast-forward
        sh(&upstream, "echo rewritten > file && git -c user.email=t@t -c user.name=t commit --quiet --amend -am rewritten");

        assert!(repo.acquire().is_err());
        assert_eq!(repo.current_hash().unwrap(), before);
    }

    /// A local hg repository with two commits; `v1` tags the first
    fn hg_upstream(dir: &Path) -> PathBuf {
        let repo = dir.join("hg-upstream");
        std::fs::create_dir_all(&repo).unwrap();
        sh(&repo, "hg init");
        sh(&repo, "echo one > file && hg add -q file && hg commit -q -u t -m one && hg tag -u t -r 0 v1");
        sh(&repo, "echo two > file && hg commit -q -u t -m two");
        repo
    }

    #[test]
    fn test_hg_tag_checkout_and_clean() {
        if !have("hg") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = hg_upstream(dir.path());
        let v1 = sh(&upstream, "hg log -r v1 --template '{node}'");
        let mut repo = HgRepo::new(upstream.display().to_string());
        repo.set_tag("v1");
        let target = dir.path().join("sources/foo");
        repo.bind(target.clone(), Duration::from_secs(30));

        repo.acquire().unwrap();
        assert!(repo.ready());
        assert_eq!(std::fs::read_to_string(target.join("file")).unwrap(), "one\n");
        assert_eq!(repo.current_hash().unwrap(), v1);

        std::fs::write(target.join("build.o"), "junk").unwrap();
        std::fs::write(target.join("file"), "edited").unwrap();
        repo.release().unwrap();
        assert!(!target.join("build.o").exists());
        assert_eq!(std::fs::read_to_string(target.join("file")).unwrap(), "one\n");
    }

    #[test]
    fn test_hg_branch_follows_upstream() {
        if !have("hg") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let upstream = hg_upstream(dir.path());
        let mut repo = HgRepo::new(upstream.display().to_string());
        let target = dir.path().join("sources/foo");
        repo.bind(target.clone(), Duration::from_secs(30));

        let first = repo.src_hash().unwrap();
        assert_eq!(first, sh(&upstream, "hg log -r tip --template '{node}'"));

        sh(&upstream, "echo three > file && hg commit -q -u t -m three");
        let second = repo.src_hash().unwrap();
        assert_ne!(first, second);
        assert_eq!(second, sh(&upstream, "hg log -r tip --template '{node}'"));
        assert_eq!(std::fs::read_to_string(target.join("file")).unwrap(), "three\n");
    }
}
