//! Source-based build tool driven by Rhai recipes
//!
//! A recipe names where a program's source lives (an archive, a git or
//! mercurial repository, or nothing at all) and how to build and check it.
//! forge fetches the source, builds it into a private prefix, symlinks the
//! prefix into a shared link root, verifies the result, and records the
//! install. Any failure along the way is rolled back.
//!
//! # Example Recipe
//!
//! ```rhai
//! let description = "Line-oriented search tool";
//! let requires = ["pcre2"];
//! let repos = #{
//!     stable: #{ archive: "https://example.com/ripgrep-14.1.0.tar.gz", hash: "..." },
//!     unstable: #{ git: "https://github.com/BurntSushi/ripgrep", branch: "master" },
//! };
//!
//! fn build() {
//!     run("cargo build --release");
//!     run("install -Dm755 target/release/rg $PREFIX/bin/rg");
//! }
//!
//! fn verify() {
//!     run("rg --version");
//! }
//! ```
//!
//! # Engine-Provided Functions
//!
//! - `run(cmd)` - Execute a shell command; fails the hook on non-zero exit
//! - `run_output(cmd)` - Execute and return the output
//! - `cd(dir)` - Change working directory
//! - `exists(path)` - Check whether a path exists
//! - `check(cond, message)` - Fail the hook unless `cond` holds
//! - `env(name)` - Read a hook variable or environment variable
//!
//! # Variables Available in Scripts and Commands
//!
//! - `PREFIX` - This recipe's install prefix
//! - `SRC` - Source directory
//! - `LINK` - Shared link root
//! - `NAME` - Recipe name
//! - `NPROC` - Number of CPUs
//! - `ARCH` - Target architecture (x86_64, aarch64)

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod link;
pub mod process;
pub mod recipe;
pub mod registry;
pub mod task;

pub use config::Config;
pub use crate::core::{lock, output};
pub use db::{InstallDb, InstallRecord};
pub use error::{Error, Result};
pub use graph::DepGraph;
pub use recipe::Recipe;
pub use registry::Registry;
pub use task::{InstallOutcome, Tasks, UpdateOutcome};
