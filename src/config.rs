//! Configuration: TOML file merged over built-in defaults
//!
//! Every section and key is optional. A missing file, a missing section, or a
//! missing key all fall back to the defaults below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default process idle timeout (seconds without any output)
const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: General,
    pub paths: Paths,
    pub log: Log,
    /// Per-recipe override sections, keyed by recipe name
    pub recipes: BTreeMap<String, RecipeOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct General {
    /// Channel used when a recipe has no override
    pub channel: String,
    /// Idle timeout in seconds for every spawned process
    pub timeout: u64,
}

impl Default for General {
    fn default() -> Self {
        Self {
            channel: "stable".to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Link root: shared tree of symlinks into every installed program
    pub link: PathBuf,
    /// Build-output root; each recipe installs into `prefix/<name>`
    pub prefix: PathBuf,
    /// Source root; each recipe fetches into `source/<name>`
    pub source: PathBuf,
    /// Install database file
    pub database: PathBuf,
    /// Directories searched for `*.rhai` recipes
    pub recipes: Vec<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data = dirs::data_dir()
            .unwrap_or_else(|| home.join(".local/share"))
            .join("forge");
        Self {
            link: home.join(".local"),
            prefix: data.join("programs"),
            source: data.join("sources"),
            database: data.join("installed.toml"),
            recipes: vec![data.join("recipes")],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    /// `tracing` filter used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeOverride {
    pub channel: Option<String>,
}

/// Filesystem locations bound to one recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipePaths {
    /// Install prefix (`prefix_root/<name>`)
    pub prefix: PathBuf,
    /// Shared link root
    pub link: PathBuf,
    /// Source checkout / extraction directory (`source_root/<name>`)
    pub source: PathBuf,
    /// Where an existing install is parked during an update
    pub backup: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file, merged with defaults.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.expand_paths();
        Ok(config)
    }

    /// Default config file location: `$FORGE_CONFIG` or `<config dir>/forge/config.toml`
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("FORGE_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("forge/config.toml")
    }

    /// Configuration rooted entirely under one directory (tests, sandboxes)
    pub fn rooted(root: &Path) -> Self {
        Self {
            paths: Paths {
                link: root.join("link"),
                prefix: root.join("programs"),
                source: root.join("sources"),
                database: root.join("installed.toml"),
                recipes: vec![root.join("recipes")],
            },
            ..Self::default()
        }
    }

    /// Idle timeout applied to every process the recipe spawns
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.general.timeout.max(1))
    }

    /// Resolve a recipe's paths by joining the global roots with its name
    pub fn paths_for(&self, name: &str) -> RecipePaths {
        RecipePaths {
            prefix: self.paths.prefix.join(name),
            link: self.paths.link.clone(),
            source: self.paths.source.join(name),
            backup: self.paths.prefix.join(format!(".{}.backup", name)),
        }
    }

    /// Channel selected for a recipe: per-recipe override, else the global default
    pub fn channel_for(&self, name: &str) -> String {
        self.recipes
            .get(name)
            .and_then(|o| o.channel.clone())
            .unwrap_or_else(|| self.general.channel.clone())
    }

    fn expand_paths(&mut self) {
        let paths = &mut self.paths;
        for path in [
            &mut paths.link,
            &mut paths.prefix,
            &mut paths.source,
            &mut paths.database,
        ] {
            *path = expand_tilde(path);
        }
        for path in &mut paths.recipes {
            *path = expand_tilde(path);
        }
    }
}

/// Expand a leading `~` to the home directory
fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
