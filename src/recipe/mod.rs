//! Recipes: Rhai scripts describing how to fetch, build and verify a program
//!
//! A recipe is a `<name>.rhai` file. Its top level declares metadata and
//! sources; two functions do the work:
//!
//! ```rhai
//! let description = "Friendly greeter";
//! let homepage = "https://example.com/hello";
//! let requires = ["zlib"];
//! let repos = #{
//!     stable: #{ archive: "https://example.com/hello-1.0.tar.gz", hash: "..." },
//!     unstable: #{ git: "https://example.com/hello.git", branch: "main" },
//! };
//!
//! fn build() {
//!     run("./configure --prefix=$PREFIX && make && make install");
//! }
//!
//! fn verify() {
//!     run("hello --version");
//! }
//! ```
//!
//! `build` runs in the source directory. `verify` runs in an empty scratch
//! directory with the install's `bin/` at the front of `PATH`, so it sees what
//! a user would see.

mod context;
mod helpers;

pub use context::HookContext;
pub use helpers::engine;

use crate::config::{Config, RecipePaths};
use crate::error::{Error, Result};
use crate::fetch::{Dummy, Fetch, SourceSpec};
use rhai::{AST, Dynamic, Engine, Scope};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Functions every recipe must define
const HOOKS: [&str; 2] = ["build", "verify"];

/// A loaded recipe bound to its filesystem locations
pub struct Recipe {
    name: String,
    description: String,
    homepage: String,
    requires: Vec<String>,
    repos: BTreeMap<String, Box<dyn Fetch>>,
    channel: String,
    paths: RecipePaths,
    timeout: Duration,
    script: PathBuf,
    engine: Arc<Engine>,
    ast: Arc<AST>,
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("requires", &self.requires)
            .field("repos", &self.repos)
            .field("script", &self.script)
            .finish()
    }
}

impl Recipe {
    /// Compile a recipe script, evaluate its declarations, and bind it to the
    /// locations in `config`
    pub fn load(engine: Arc<Engine>, script: &Path, config: &Config) -> Result<Self> {
        let name = recipe_name(script).ok_or_else(|| Error::Script {
            path: script.to_path_buf(),
            message: "file name is not valid UTF-8".to_string(),
        })?;
        let script_err = |message: String| Error::Script {
            path: script.to_path_buf(),
            message,
        };

        let source = std::fs::read_to_string(script)?;
        let ast = engine
            .compile(&source)
            .map_err(|e| script_err(e.to_string()))?;

        for hook in HOOKS {
            let defined = ast
                .iter_functions()
                .any(|f| f.name == hook && f.params.is_empty());
            if !defined {
                return Err(script_err(format!("missing required function {}()", hook)));
            }
        }

        let paths = config.paths_for(&name);
        let mut scope = base_scope(&name, &paths);
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| script_err(e.to_string()))?;

        let description = string_var(&scope, "description").map_err(&script_err)?;
        let homepage = string_var(&scope, "homepage").map_err(&script_err)?;
        let requires = requires_var(&scope).map_err(&script_err)?;
        let mut repos = repos_var(&scope).map_err(&script_err)?;
        if repos.is_empty() {
            repos.insert(config.channel_for(&name), Box::new(Dummy::new()));
        }

        let mut recipe = Self {
            name,
            description,
            homepage,
            requires,
            repos,
            channel: String::new(),
            paths,
            timeout: config.timeout(),
            script: script.to_path_buf(),
            engine,
            ast: Arc::new(ast),
        };
        recipe.bind(config);
        debug!(recipe = %recipe.name, channels = ?recipe.channels().collect::<Vec<_>>(), "loaded recipe");
        Ok(recipe)
    }

    /// Resolve paths, timeout and channel from `config`
    pub fn bind(&mut self, config: &Config) {
        self.paths = config.paths_for(&self.name);
        self.timeout = config.timeout();
        self.channel = config.channel_for(&self.name);
        for fetcher in self.repos.values_mut() {
            fetcher.bind(self.paths.source.clone(), self.timeout);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    /// Names of recipes that must be installed first
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    pub fn script_path(&self) -> &Path {
        &self.script
    }

    pub fn paths(&self) -> &RecipePaths {
        &self.paths
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The selected channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Every channel the recipe declares
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.repos.keys().map(String::as_str)
    }

    /// Select a declared channel
    pub fn set_channel(&mut self, channel: &str) -> Result<()> {
        if !self.repos.contains_key(channel) {
            return Err(self.unknown_channel(channel));
        }
        self.channel = channel.to_string();
        Ok(())
    }

    /// Fetcher of the selected channel
    pub fn fetcher(&self) -> Result<&(dyn Fetch + 'static)> {
        self.repos
            .get(&self.channel)
            .map(|f| f.as_ref())
            .ok_or_else(|| self.unknown_channel(&self.channel))
    }

    pub fn fetcher_mut(&mut self) -> Result<&mut (dyn Fetch + 'static)> {
        match self.repos.get_mut(&self.channel) {
            Some(fetcher) => Ok(fetcher.as_mut()),
            None => Err(Error::UnknownChannel {
                recipe: self.name.clone(),
                channel: self.channel.clone(),
            }),
        }
    }

    /// Fetchers of every declared channel
    pub fn repos(&self) -> impl Iterator<Item = (&str, &(dyn Fetch + 'static))> {
        self.repos.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Handle for running the recipe's hooks, independent of the recipe's borrow
    pub fn hooks(&self) -> Hooks {
        Hooks {
            recipe: self.name.clone(),
            engine: Arc::clone(&self.engine),
            ast: Arc::clone(&self.ast),
            paths: self.paths.clone(),
            timeout: self.timeout,
        }
    }

    fn unknown_channel(&self, channel: &str) -> Error {
        Error::UnknownChannel {
            recipe: self.name.clone(),
            channel: channel.to_string(),
        }
    }
}

/// Runs `build()` and `verify()` for one recipe
#[derive(Clone)]
pub struct Hooks {
    recipe: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    paths: RecipePaths,
    timeout: Duration,
}

impl Hooks {
    /// Run `build()` in the source directory
    pub fn build(&self) -> Result<()> {
        let env = hook_env(&self.recipe, &self.paths);
        self.call("build", self.paths.source.clone(), env)
    }

    /// Run `verify()` in a scratch directory, with the install on `PATH`
    pub fn verify(&self) -> Result<()> {
        let scratch = tempfile::Builder::new().prefix("forge-verify-").tempdir()?;
        let mut env = hook_env(&self.recipe, &self.paths);
        let path = std::env::var("PATH").unwrap_or_default();
        env.push((
            "PATH".to_string(),
            format!(
                "{}:{}:{}",
                self.paths.prefix.join("bin").display(),
                self.paths.link.join("bin").display(),
                path
            ),
        ));
        self.call("verify", scratch.path().to_path_buf(), env)
    }

    fn call(&self, hook: &'static str, cwd: PathBuf, env: Vec<(String, String)>) -> Result<()> {
        let _guard = context::enter(HookContext {
            current_dir: cwd,
            env,
            timeout: self.timeout,
        });
        let mut scope = base_scope(&self.recipe, &self.paths);
        self.engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, hook, ())
            .map(|_| ())
            .map_err(|e| Error::Hook {
                recipe: self.recipe.clone(),
                hook,
                message: e.to_string(),
            })
    }
}

/// Recipe name: the script's file stem, lower-cased
pub fn recipe_name(script: &Path) -> Option<String> {
    script
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
}

/// Variables handed to hooks, both as script constants and process environment
fn hook_env(name: &str, paths: &RecipePaths) -> Vec<(String, String)> {
    vec![
        ("PREFIX".to_string(), paths.prefix.display().to_string()),
        ("SRC".to_string(), paths.source.display().to_string()),
        ("LINK".to_string(), paths.link.display().to_string()),
        ("NAME".to_string(), name.to_string()),
        ("NPROC".to_string(), num_cpus::get().to_string()),
        ("ARCH".to_string(), std::env::consts::ARCH.to_string()),
    ]
}

fn base_scope(name: &str, paths: &RecipePaths) -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push_constant("PREFIX", paths.prefix.display().to_string());
    scope.push_constant("SRC", paths.source.display().to_string());
    scope.push_constant("LINK", paths.link.display().to_string());
    scope.push_constant("NAME", name.to_string());
    scope.push_constant("NPROC", num_cpus::get() as i64);
    scope.push_constant("ARCH", std::env::consts::ARCH);
    scope
}

fn string_var(scope: &Scope, name: &str) -> std::result::Result<String, String> {
    match scope.get(name) {
        None => Ok(String::new()),
        Some(value) => value
            .clone()
            .into_string()
            .map_err(|t| format!("`{}` must be a string, found {}", name, t)),
    }
}

fn requires_var(scope: &Scope) -> std::result::Result<Vec<String>, String> {
    let Some(value) = scope.get("requires") else {
        return Ok(Vec::new());
    };
    let array = value
        .clone()
        .into_array()
        .map_err(|t| format!("`requires` must be an array, found {}", t))?;
    array
        .into_iter()
        .map(|item| {
            item.into_string()
                .map(|s| s.to_lowercase())
                .map_err(|t| format!("`requires` entries must be strings, found {}", t))
        })
        .collect()
}

fn repos_var(scope: &Scope) -> std::result::Result<BTreeMap<String, Box<dyn Fetch>>, String> {
    let Some(value) = scope.get("repos") else {
        return Ok(BTreeMap::new());
    };
    let map = value
        .clone()
        .try_cast::<rhai::Map>()
        .ok_or_else(|| "`repos` must be a map of channel => source".to_string())?;

    let mut repos = BTreeMap::new();
    for (channel, spec) in map {
        let spec: SourceSpec = rhai::serde::from_dynamic(&spec)
            .map_err(|e| format!("channel {}: {}", channel, e))?;
        let fetcher = spec
            .into_fetcher()
            .map_err(|e| format!("channel {}: {}", channel, e))?;
        repos.insert(channel.to_string(), fetcher);
    }
    Ok(repos)
}
