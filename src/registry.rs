//! Recipe registry: every recipe found in the configured directories, by name
//!
//! One `Recipe` exists per discovered script. A later directory overrides an
//! earlier one when both define the same name, so a user directory listed
//! after the system one can shadow system recipes.

use crate::config::Config;
use crate::core::output;
use crate::error::{Error, Result};
use crate::recipe::{self, Recipe};
use rhai::Engine;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Registry {
    engine: Arc<Engine>,
    recipes: BTreeMap<String, Recipe>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(recipe::engine()),
            recipes: BTreeMap::new(),
        }
    }

    /// Load every recipe in `config.paths.recipes`
    pub fn discover(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for dir in &config.paths.recipes {
            registry.load_dir(dir, config)?;
        }
        Ok(registry)
    }

    /// Load `*.rhai` scripts from one directory.
    ///
    /// Files whose name starts with `_` or `.` are skipped (shared includes,
    /// editor backups). A missing directory is empty. A script that fails to
    /// load is reported and skipped. Returns how many recipes were registered.
    pub fn load_dir(&mut self, dir: &Path, config: &Config) -> Result<usize> {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "recipe directory missing, skipping");
            return Ok(0);
        }

        let pattern = format!(
            "{}/*.rhai",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let entries = glob::glob(&pattern).map_err(|e| Error::Config {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut scripts: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
        scripts.sort();

        let mut loaded = 0;
        for script in scripts {
            let Some(name) = recipe::recipe_name(&script) else {
                continue;
            };
            if name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            match Recipe::load(Arc::clone(&self.engine), &script, config) {
                Ok(recipe) => {
                    if let Some(previous) = self.register(recipe) {
                        debug!(
                            recipe = %name,
                            shadowed = %previous.script_path().display(),
                            "recipe overridden"
                        );
                    }
                    loaded += 1;
                }
                Err(e) => {
                    warn!(script = %script.display(), "skipping recipe: {}", e);
                    output::warning(&format!("skipping {}: {}", script.display(), e));
                }
            }
        }
        Ok(loaded)
    }

    /// Add a recipe, replacing (and returning) any recipe of the same name
    pub fn register(&mut self, recipe: Recipe) -> Option<Recipe> {
        self.recipes.insert(recipe.name().to_string(), recipe)
    }

    /// Look up a recipe by name, ignoring case
    pub fn get(&self, name: &str) -> Result<&Recipe> {
        self.recipes
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::RecipeNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Recipe> {
        self.recipes
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| Error::RecipeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// The engine recipes are compiled with
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Recipes whose name or description contains `query`, case-insensitively
    pub fn search(&self, query: &str) -> Vec<&Recipe> {
        let query = query.to_lowercase();
        self.recipes
            .values()
            .filter(|r| r.name().contains(&query) || r.description().to_lowercase().contains(&query))
            .collect()
    }
}
