//! Install orchestration
//!
//! Each install walks the same stages with a rollback for each:
//!
//! ```text
//! fetch -> build -> link -> verify -> record
//!            |        |        |
//!            |        +--------+--> unlink, remove prefix
//!            +--------------------> remove prefix
//! ```
//!
//! The source is released when the install finishes either way. Nothing is
//! recorded in the database unless every stage succeeded, so a failed install
//! leaves no trace besides the error.

use crate::config::{Config, RecipePaths};
use crate::core::output;
use crate::db::{InstallDb, InstallRecord};
use crate::error::{Error, Result, ignore_not_found};
use crate::graph::DepGraph;
use crate::link;
use crate::recipe::{Hooks, Recipe};
use crate::registry::Registry;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Was not installed; installed fresh
    Installed,
    UpToDate,
    Updated,
}

/// One row of `list`
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    pub description: String,
    /// Channel the recipe would install from now
    pub channel: String,
    pub installed: Option<InstallRecord>,
}

/// Recipes, configuration and install state, with the operations over them
pub struct Tasks {
    config: Config,
    registry: Registry,
    db: InstallDb,
}

impl Tasks {
    pub fn new(config: Config, registry: Registry, db: InstallDb) -> Self {
        Self {
            config,
            registry,
            db,
        }
    }

    /// Discover recipes and open the database named by `config`
    pub fn open(config: Config) -> Result<Self> {
        let registry = Registry::discover(&config)?;
        let db = InstallDb::open(&config.paths.database)?;
        Ok(Self::new(config, registry, db))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn db(&self) -> &InstallDb {
        &self.db
    }

    /// Select `channel` for one recipe, overriding configuration
    pub fn set_channel(&mut self, name: &str, channel: &str) -> Result<()> {
        self.registry.get_mut(name)?.set_channel(channel)
    }

    /// Install one recipe. Its dependencies are not considered; see
    /// `install_many`.
    pub fn install(&mut self, name: &str) -> Result<InstallOutcome> {
        let name = &name.to_lowercase();
        output::action(&format!("Installing {}", name));
        self.install_one(name)
    }

    /// Install recipes and everything they require, dependencies first.
    ///
    /// Stops at the first failure; recipes after it are not attempted.
    pub fn install_many<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<String>> {
        let order = self.resolve(names)?;
        let total = order.len();
        let mut installed = Vec::new();
        for (i, name) in order.iter().enumerate() {
            output::action_numbered(i + 1, total, &format!("Installing {}", name));
            if self.install_one(name)? == InstallOutcome::Installed {
                installed.push(name.clone());
            }
        }
        Ok(installed)
    }

    /// Install order for `names` and their transitive requirements
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        let mut graph = DepGraph::new();
        let mut pending: Vec<String> = names.iter().map(|n| n.as_ref().to_lowercase()).collect();
        let mut seen = BTreeSet::new();

        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let recipe = self.registry.get(&name)?;
            graph.add_vertex(name.clone());
            for dep in recipe.requires() {
                graph.add_edge(name.clone(), dep.clone());
                pending.push(dep.clone());
            }
        }

        graph.topological_sort()
    }

    fn install_one(&mut self, name: &str) -> Result<InstallOutcome> {
        if self.db.contains(name) {
            output::skip(&format!("{} already installed, skipping", name));
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let recipe = self.registry.get_mut(name)?;
        let channel = recipe.channel().to_string();
        let paths = recipe.paths().clone();
        let hooks = recipe.hooks();
        info!(recipe = name, channel = %channel, "install started");

        if paths.prefix.exists() {
            warn!(prefix = %paths.prefix.display(), "removing leftover prefix");
            std::fs::remove_dir_all(&paths.prefix)?;
        }

        output::sub_action("fetch");
        let fetcher = recipe.fetcher_mut()?;
        output::detail(&fetcher.describe());
        let scope = fetcher.acquire_scoped()?;
        let hash = scope.src_hash()?;

        run_stages(name, &hooks, &paths)?;

        let record = InstallRecord::now(hash, channel);
        if let Err(e) = self.db.add(name, record) {
            rollback_links(name, &paths);
            return Err(e);
        }

        if let Err(e) = scope.finish() {
            warn!(recipe = name, "source cleanup failed: {}", e);
            output::warning(&format!("{}: source cleanup failed: {}", name, e));
        }

        info!(recipe = name, "installed");
        output::success(&format!("{} installed", name));
        Ok(InstallOutcome::Installed)
    }

    /// Reinstall a recipe if its source or channel changed.
    ///
    /// The previous install is parked at the recipe's backup path while the
    /// new one is built. If anything fails, the backup is restored, relinked
    /// and re-recorded, and the error is returned.
    pub fn update(&mut self, name: &str) -> Result<UpdateOutcome> {
        let name = &name.to_lowercase();
        output::action(&format!("Updating {}", name));
        let Some(old) = self.db.get(name).cloned() else {
            self.install_one(name)?;
            return Ok(UpdateOutcome::Installed);
        };

        let recipe = self.registry.get_mut(name)?;
        let channel = recipe.channel().to_string();
        let paths = recipe.paths().clone();
        output::sub_action("check");
        let hash = recipe.fetcher_mut()?.src_hash()?;

        if hash == old.hash && channel == old.repo {
            output::skip(&format!("{} is up to date", name));
            return Ok(UpdateOutcome::UpToDate);
        }
        info!(recipe = name, old = %old.hash, new = %hash, "update available");

        link::unlink(&paths.prefix, &paths.link)?;
        ignore_not_found(std::fs::remove_dir_all(&paths.backup))?;
        if paths.prefix.exists() {
            std::fs::rename(&paths.prefix, &paths.backup)?;
        }
        self.db.remove(name)?;

        match self.install_one(name) {
            Ok(_) => {
                if let Err(e) = ignore_not_found(std::fs::remove_dir_all(&paths.backup)) {
                    warn!(backup = %paths.backup.display(), "could not remove backup: {}", e);
                }
                Ok(UpdateOutcome::Updated)
            }
            Err(e) => {
                self.restore_backup(name, &paths, old);
                Err(e)
            }
        }
    }

    fn restore_backup(&mut self, name: &str, paths: &RecipePaths, old: InstallRecord) {
        warn!(recipe = name, "update failed, restoring previous install");
        output::rollback(&format!("restoring previous {}", name));

        let restored = ignore_not_found(std::fs::remove_dir_all(&paths.prefix))
            .and_then(|_| {
                if paths.backup.exists() {
                    std::fs::rename(&paths.backup, &paths.prefix)?;
                }
                Ok(())
            })
            .and_then(|_| link::walk_and_link(&paths.prefix, &paths.link).map(|_| ()))
            .and_then(|_| self.db.add(name, old));

        if let Err(e) = restored {
            warn!(recipe = name, "restore failed: {}", e);
            output::error(&format!("could not restore {}: {}", name, e));
        }
    }

    /// Uninstall: drop links, prefix and database record.
    ///
    /// Works from configuration alone, so a recipe whose script is gone can
    /// still be removed. Returns false if it was not installed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let name = &name.to_lowercase();
        if !self.db.contains(name) {
            output::skip(&format!("{} is not installed", name));
            return Ok(false);
        }
        output::action(&format!("Removing {}", name));

        let paths = self.config.paths_for(name);
        let links = if paths.prefix.is_dir() {
            link::unlink(&paths.prefix, &paths.link)?
        } else {
            link::remove_links_into(&paths.link, &paths.prefix)?
        };
        output::detail(&format!("removed {} links", links));
        ignore_not_found(std::fs::remove_dir_all(&paths.prefix))?;
        self.db.remove(name)?;

        info!(recipe = name, "removed");
        output::success(&format!("{} removed", name));
        Ok(true)
    }

    /// Recreate the links of installed recipes (all of them when `names` is
    /// empty, after sweeping every link into the prefix root). Collisions are
    /// reported, not fatal. Returns how many recipes were linked cleanly.
    pub fn relink<S: AsRef<str>>(&self, names: &[S]) -> Result<usize> {
        let targets: Vec<String> = if names.is_empty() {
            let swept = link::remove_links_into(&self.config.paths.link, &self.config.paths.prefix)?;
            info!(swept, "removed stale links");
            self.db.iter().map(|(name, _)| name.to_string()).collect()
        } else {
            names.iter().map(|n| n.as_ref().to_lowercase()).collect()
        };

        let mut linked = 0;
        for name in &targets {
            if !self.db.contains(name) {
                output::skip(&format!("{} is not installed", name));
                continue;
            }
            let paths = self.config.paths_for(name);
            link::unlink(&paths.prefix, &paths.link)?;
            match link::walk_and_link(&paths.prefix, &paths.link) {
                Ok(links) => {
                    output::detail(&format!("{}: {} links", name, links.len()));
                    linked += 1;
                }
                Err(Error::LinkCollision(path)) => {
                    warn!(recipe = %name, path = %path.display(), "link collision");
                    output::warning(&format!("{}: {} already exists", name, path.display()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(linked)
    }

    /// Every known recipe plus installed entries whose recipe is gone
    pub fn list(&self) -> Vec<ListEntry> {
        let mut entries: Vec<ListEntry> = self
            .registry
            .iter()
            .map(|recipe| ListEntry {
                name: recipe.name().to_string(),
                description: recipe.description().to_string(),
                channel: recipe.channel().to_string(),
                installed: self.db.get(recipe.name()).cloned(),
            })
            .collect();

        for (name, record) in self.db.iter() {
            if !self.registry.contains(name) {
                entries.push(ListEntry {
                    name: name.to_string(),
                    description: String::new(),
                    channel: record.repo.clone(),
                    installed: Some(record.clone()),
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn search(&self, query: &str) -> Vec<&Recipe> {
        self.registry.search(query)
    }

    pub fn info(&self, name: &str) -> Result<(&Recipe, Option<&InstallRecord>)> {
        let recipe = self.registry.get(name)?;
        Ok((recipe, self.db.get(recipe.name())))
    }
}

/// Build, link and verify, undoing each stage's effects on failure
fn run_stages(name: &str, hooks: &Hooks, paths: &RecipePaths) -> Result<()> {
    std::fs::create_dir_all(&paths.prefix)?;

    output::sub_action("build");
    if let Err(e) = hooks.build() {
        rollback_prefix(name, &paths.prefix);
        return Err(e);
    }

    output::sub_action("link");
    if let Err(e) = link::walk_and_link(&paths.prefix, &paths.link) {
        rollback_links(name, paths);
        return Err(e);
    }

    output::sub_action("verify");
    if let Err(e) = hooks.verify() {
        rollback_links(name, paths);
        return Err(e);
    }

    Ok(())
}

fn rollback_prefix(name: &str, prefix: &Path) {
    warn!(recipe = name, prefix = %prefix.display(), "rolling back build");
    output::rollback(&format!("removing {}", prefix.display()));
    if let Err(e) = ignore_not_found(std::fs::remove_dir_all(prefix)) {
        warn!(recipe = name, "rollback could not remove prefix: {}", e);
    }
}

fn rollback_links(name: &str, paths: &RecipePaths) {
    warn!(recipe = name, "rolling back links");
    output::rollback(&format!("unlinking {}", name));
    if let Err(e) = link::unlink(&paths.prefix, &paths.link) {
        warn!(recipe = name, "rollback could not unlink: {}", e);
    }
    rollback_prefix(name, &paths.prefix);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tasks_with(dir: &TempDir, recipes: &[(&str, &str)]) -> Tasks {
        let config = Config::rooted(dir.path());
        let recipe_dir = dir.path().join("recipes");
        std::fs::create_dir_all(&recipe_dir).unwrap();
        for (name, requires) in recipes {
            std::fs::write(
                recipe_dir.join(format!("{}.rhai", name)),
                format!(
                    "let requires = [{}];\nfn build() {{}}\nfn verify() {{}}\n",
                    requires
                ),
            )
            .unwrap();
        }
        Tasks::open(config).unwrap()
    }

    #[test]
    fn test_resolve_orders_requirements_first() {
        let dir = TempDir::new().unwrap();
        let tasks = tasks_with(
            &dir,
            &[("app", "\"lib\", \"cli\""), ("lib", "\"core\""), ("cli", ""), ("core", "")],
        );
        let order = tasks.resolve(&["app"]).unwrap();
        assert_eq!(order.len(), 4);
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("core") < pos("lib"));
        assert!(pos("lib") < pos("app"));
        assert!(pos("cli") < pos("app"));
    }

    #[test]
    fn test_resolve_missing_requirement() {
        let dir = TempDir::new().unwrap();
        let tasks = tasks_with(&dir, &[("app", "\"ghost\"")]);
        assert!(matches!(
            tasks.resolve(&["app"]),
            Err(Error::RecipeNotFound(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_resolve_cycle() {
        let dir = TempDir::new().unwrap();
        let tasks = tasks_with(&dir, &[("a", "\"b\""), ("b", "\"a\"")]);
        assert!(matches!(
            tasks.resolve(&["a"]),
            Err(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_install_records_dummy_source() {
        let dir = TempDir::new().unwrap();
        let mut tasks = tasks_with(&dir, &[("meta", "")]);

        assert_eq!(tasks.install("meta").unwrap(), InstallOutcome::Installed);
        let record = tasks.db().get("meta").unwrap();
        assert_eq!(record.hash, "dummy");
        assert_eq!(record.repo, "stable");
        assert_eq!(tasks.install("meta").unwrap(), InstallOutcome::AlreadyInstalled);
    }

    #[test]
    fn test_remove_not_installed() {
        let dir = TempDir::new().unwrap();
        let mut tasks = tasks_with(&dir, &[("meta", "")]);
        assert!(!tasks.remove("meta").unwrap());
    }

    #[test]
    fn test_list_includes_orphaned_records() {
        let dir = TempDir::new().unwrap();
        let mut tasks = tasks_with(&dir, &[("meta", "")]);
        tasks.install("meta").unwrap();
        tasks
            .db
            .add("gone", InstallRecord::now("abc", "stable"))
            .unwrap();

        let names: Vec<_> = tasks.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["gone", "meta"]);
    }
}
