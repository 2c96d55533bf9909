//! forge CLI - build programs from source with Rhai recipes
//!
//! Usage:
//!   forge install <name>...        Install recipes and their requirements
//!   forge update [name]...         Rebuild recipes whose source changed
//!   forge remove <name>...         Remove installed recipes
//!   forge relink [name]...         Recreate symlinks of installed recipes
//!   forge list                     List recipes and install state
//!   forge search <pattern>         Search recipes by name or description
//!   forge info <name>              Show recipe details
//!   forge deps <name>              Show recipe requirements

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recipe_forge::{Config, Tasks, UpdateOutcome, lock, output};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Source-based build tool using Rhai recipes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, env = "FORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Channel to fetch the named recipes from, overriding configuration
    #[arg(long, global = true)]
    channel: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install recipes, requirements first
    Install {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,

        /// Install only the named recipes, ignoring requirements
        #[arg(long)]
        no_deps: bool,
    },

    /// Rebuild installed recipes whose source or channel changed
    Update {
        /// Recipes to update (all installed if not specified)
        recipes: Vec<String>,
    },

    /// Remove installed recipes
    Remove {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,
    },

    /// Recreate symlinks into the link root
    Relink {
        /// Recipes to relink (all installed if not specified)
        recipes: Vec<String>,
    },

    /// List recipes and their install state
    List {
        /// Only show installed recipes
        #[arg(short, long)]
        installed: bool,
    },

    /// Search recipes by name or description
    Search {
        /// Pattern to search for
        pattern: String,
    },

    /// Show recipe information
    Info {
        /// Recipe name
        recipe: String,
    },

    /// Show recipe requirements
    Deps {
        /// Recipe name
        recipe: String,

        /// Show the full install order instead of direct requirements
        #[arg(long)]
        resolve: bool,
    },
}

impl Commands {
    /// Commands that write the database or the link root
    fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::Install { .. }
                | Commands::Update { .. }
                | Commands::Remove { .. }
                | Commands::Relink { .. }
        )
    }

    /// Recipes named on the command line
    fn targets(&self) -> Vec<&str> {
        match self {
            Commands::Install { recipes, .. }
            | Commands::Update { recipes }
            | Commands::Remove { recipes }
            | Commands::Relink { recipes } => recipes.iter().map(String::as_str).collect(),
            Commands::Info { recipe } | Commands::Deps { recipe, .. } => vec![recipe.as_str()],
            Commands::List { .. } | Commands::Search { .. } => Vec::new(),
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    init_tracing(&config.log.level);
    tracing::debug!(config = %config_path.display(), "configuration loaded");

    let _lock = if cli.command.mutates() {
        Some(lock::acquire_db_lock(&config.paths.database)?)
    } else {
        None
    };

    let mut tasks = Tasks::open(config).context("Failed to load recipes")?;

    if let Some(channel) = &cli.channel {
        // remove works from configuration alone and never fetches
        if !matches!(cli.command, Commands::Remove { .. }) {
            for name in cli.command.targets() {
                tasks.set_channel(name, channel)?;
            }
        }
    }

    match cli.command {
        Commands::Install { recipes, no_deps } => {
            if no_deps {
                for name in &recipes {
                    tasks.install(name)?;
                }
            } else {
                let order = tasks.resolve(&recipes)?;
                if order.len() > recipes.len() {
                    output::info(&format!("Install order: {}", order.join(", ")));
                }
                let installed = tasks.install_many(&recipes)?;
                if installed.is_empty() {
                    output::skip("nothing to do");
                }
            }
        }

        Commands::Update { recipes } => {
            let targets: Vec<String> = if recipes.is_empty() {
                tasks.db().iter().map(|(name, _)| name.to_string()).collect()
            } else {
                recipes
            };
            if targets.is_empty() {
                output::info("No recipes installed");
                return Ok(());
            }

            let mut updated = 0;
            for name in &targets {
                if tasks.update(name)? != UpdateOutcome::UpToDate {
                    updated += 1;
                }
            }
            output::success(&format!(
                "{} of {} recipe(s) rebuilt",
                updated,
                targets.len()
            ));
        }

        Commands::Remove { recipes } => {
            for name in &recipes {
                tasks.remove(name)?;
            }
        }

        Commands::Relink { recipes } => {
            output::action("Relinking");
            let linked = tasks.relink(&recipes)?;
            output::success(&format!("{} recipe(s) linked", linked));
        }

        Commands::List { installed } => {
            let entries = tasks.list();
            if entries.is_empty() {
                output::info("No recipes found");
                return Ok(());
            }
            println!("Recipes:");
            for entry in entries {
                let status = match &entry.installed {
                    Some(record) => {
                        format!("[installed {} {}]", record.repo, short_hash(&record.hash))
                    }
                    None if installed => continue,
                    None => format!("({})", entry.channel),
                };
                output::list_item(&entry.name, &status, entry.installed.is_some());
            }
        }

        Commands::Search { pattern } => {
            let matches = tasks.search(&pattern);
            if matches.is_empty() {
                output::info(&format!("No recipes matching '{}'", pattern));
                return Ok(());
            }
            println!("Matching recipes:");
            for recipe in matches {
                let installed = tasks.db().contains(recipe.name());
                output::list_item(recipe.name(), recipe.description(), installed);
            }
        }

        Commands::Info { recipe: name } => {
            let (recipe, record) = tasks.info(&name)?;
            println!("Name:        {}", recipe.name());
            if !recipe.description().is_empty() {
                println!("Description: {}", recipe.description());
            }
            if !recipe.homepage().is_empty() {
                println!("Homepage:    {}", recipe.homepage());
            }
            if !recipe.requires().is_empty() {
                println!("Requires:    {}", recipe.requires().join(", "));
            }
            println!("Recipe:      {}", recipe.script_path().display());
            println!("Channel:     {}", recipe.channel());
            println!("Channels:");
            for (channel, fetcher) in recipe.repos() {
                let marker = if channel == recipe.channel() { "*" } else { " " };
                println!("  {} {:<10} {}", marker, channel, fetcher.describe());
            }
            println!("Prefix:      {}", recipe.paths().prefix.display());
            match record {
                Some(record) => {
                    println!("Installed:   {} from {}", record.date, record.repo);
                    println!("Hash:        {}", record.hash);
                }
                None => println!("Installed:   no"),
            }
        }

        Commands::Deps {
            recipe: name,
            resolve,
        } => {
            if resolve {
                let order = tasks.resolve(&[name.as_str()])?;
                println!("Install order for {}:", name);
                for (i, dep) in order.iter().enumerate() {
                    let installed = tasks.db().contains(dep);
                    let status = if installed { "[installed]" } else { "" };
                    output::list_item(&format!("{}. {}", i + 1, dep), status, installed);
                }
            } else {
                let (recipe, _) = tasks.info(&name)?;
                if recipe.requires().is_empty() {
                    output::info(&format!("{} has no requirements", name));
                } else {
                    println!("Requirements of {}:", name);
                    for dep in recipe.requires() {
                        let installed = tasks.db().contains(dep);
                        let status = if installed { "[installed]" } else { "" };
                        output::list_item(dep, status, installed);
                    }
                }
            }
        }
    }

    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
