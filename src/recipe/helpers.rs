//! Functions available to recipe scripts
//!
//! ```rhai
//! fn build() {
//!     run("./configure --prefix=$PREFIX");
//!     run("make -j$NPROC && make install");
//! }
//!
//! fn verify() {
//!     check(run_output("hello --version").contains("1.0"), "wrong version");
//! }
//! ```
//!
//! Commands are run through `sh -c` in the hook's working directory with the
//! recipe's variables (`PREFIX`, `SRC`, `LINK`, `NAME`, `NPROC`, `ARCH`) in
//! the environment. A non-zero exit or an idle timeout aborts the hook.

use super::context::{with_context, with_context_mut};
use crate::core::output;
use crate::process::{self, Command};
use rhai::{Engine, EvalAltResult};
use std::path::{Path, PathBuf};

/// Build the script engine with every helper registered
pub fn engine() -> Engine {
    let mut engine = Engine::new();

    engine.register_fn("run", run_cmd);
    engine.register_fn("run_output", run_output);
    engine.register_fn("cd", change_dir);
    engine.register_fn("exists", exists);
    engine.register_fn("check", check);
    engine.register_fn("env", get_env);

    engine
}

/// Truncate long commands for display
fn display_cmd(cmd: &str) -> String {
    let first_line = cmd.lines().next().unwrap_or_default();
    if first_line.chars().count() > 60 || first_line.len() < cmd.trim_end().len() {
        let short: String = first_line.chars().take(57).collect();
        format!("{}...", short)
    } else {
        first_line.to_string()
    }
}

fn spawn_in_context(cmd: &str) -> Result<Vec<String>, Box<EvalAltResult>> {
    let (command, timeout) = with_context(|ctx| {
        let command = Command::shell(cmd)
            .current_dir(&ctx.current_dir)
            .envs(ctx.env.iter().cloned());
        Ok((command, ctx.timeout))
    })?;
    process::run(command, timeout).map_err(|e| e.to_string().into())
}

/// Run a shell command, failing the hook on non-zero exit
pub fn run_cmd(cmd: &str) -> Result<(), Box<EvalAltResult>> {
    output::detail(&format!("run: {}", display_cmd(cmd)));
    spawn_in_context(cmd).map(|_| ())
}

/// Run a shell command and return its output with trailing newline trimmed
pub fn run_output(cmd: &str) -> Result<String, Box<EvalAltResult>> {
    let lines = spawn_in_context(cmd)?;
    Ok(lines.join("\n").trim_end().to_string())
}

fn resolve(current: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        current.join(path)
    }
}

/// Change the working directory for subsequent commands
pub fn change_dir(dir: &str) -> Result<(), Box<EvalAltResult>> {
    with_context_mut(|ctx| {
        let new_dir = resolve(&ctx.current_dir, dir);
        if !new_dir.is_dir() {
            return Err(format!("directory does not exist: {}", new_dir.display()).into());
        }
        output::detail(&format!("cd {}", dir));
        ctx.current_dir = new_dir;
        Ok(())
    })
}

/// Whether a path exists, relative to the working directory
pub fn exists(path: &str) -> Result<bool, Box<EvalAltResult>> {
    with_context(|ctx| Ok(resolve(&ctx.current_dir, path).exists()))
}

/// Fail the hook with `message` unless `condition` holds
pub fn check(condition: bool, message: &str) -> Result<(), Box<EvalAltResult>> {
    if condition {
        Ok(())
    } else {
        Err(format!("check failed: {}", message).into())
    }
}

/// A hook variable (`PREFIX`, `SRC`, ...) or, failing that, the process
/// environment; empty when unset
pub fn get_env(name: &str) -> Result<String, Box<EvalAltResult>> {
    with_context(|ctx| {
        let value = ctx
            .env
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_default();
        Ok(value)
    })
}
