//! Hook execution context
//!
//! Rhai helper functions are plain functions, so the state they need (where
//! to run, which environment, how long to wait) lives in a thread-local that
//! is set for the duration of one hook call.

use rhai::EvalAltResult;
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

/// State shared by the helpers while a hook runs
#[derive(Clone, Debug)]
pub struct HookContext {
    /// Working directory for `run`, and the base for relative paths
    pub current_dir: PathBuf,
    /// Variables added to every spawned process
    pub env: Vec<(String, String)>,
    /// Idle timeout for spawned processes
    pub timeout: Duration,
}

thread_local! {
    static CONTEXT: RefCell<Option<HookContext>> = const { RefCell::new(None) };
}

/// Install `ctx` for the current thread until the returned guard is dropped
pub fn enter(ctx: HookContext) -> ContextGuard {
    CONTEXT.with(|c| *c.borrow_mut() = Some(ctx));
    ContextGuard { _private: () }
}

/// Clears the hook context when dropped, including on error paths
pub struct ContextGuard {
    _private: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT.with(|c| *c.borrow_mut() = None);
    }
}

/// Execute a closure with immutable access to the context
pub fn with_context<F, R>(f: F) -> Result<R, Box<EvalAltResult>>
where
    F: FnOnce(&HookContext) -> Result<R, Box<EvalAltResult>>,
{
    CONTEXT.with(|c| {
        let ctx = c.borrow();
        let ctx = ctx.as_ref().ok_or("helper called outside of a recipe hook")?;
        f(ctx)
    })
}

/// Execute a closure with mutable access to the context
pub fn with_context_mut<F, R>(f: F) -> Result<R, Box<EvalAltResult>>
where
    F: FnOnce(&mut HookContext) -> Result<R, Box<EvalAltResult>>,
{
    CONTEXT.with(|c| {
        let mut ctx = c.borrow_mut();
        let ctx = ctx.as_mut().ok_or("helper called outside of a recipe hook")?;
        f(ctx)
    })
}
