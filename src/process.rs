//! Process executor
//!
//! Every command runs as the leader of its own process group with stdout and
//! stderr merged into a backing temp file, so multi-gigabyte build logs never
//! sit in memory. Liveness is judged by output, not by age: `wait` kills the
//! group once the output file has gone unmodified for longer than the timeout,
//! which lets a chatty multi-hour compile run while a silent hang is reaped.

use crate::error::{Error, Result};
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// How often the monitor thread checks for exit and idleness
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines of output carried by a failure for diagnostics
pub const FAILURE_TAIL_LINES: usize = 10;

/// A command to spawn: a shell string or a pre-tokenized argument vector.
#[derive(Debug, Clone)]
pub struct Command {
    argv: Vec<String>,
    display: String,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<PathBuf>,
}

impl Command {
    /// A command string, word-split and expanded by `sh -c`
    pub fn shell(cmd: &str) -> Self {
        Self {
            argv: vec!["sh".to_string(), "-c".to_string(), cmd.to_string()],
            display: cmd.to_string(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
        }
    }

    /// An already tokenized argument vector; the first element is the program
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = args.into_iter().map(Into::into).collect();
        Self {
            display: argv.join(" "),
            argv,
            cwd: None,
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Feed the captured output of `previous` to this command's stdin.
    ///
    /// The output is read as it stands when this command spawns, so wait on
    /// `previous` first when the whole stream is wanted.
    pub fn stdin_from(mut self, previous: &Process) -> Self {
        self.stdin = Some(previous.output_path().to_path_buf());
        self
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    /// Start the command now and return its handle
    pub fn spawn(self) -> Result<Process> {
        Process::spawn(self)
    }
}

/// Spawn a command, wait for it under `timeout`, and return all of its output.
pub fn run(command: Command, timeout: Duration) -> Result<Vec<String>> {
    let mut process = command.spawn()?;
    process.wait(timeout)?;
    Ok(process.output(0))
}

/// Result of one monitor thread run
enum Outcome {
    Exited(ExitStatus),
    TimedOut { status: ExitStatus, idle: Duration },
}

/// A live or finished OS process.
///
/// Dropping the handle terminates the process group if it is still running and
/// logs the full captured output at debug level.
pub struct Process {
    display: String,
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    child: Arc<Mutex<Child>>,
    pgid: i32,
    output: NamedTempFile,
    status: Option<ExitStatus>,
}

impl Process {
    /// Start `command`; same as `Command::spawn`
    pub fn spawn(command: Command) -> Result<Self> {
        let Some((program, args)) = command.argv.split_first() else {
            return Err(Error::CommandNotFound {
                cmd: command.display,
            });
        };

        if let Some(dir) = &command.cwd
            && !dir.is_dir()
        {
            return Err(Error::DirectoryMissing(dir.clone()));
        }

        let output = tempfile::Builder::new().prefix("forge-out-").tempfile()?;
        let stdout = output.as_file().try_clone()?;
        let stderr = output.as_file().try_clone()?;
        let stdin = match &command.stdin {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        };

        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .stdin(stdin)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Error::CommandNotFound {
                    cmd: program.clone(),
                }
            }
            _ => Error::Io(e),
        })?;

        let pgid = child.id() as i32;
        debug!(cmd = %command.display, pid = pgid, cwd = ?command.cwd, "spawned");

        Ok(Self {
            display: command.display,
            argv: command.argv,
            cwd: command.cwd,
            child: Arc::new(Mutex::new(child)),
            pgid,
            output,
            status: None,
        })
    }

    /// The effective argument vector
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Path of the backing output file
    pub fn output_path(&self) -> &Path {
        self.output.path()
    }

    /// Exit code once the process has finished (None if killed by a signal)
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    pub fn is_alive(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match lock_child(&self.child).try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Wait for exit, killing the process group if it stays silent for `timeout`.
    ///
    /// Returns the exit code on success. A non-zero exit raises
    /// `CommandFailed`; idleness raises `CommandTimeout`. Both carry the last
    /// lines of output.
    pub fn wait(&mut self, timeout: Duration) -> Result<i32> {
        let status = match self.status {
            Some(status) => status,
            None => {
                let child = Arc::clone(&self.child);
                let path = self.output.path().to_path_buf();
                let pgid = self.pgid;
                let monitor = thread::Builder::new()
                    .name(format!("forge-monitor-{}", pgid))
                    .spawn(move || monitor(&child, &path, pgid, timeout))?;
                let outcome = monitor
                    .join()
                    .map_err(|_| std::io::Error::other("process monitor panicked"))??;

                match outcome {
                    Outcome::Exited(status) => status,
                    Outcome::TimedOut { status, idle } => {
                        self.status = Some(status);
                        warn!(cmd = %self.display, idle_secs = idle.as_secs(), "killed idle process group");
                        return Err(Error::CommandTimeout {
                            cmd: self.display.clone(),
                            idle_secs: idle.as_secs(),
                            tail: self.output(FAILURE_TAIL_LINES),
                        });
                    }
                }
            }
        };

        self.status = Some(status);
        match status.code() {
            Some(0) => Ok(0),
            code => Err(Error::CommandFailed {
                cmd: self.display.clone(),
                code,
                tail: self.output(FAILURE_TAIL_LINES),
            }),
        }
    }

    /// Send SIGTERM to the whole process group and block until reaped.
    pub fn terminate(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        signal_group(self.pgid, libc::SIGTERM);
        let status = lock_child(&self.child).wait()?;
        self.status = Some(status);
        Ok(())
    }

    /// The last `last_n` lines of merged output (0 = all), decoded lossily.
    pub fn output(&self, last_n: usize) -> Vec<String> {
        let bytes = std::fs::read(self.output.path()).unwrap_or_default();
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let start = match last_n {
            0 => 0,
            n => lines.len().saturating_sub(n),
        };
        lines[start..].iter().map(|s| s.to_string()).collect()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(cmd = %self.display, "failed to terminate: {}", e);
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                cmd = %self.display,
                code = ?self.exit_code(),
                "output:\n{}",
                self.output(0).join("\n")
            );
        }
    }
}

/// Poll until the child exits or its output has been idle for `timeout`
fn monitor(
    child: &Mutex<Child>,
    output: &Path,
    pgid: i32,
    timeout: Duration,
) -> std::io::Result<Outcome> {
    loop {
        if let Some(status) = lock_child(child).try_wait()? {
            return Ok(Outcome::Exited(status));
        }

        let idle = idle_time(output);
        if idle > timeout {
            signal_group(pgid, libc::SIGKILL);
            let status = lock_child(child).wait()?;
            return Ok(Outcome::TimedOut { status, idle });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Time since the output file was last written
fn idle_time(output: &Path) -> Duration {
    std::fs::metadata(output)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or_default()
}

fn signal_group(pgid: i32, signal: libc::c_int) {
    // SAFETY: killpg only sends a signal; a stale group id yields ESRCH.
    unsafe {
        libc::killpg(pgid, signal);
    }
}

fn lock_child(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
