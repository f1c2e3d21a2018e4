// src/validate/sandbox.rs — Isolated, time-bounded program execution
//
// Every run gets a freshly provisioned environment directory that is
// never reused and is torn down on every exit path (a drop guard
// covers error returns). A hard wall-clock timeout kills the whole
// process tree: the child is spawned as its own process group leader
// and the group is signalled on timeout, so nothing the program
// backgrounded outlives the run. A timeout is reported as a distinct
// `TimedOut` status, never conflated with a non-zero exit.
// `reap_stale` additionally removes environments left behind by a
// previous process that died before its own teardown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::infra::errors::ArfError;

/// Prefix for environment directories under the sandbox root, matched
/// by the reclamation pass.
const ENV_PREFIX: &str = "env-";

/// File name the generated program is written to inside its
/// environment.
const PROGRAM_FILE: &str = "program";

/// Declared output path handed to the program as its last argument.
const OUTPUT_FILE: &str = "result.out";

#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Run identifier, used in logs and error context.
    pub name: String,
    /// Program source, written into the environment verbatim.
    pub program: String,
    /// Dataset paths passed as leading arguments.
    pub inputs: Vec<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed { exit_code: i32 },
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    /// Contents of the declared output file, if the program wrote one.
    pub output: Option<String>,
}

pub struct SandboxExecutor {
    root: PathBuf,
    interpreter: String,
    retention: Duration,
}

/// Removes the environment directory when dropped, covering every
/// exit path out of `run` including early error returns.
struct EnvGuard {
    path: PathBuf,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(env = %self.path.display(), "Teardown failed: {}", e);
            }
        }
    }
}

impl SandboxExecutor {
    pub fn new(root: impl Into<PathBuf>, interpreter: impl Into<String>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            interpreter: interpreter.into(),
            retention,
        }
    }

    /// Execute `spec` in a fresh environment. Returns an error only
    /// when the run could not be provisioned or spawned; a timeout or
    /// failing program is a normal `RunReport`.
    pub async fn run(&self, spec: &SandboxSpec) -> Result<RunReport, ArfError> {
        let env_dir = self.root.join(format!("{ENV_PREFIX}{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&env_dir).await?;
        let _guard = EnvGuard {
            path: env_dir.clone(),
        };

        let program_path = env_dir.join(PROGRAM_FILE);
        tokio::fs::write(&program_path, &spec.program).await?;
        let output_path = env_dir.join(OUTPUT_FILE);

        let mut cmd = tokio::process::Command::new(&self.interpreter);
        cmd.arg(&program_path)
            .args(&spec.inputs)
            .arg(&output_path)
            .current_dir(&env_dir)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can signal every process the
        // program forked, not just the interpreter.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| ArfError::Sandbox {
            env: spec.name.clone(),
            message: format!("spawn '{}' failed: {e}", self.interpreter),
        })?;
        #[cfg(unix)]
        let pgid = child.id();

        let report = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                let status = RunStatus::Completed {
                    exit_code: out.status.code().unwrap_or(-1),
                };
                RunReport {
                    status,
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                    output: tokio::fs::read_to_string(&output_path).await.ok(),
                }
            }
            Ok(Err(e)) => {
                return Err(ArfError::Sandbox {
                    env: spec.name.clone(),
                    message: format!("wait failed: {e}"),
                });
            }
            Err(_elapsed) => {
                // Dropping the wait future killed the interpreter; the
                // group signal takes out anything it backgrounded.
                #[cfg(unix)]
                if let Some(pgid) = pgid {
                    kill_process_group(pgid);
                }
                tracing::warn!(
                    run = %spec.name,
                    timeout_secs = spec.timeout.as_secs_f64(),
                    "Sandbox run timed out"
                );
                RunReport {
                    status: RunStatus::TimedOut,
                    stdout: String::new(),
                    stderr: String::new(),
                    output: None,
                }
            }
        };

        Ok(report)
    }

    /// Remove environments older than the retention window. Handles
    /// runs whose owning process was killed before teardown; returns
    /// the number reclaimed.
    pub async fn reap_stale(&self) -> Result<usize, ArfError> {
        let mut reaped = 0;
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(ENV_PREFIX) {
                continue;
            }
            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.elapsed().ok());
            let Some(age) = age else { continue };
            if age >= self.retention {
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    tracing::warn!(env = %name, "Failed to reap environment: {}", e);
                } else {
                    tracing::info!(env = %name, age_secs = age.as_secs(), "Reaped stale environment");
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }

    /// True when no environment directories remain under the root.
    pub fn is_empty(&self) -> bool {
        match std::fs::read_dir(&self.root) {
            Ok(entries) => !entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().starts_with(ENV_PREFIX)),
            Err(_) => true,
        }
    }
}

/// SIGKILL the child's whole process group. The child was made leader
/// of its own group at spawn, so the negative pid reaches every
/// process it forked as well.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    unsafe {
        libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
    }
}

/// Count environment directories under `root` (test and status use).
pub fn env_count(root: &Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(ENV_PREFIX))
            .count(),
        Err(_) => 0,
    }
}
