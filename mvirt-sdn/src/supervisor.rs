//! Process supervisor for daemons managed by configurators.
//!
//! Processes are tracked through pid files only, so a supervised daemon can be
//! stopped by a later agent run that never spawned it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Who writes the pid file that signals readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidFileOwner {
    /// The process writes it itself (e.g. `hostapd -P`).
    Process,
    /// The supervisor writes the spawned child's pid right after spawn.
    Supervisor,
}

/// Everything needed to start one supervised process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Network namespace to run in (`ip netns exec`).
    pub namespace: Option<String>,
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Receives stdout and stderr; truncated on start.
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    pub pid_file_owner: PidFileOwner,
    pub ready_timeout: Duration,
    /// Keep a watcher task attached to the spawned child for its lifetime.
    pub wait_for_exit: bool,
}

impl ProcessSpec {
    fn command(&self) -> Command {
        match &self.namespace {
            Some(ns) => {
                let mut cmd = Command::new("ip");
                cmd.args(["netns", "exec", ns.as_str()]).arg(&self.binary);
                cmd
            }
            None => Command::new(&self.binary),
        }
    }

    fn binary_name(&self) -> String {
        self.binary.display().to_string()
    }
}

/// Start a process and wait until its pid file appears.
///
/// Returns the pid read from the pid file. On `StartupTimeout` the process
/// is left running.
pub async fn start_process(spec: &ProcessSpec) -> Result<i32, SupervisorError> {
    remove_stale(&spec.pid_file).await?;

    let log = tokio::fs::File::create(&spec.log_file)
        .await
        .map_err(|source| SupervisorError::Io {
            path: spec.log_file.clone(),
            source,
        })?
        .into_std()
        .await;
    let log_err = log.try_clone().map_err(|source| SupervisorError::Io {
        path: spec.log_file.clone(),
        source,
    })?;

    let mut cmd = spec.command();
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err);

    info!(
        binary = %spec.binary.display(),
        namespace = ?spec.namespace,
        cmd = ?cmd.as_std(),
        "Starting process"
    );

    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        binary: spec.binary_name(),
        source,
    })?;

    if spec.pid_file_owner == PidFileOwner::Supervisor {
        let pid = child.id().ok_or_else(|| SupervisorError::Exited {
            binary: spec.binary_name(),
            status: "exited before its pid was known".to_string(),
        })?;
        tokio::fs::write(&spec.pid_file, format!("{pid}\n"))
            .await
            .map_err(|source| SupervisorError::Io {
                path: spec.pid_file.clone(),
                source,
            })?;
    }

    let deadline = Instant::now() + spec.ready_timeout;
    let pid = loop {
        if let Some(pid) = read_pid(&spec.pid_file).await.ok().flatten() {
            break pid;
        }
        // Forking daemons exit 0 once in the background; only a failure is final.
        if let Ok(Some(status)) = child.try_wait()
            && !status.success()
        {
            let output = tokio::fs::read_to_string(&spec.log_file)
                .await
                .unwrap_or_default();
            error!(
                binary = %spec.binary.display(),
                status = %status,
                log = %output.trim(),
                "Process exited before becoming ready"
            );
            return Err(SupervisorError::Exited {
                binary: spec.binary_name(),
                status: status.to_string(),
            });
        }
        if Instant::now() >= deadline {
            warn!(
                binary = %spec.binary.display(),
                pid_file = %spec.pid_file.display(),
                "Process not ready in time"
            );
            return Err(SupervisorError::StartupTimeout {
                binary: spec.binary_name(),
                pid_file: spec.pid_file.clone(),
                timeout: spec.ready_timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    info!(binary = %spec.binary.display(), pid = pid, "Process ready");

    if spec.wait_for_exit {
        let binary = spec.binary_name();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(binary = %binary, "Supervised process exited")
                }
                Ok(status) => {
                    warn!(binary = %binary, status = %status, "Supervised process exited")
                }
                Err(e) => {
                    warn!(binary = %binary, error = %e, "Failed to wait for supervised process")
                }
            }
        });
    }

    Ok(pid)
}

/// Stop the process named by `pid_file`.
///
/// SIGTERM first, SIGKILL once `timeout` passes. A missing pid file or a
/// process that is already gone counts as stopped.
pub async fn stop_process(pid_file: &Path, timeout: Duration) -> Result<(), SupervisorError> {
    let Some(pid) = read_pid(pid_file).await? else {
        debug!(pid_file = %pid_file.display(), "No pid file, process already stopped");
        return Ok(());
    };

    info!(pid = pid, "Stopping process");
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            debug!(pid = pid, "Process already exited");
            remove_stale(pid_file).await?;
            return Ok(());
        }
        Err(source) => return Err(SupervisorError::Signal { pid, source }),
    }

    if wait_exit(pid, timeout).await {
        info!(pid = pid, "Process stopped");
        remove_stale(pid_file).await?;
        return Ok(());
    }

    warn!(pid = pid, timeout = ?timeout, "Timeout waiting for graceful shutdown, killing");
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(source) => return Err(SupervisorError::Signal { pid, source }),
    }
    if wait_exit(pid, KILL_GRACE).await {
        remove_stale(pid_file).await?;
        return Ok(());
    }

    Err(SupervisorError::ShutdownTimeout { pid, timeout })
}

/// Read a pid file. `Ok(None)` if the file does not exist.
async fn read_pid(path: &Path) -> Result<Option<i32>, SupervisorError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SupervisorError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(SupervisorError::InvalidPidFile {
            path: path.to_path_buf(),
            content,
        }),
    }
}

async fn remove_stale(path: &Path) -> Result<(), SupervisorError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SupervisorError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn wait_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Signal 0 probe; zombies count as exited.
fn is_process_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok() && !is_zombie(pid)
}

fn is_zombie(pid: i32) -> bool {
    // Format: "pid (comm) state ...", comm may contain spaces and parens.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.trim_start().chars().next()
        })
        .is_some_and(|state| state == 'Z')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(dir: &TempDir, script: &str, owner: PidFileOwner) -> ProcessSpec {
        let pid_file = dir.path().join("pid");
        ProcessSpec {
            namespace: None,
            binary: PathBuf::from("/bin/sh"),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                pid_file.display().to_string(),
            ],
            log_file: dir.path().join("log"),
            pid_file,
            pid_file_owner: owner,
            ready_timeout: Duration::from_secs(3),
            wait_for_exit: false,
        }
    }

    #[tokio::test]
    async fn test_stop_missing_pid_file() {
        let dir = TempDir::new().unwrap();
        stop_process(&dir.path().join("pid"), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_exited_process() {
        let dir = TempDir::new().unwrap();
        let mut child = std::process::Command::new("/bin/true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let pid_file = dir.path().join("pid");
        std::fs::write(&pid_file, format!("{pid}\n")).unwrap();

        stop_process(&pid_file, Duration::from_secs(1)).await.unwrap();
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_stop_invalid_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        std::fs::write(&pid_file, "not a pid").unwrap();

        let err = stop_process(&pid_file, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidPidFile { .. }));
    }

    #[tokio::test]
    async fn test_start_and_stop_daemon() {
        let dir = TempDir::new().unwrap();
        let spec = shell(
            &dir,
            r#"echo starting; sleep 30 & echo $! > "$0""#,
            PidFileOwner::Process,
        );

        let pid = start_process(&spec).await.unwrap();
        assert!(is_process_alive(pid));
        let log = std::fs::read_to_string(&spec.log_file).unwrap();
        assert!(log.contains("starting"));

        stop_process(&spec.pid_file, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!is_process_alive(pid));
        assert!(!spec.pid_file.exists());
    }

    #[tokio::test]
    async fn test_supervisor_writes_pid_file() {
        let dir = TempDir::new().unwrap();
        let mut spec = shell(&dir, "exec sleep 30", PidFileOwner::Supervisor);
        spec.wait_for_exit = true;

        let pid = start_process(&spec).await.unwrap();
        let written = std::fs::read_to_string(&spec.pid_file).unwrap();
        assert_eq!(written.trim(), pid.to_string());

        stop_process(&spec.pid_file, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!is_process_alive(pid));
    }

    #[tokio::test]
    async fn test_start_timeout_without_pid_file() {
        let dir = TempDir::new().unwrap();
        let mut spec = shell(&dir, "sleep 1", PidFileOwner::Process);
        spec.ready_timeout = Duration::from_millis(300);

        let err = start_process(&spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartupTimeout { .. }));
    }

    #[tokio::test]
    async fn test_start_fails_fast_on_exit() {
        let dir = TempDir::new().unwrap();
        let spec = shell(&dir, "echo bad config >&2; exit 3", PidFileOwner::Process);

        let err = start_process(&spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Exited { .. }));
        let log = std::fs::read_to_string(&spec.log_file).unwrap();
        assert!(log.contains("bad config"));
    }

    #[tokio::test]
    async fn test_start_spawn_error() {
        let dir = TempDir::new().unwrap();
        let mut spec = shell(&dir, "", PidFileOwner::Process);
        spec.binary = dir.path().join("does-not-exist");

        let err = start_process(&spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[test]
    fn test_own_process_alive() {
        assert!(is_process_alive(std::process::id() as i32));
    }
}
