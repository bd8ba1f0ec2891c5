//! Daemon lifecycle for the detached API server
//!
//! A single PID file is the only record of a running server. The controller
//! writes nothing itself: it spawns a detached child, and the child records
//! its own PID before it starts serving. Stopping sends SIGTERM to the
//! recorded PID and deletes the record without waiting for the exit.
//!
//! There is no lock file and no socket check. Status is derived purely from
//! whether the recorded process is alive.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::paths::Paths;
use crate::process;

/// Status of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Stopped,
    Running(u32),
}

impl DaemonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running(_) => "running",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Stopped => "○",
            Self::Running(_) => "●",
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Stopped => None,
            Self::Running(pid) => Some(*pid),
        }
    }
}

/// Lifecycle errors
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("API server is not running")]
    NotRunning,

    #[error("API server is already running with PID {0}")]
    AlreadyRunning(u32),

    #[error("Failed to start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to signal PID {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> DaemonError + '_ {
    move |source| DaemonError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Tracks one detached server through its PID and log files
#[derive(Debug, Clone)]
pub struct Daemon {
    pid_file: PathBuf,
    log_file: PathBuf,
}

impl Daemon {
    /// Use the standard PID and log locations
    pub fn new(paths: &Paths) -> Self {
        Self::with_files(paths.pid_file.clone(), paths.log_file.clone())
    }

    /// Use explicit PID and log locations
    pub fn with_files(pid_file: PathBuf, log_file: PathBuf) -> Self {
        Self { pid_file, log_file }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Read the recorded PID. Missing, unparsable or unsignallable records
    /// (0, or beyond `pid_t`) read as `None`.
    pub fn record(&self) -> Option<u32> {
        let content = fs::read_to_string(&self.pid_file).ok()?;
        match content.trim().parse::<u32>() {
            Ok(pid) if process::to_pid(pid).is_some() => Some(pid),
            _ => {
                debug!(path = %self.pid_file.display(), "ignoring invalid PID file");
                None
            }
        }
    }

    /// Report whether the recorded process is alive. Never fails.
    pub fn status(&self) -> DaemonStatus {
        match self.record() {
            Some(pid) if process::is_alive(pid) => DaemonStatus::Running(pid),
            _ => DaemonStatus::Stopped,
        }
    }

    /// Record `pid` as the live server. Called by the detached process itself
    /// before it starts serving.
    pub fn write_record(&self, pid: u32) -> Result<(), DaemonError> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        // Write beside the target and rename so readers never see a partial PID
        let staging = self.pid_file.with_extension("pid.tmp");
        fs::write(&staging, pid.to_string()).map_err(io_error(&staging))?;
        fs::rename(&staging, &self.pid_file).map_err(io_error(&self.pid_file))?;

        info!(pid, path = %self.pid_file.display(), "recorded daemon PID");
        Ok(())
    }

    /// Spawn `program args... --addr <listen_addr>` as a detached process.
    ///
    /// Clears the previous log, points the child's stdout and stderr at the
    /// log file, and starts it in its own session. Returns the child's PID
    /// without waiting for it to initialize.
    pub fn start(
        &self,
        work_dir: &Path,
        listen_addr: &str,
        program: &Path,
        args: &[String],
    ) -> Result<u32, DaemonError> {
        if let DaemonStatus::Running(pid) = self.status() {
            return Err(DaemonError::AlreadyRunning(pid));
        }

        match fs::remove_file(&self.log_file) {
            Ok(()) => debug!(path = %self.log_file.display(), "removed stale log"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&self.log_file)(e)),
        }
        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::create_dir_all(work_dir).map_err(io_error(work_dir))?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .map_err(io_error(&self.log_file))?;
        let log_err = log.try_clone().map_err(io_error(&self.log_file))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg("--addr")
            .arg(listen_addr)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Detach from the controlling terminal so closing it does not reach the server
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(io::Error::from)
            });
        }

        let child = command.spawn().map_err(|source| DaemonError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

        let pid = child.id();
        info!(pid, addr = listen_addr, "started detached API server");
        Ok(pid)
    }

    /// Send SIGTERM to the recorded process and delete the record.
    ///
    /// Returns the PID that was signalled. Does not wait for the exit.
    pub fn stop(&self) -> Result<u32, DaemonError> {
        let pid = self.record().ok_or(DaemonError::NotRunning)?;

        if let Err(source) = process::terminate(pid) {
            if process::is_no_such_process(&source) {
                warn!(pid, "recorded process is gone, removing stale PID file");
                self.clear_record()?;
                return Err(DaemonError::NotRunning);
            }
            return Err(DaemonError::Signal { pid, source });
        }

        self.clear_record()?;
        info!(pid, "sent SIGTERM to API server");
        Ok(pid)
    }

    fn clear_record(&self) -> Result<(), DaemonError> {
        match fs::remove_file(&self.pid_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.pid_file)(e)),
        }
    }
}
