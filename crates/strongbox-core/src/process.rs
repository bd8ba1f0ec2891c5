//! Process management utilities

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;

/// Convert a recorded PID into one that can be signalled.
///
/// `None` for 0 and for values that overflow `pid_t`; signalling those would
/// reach a process group rather than one process.
pub fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(p) if p > 0 => Some(Pid::from_raw(p)),
        _ => None,
    }
}

/// Check if a process with the given PID exists and can be signalled by us.
///
/// Sends no signal; only the kernel's existence and permission checks run.
/// Any failure counts as "not alive".
pub fn is_alive(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };

    kill(pid, None).is_ok()
}

/// Ask a process to terminate with SIGTERM. Does not wait for it to exit.
pub fn terminate(pid: u32) -> io::Result<()> {
    let Some(pid) = to_pid(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid pid: {}", pid),
        ));
    };

    kill(pid, Signal::SIGTERM).map_err(io::Error::from)
}

/// True when a signalling error means the process does not exist
pub fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(Errno::ESRCH as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pids_are_not_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
        assert_eq!(to_pid(0), None);
        assert_eq!(to_pid(u32::MAX), None);
    }

    #[test]
    fn test_terminate_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_alive(pid));

        terminate(pid).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_terminate_reaped_child() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let err = terminate(pid).unwrap_err();
        assert!(is_no_such_process(&err));
    }

    #[test]
    fn test_terminate_invalid_pid() {
        let err = terminate(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
