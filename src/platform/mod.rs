//! Platform-specific process control

#[cfg(unix)]
pub mod unix;

use std::io;
use std::process::Command;

#[cfg(not(unix))]
fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "Unsupported platform")
}

/// Prepare a command so the spawned process can be killed with its children
pub fn detach(cmd: &mut Command) {
    #[cfg(unix)]
    {
        unix::detach(cmd)
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Force kill a process and everything in its process group.
///
/// Falls back to killing the process alone when it has no group of its own.
pub fn kill_process_tree(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        match unix::kill_process_group(pid) {
            Err(e) if unix::is_no_such_process(&e) => unix::kill_process(pid),
            other => other,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(unsupported())
    }
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unix::is_process_running(pid)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Whether a kill failure only means the process was already gone
pub fn is_already_gone(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        unix::is_no_such_process(err)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_running() {
        assert!(is_process_running(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn killing_a_reaped_process_reports_gone() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let err = kill_process_tree(pid).unwrap_err();
        assert!(is_already_gone(&err));
        assert!(!is_process_running(pid));
    }
}
