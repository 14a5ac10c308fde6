//! Unix signal delivery and process liveness

use std::io;
use std::process::Command;

/// Put the child in its own session so its whole process group can be killed
pub fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Force kill a process group (SIGKILL)
pub fn kill_process_group(pid: u32) -> io::Result<()> {
    signal(-(pid as i32), libc::SIGKILL)
}

/// Force kill a single process (SIGKILL)
pub fn kill_process(pid: u32) -> io::Result<()> {
    signal(pid as i32, libc::SIGKILL)
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    unsafe {
        // kill with signal 0 checks if process exists without sending a signal
        libc::kill(pid as i32, 0) == 0
    }
}

fn signal(target: i32, sig: libc::c_int) -> io::Result<()> {
    unsafe {
        if libc::kill(target, sig) == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Whether a kill failure means the target was already gone
pub fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}
