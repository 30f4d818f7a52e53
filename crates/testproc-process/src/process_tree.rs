//! Process-group setup and tree termination
//!
//! Supervised children are started as leaders of their own process group
//! (a new process group on Windows) so the whole tree can be killed at
//! teardown, not just the immediate child.
//!
//! - Unix: `setpgid(0, 0)` at spawn, `SIGKILL` to `-pgid` at kill
//! - Windows: `CREATE_NEW_PROCESS_GROUP` at spawn, `taskkill /t /f` at kill

use std::io;

use tracing::debug;

/// Put the command's child into its own process group
pub fn isolate_group(cmd: &mut std::process::Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

/// Resolve the process group id of `pid`
#[cfg(unix)]
pub fn group_of(pid: u32) -> io::Result<i32> {
    use nix::unistd::{getpgid, Pid};

    let pgid = getpgid(Some(Pid::from_raw(to_raw_pid(pid)?))).map_err(io::Error::from)?;
    Ok(pgid.as_raw())
}

/// Force-kill every process in the tree rooted at `pid`
///
/// `pid` must have been spawned through [`isolate_group`]. On Unix it leads
/// its own group, so the group id is `pid` itself and is signalled without a
/// lookup; descendants are reached even after the leader has been reaped.
/// Fails when no process in the group is left to signal; callers fall back
/// to killing the direct child.
pub fn kill_tree(pid: u32) -> io::Result<()> {
    if pid == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "pid must be non-zero",
        ));
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = to_raw_pid(pid)?;
        // Never signal our own group or init's.
        if pgid <= 1 || pgid == nix::unistd::getpgrp().as_raw() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("refusing to kill shared process group {pgid}"),
            ));
        }

        killpg(Pid::from_raw(pgid), Signal::SIGKILL).map_err(io::Error::from)?;
        debug!(pid, pgid, "Sent SIGKILL to process group");
        return Ok(());
    }

    #[cfg(windows)]
    {
        let output = std::process::Command::new("taskkill")
            .args(["/t", "/f", "/pid", &pid.to_string()])
            .stdin(std::process::Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "taskkill failed for pid {} (exit {:?})",
                    pid,
                    output.status.code()
                ),
            ));
        }

        debug!(pid, "Windows process tree killed");
        return Ok(());
    }

    #[allow(unreachable_code)]
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process tree termination is not supported on this platform",
    ))
}

#[cfg(unix)]
fn to_raw_pid(pid: u32) -> io::Result<i32> {
    i32::try_from(pid).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range"))
    })
}
