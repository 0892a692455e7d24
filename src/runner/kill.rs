// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Force-kill a child and everything it spawned.
//!
//! CLI children are started as process-group leaders, so on unix the whole
//! tree is one `killpg`. Windows walks the tree with `taskkill /T`.

use std::io;

use tracing::debug;

/// Kill the process tree rooted at `pid`. A tree that is already gone is not
/// an error.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"));
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid, "process group killed");
            Ok(())
        }
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

#[cfg(windows)]
pub fn kill_process_tree(pid: u32) -> io::Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()?;
    // 128: no such process.
    if output.status.success() || output.status.code() == Some(128) {
        debug!(pid, "process tree killed");
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// Whether any process in the group led by `pid` is still alive.
#[cfg(unix)]
pub fn process_group_alive(pid: u32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => killpg(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

#[cfg(windows)]
pub fn process_group_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}
