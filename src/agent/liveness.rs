// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process liveness checks and signalling.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Answers whether an OS process still exists.
pub trait Liveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// [`Liveness`] backed by `kill(pid, 0)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLiveness;

impl Liveness for OsLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        process_exists(pid)
    }
}

/// Signals the hub sends to agent processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
impl ProcessSignal {
    fn raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Check if a process is running.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    if unsafe { libc::kill(pid as i32, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}

/// Signal a process and its process group.
///
/// Agents are started as group leaders, so the group id equals the pid and
/// signalling `-pid` also reaches `agentapi` and the agent under it.
/// Returns `Ok(false)` when the process is already gone.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: ProcessSignal) -> std::io::Result<bool> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Ok(false);
    }
    let pid = pid as i32;

    let group = unsafe { libc::kill(-pid, signal.raw()) } == 0;
    if group {
        return Ok(true);
    }
    if unsafe { libc::kill(pid, signal.raw()) } == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: ProcessSignal) -> std::io::Result<bool> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process signals are only supported on Unix",
    ))
}

/// Send SIGTERM, wait up to `grace` for the process to exit, then SIGKILL.
pub async fn terminate_gracefully(pid: u32, grace: Duration) -> std::io::Result<()> {
    if !send_signal(pid, ProcessSignal::Terminate)? {
        return Ok(());
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_exists(pid) {
            debug!("Process {} exited after SIGTERM", pid);
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }

    warn!("Process {} ignored SIGTERM for {:?}, sending SIGKILL", pid, grace);
    send_signal(pid, ProcessSignal::Kill)?;
    Ok(())
}
