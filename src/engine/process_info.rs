//! Snapshot reader over the local process table.
//!
//! The data source an out-of-scope `ps`-style operator would sit on top of: one row per
//! process, with at minimum pid, parent pid, user, and command line. A snapshot is
//! captured once per call and never refreshed automatically — it is stale as soon as it
//! is formed, and a `ProcessInfo` may outlive the process it describes.

use sysinfo::{System, Users};

/// One row of a process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Parent process id, if the process has one still running.
    pub parent_pid: Option<u32>,
    /// Owning user's login name, if it could be resolved.
    pub user: Option<String>,
    /// Full command line, space-joined.
    pub command_line: String,
    /// Resident set size, in bytes.
    pub rss: u64,
    /// Virtual memory size, in bytes.
    pub vm_size: u64,
}

/// Capture a snapshot of every currently running process visible to this one.
pub fn snapshot() -> Vec<ProcessInfo> {
    let mut system = System::new_all();
    system.refresh_all();
    let users = Users::new_with_refreshed_list();

    system
        .processes()
        .values()
        .map(|process| ProcessInfo {
            pid: process.pid().as_u32(),
            parent_pid: process.parent().map(|pid| pid.as_u32()),
            user: process
                .user_id()
                .and_then(|uid| users.get_user_by_id(uid))
                .map(|user| user.name().to_string()),
            command_line: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" "),
            rss: process.memory(),
            vm_size: process.virtual_memory(),
        })
        .collect()
}

/// This process's own pid, matching the source's `os.getpid()` check used to implement
/// the out-of-scope `ps -o` ("omit self") flag.
pub fn current_pid() -> u32 {
    std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_includes_the_current_process() {
        let rows = snapshot();
        assert!(rows.iter().any(|p| p.pid == current_pid()));
    }
}
