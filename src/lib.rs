//! Execution and interaction with external processes.
//!
//! The entry point to the module is the [`Exec`] builder, which provides a Rustic
//! builder-style API for spawning commands, streaming or capturing their output, and
//! combining them into OS-level pipelines.
//!
//! Compared to `std::process`, this module adds:
//!
//! * The [`communicate`](Exec::communicate) method for deadlock-free reading of a
//!   subprocess's output/error while simultaneously feeding it input.
//!
//! * Advanced redirection options, such as connecting standard streams to arbitrary
//!   files, or merging errors into output like the shell's `2>&1` operator.
//!
//! * Non-blocking and timeout methods to wait on a process: [`poll`](Job::poll),
//!   [`wait`](Job::wait), and [`wait_timeout`](Job::wait_timeout).
//!
//! * Connecting multiple commands into OS-level [`Pipeline`]s.
//!
//! # Examples
//!
//! Use the [`Exec`] builder to execute a command and capture its output:
//!
//! ```no_run
//! use osh_engine::Exec;
//!
//! # fn main() -> std::io::Result<()> {
//! let dir_checksum = {
//!     Exec::cmd("find") | Exec::cmd("sort") | Exec::cmd("sha1sum")
//! }.capture()?.stdout_str();
//! # Ok(())
//! # }
//! ```
//!
//! Start a process, stream its output, and terminate it if needed:
//!
//! ```no_run
//! use osh_engine::{Exec, Redirection};
//!
//! # fn main() -> std::io::Result<()> {
//! let mut job = Exec::cmd("ps").arg("x").stdout(Redirection::Pipe).start()?;
//! if let Some(status) = job.poll() {
//!     // the process has already finished
//!     let _ = status;
//! } else {
//!     job.terminate()?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

extern crate libc;

#[cfg(windows)]
extern crate winapi;

mod communicate;
pub mod engine;
pub mod exec;
mod os_common;
mod pipeline;
pub mod process;
mod spawn;

#[cfg(unix)]
mod posix;

#[cfg(windows)]
mod win32;

pub use self::communicate::Communicator;
pub use self::exec::{Capture, Exec, InputRedirection, Job, OutputRedirection, Redirection};
pub use self::pipeline::Pipeline;
pub use self::process::{ExitStatus, Process};

/// Unix-specific extensions.
///
/// Import this module's traits to access platform-specific functionality such as
/// sending signals, running under a different uid/gid, or grouping pipeline processes
/// so they can be signaled together.
#[cfg(unix)]
pub mod unix {
    pub use crate::exec::unix::{ExecExt, JobExt, PipelineExt};
    pub use crate::process::ProcessExt;
}

/// Windows-specific extensions.
///
/// Import this module's traits to set Windows process creation flags such as
/// `CREATE_NO_WINDOW`.
#[cfg(windows)]
pub mod windows {
    pub use crate::exec::windows::{
        CREATE_NEW_CONSOLE, CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW, DETACHED_PROCESS, ExecExt,
    };
}

#[cfg(test)]
mod tests {
    mod common;
    #[cfg(unix)]
    mod posix;
    #[cfg(windows)]
    mod win32;
    mod builder;
}
