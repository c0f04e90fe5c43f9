//! Small cross-platform enum shared by `posix`/`win32` internals that predates the
//! `process::ExitStatus` wrapper and has no other reason to exist on its own.

#[derive(Debug, Copy, Clone)]
#[allow(dead_code)]
pub enum StandardStream {
    Input,
    Output,
    Error,
}
