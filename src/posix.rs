//! Thin, safe-ish wrappers around the POSIX calls needed to spawn and manage child
//! processes. Nothing here is specific to `osh-engine`'s streaming model; this module
//! mirrors what `std::process::Command` does internally on Unix.

use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io::{Error, Result};
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;
use std::ptr;
use std::sync::Arc;

use crate::exec::Redirection;
use crate::process::ExitStatus;
use crate::spawn::StandardStream;

pub use libc::ECHILD;

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(&mut fds[0]) })?;
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Fork the current process.
///
/// Returns `Ok(Some(pid))` in the parent with the child's pid, `Ok(None)` in the child.
///
/// # Safety
///
/// The child must avoid allocating or taking locks until it either `exec`s or calls
/// [`_exit`]; only async-signal-safe operations are allowed between `fork` and those.
pub unsafe fn fork() -> Result<Option<u32>> {
    let pid = check_err(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(None)
    } else {
        Ok(Some(pid as u32))
    }
}

pub fn _exit(status: u8) -> ! {
    unsafe { libc::_exit(status as libc::c_int) }
}

fn os_to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| Error::from_raw_os_error(libc::EINVAL))
}

fn cstring_ptr(s: &CString) -> *const libc::c_char {
    s.as_ptr()
}

/// Prepare everything needed to `exec` `cmd` with `argv` and `env` (if overridden), doing
/// all fallible work (CString conversion, PATH search) before returning.
///
/// The returned closure performs only async-signal-safe operations, so it is suitable for
/// calling between `fork` and `_exit` in the child.
pub fn prep_exec(
    cmd: &OsStr,
    argv: &[OsString],
    env: Option<&[OsString]>,
) -> Result<impl FnOnce() -> Result<()> + use<>> {
    let candidates = if cmd.as_bytes().contains(&b'/') {
        vec![os_to_cstring(cmd)?]
    } else {
        search_path(cmd)?
    };
    let argv_cstring: Vec<CString> = argv
        .iter()
        .map(|a| os_to_cstring(a.as_os_str()))
        .collect::<Result<_>>()?;
    let env_cstring: Option<Vec<CString>> = env
        .map(|vars| vars.iter().map(|v| os_to_cstring(v.as_os_str())).collect())
        .transpose()?;

    Ok(move || {
        let mut argv_ptrs: Vec<*const libc::c_char> =
            argv_cstring.iter().map(cstring_ptr).collect();
        argv_ptrs.push(ptr::null());

        let envp_ptrs: Option<Vec<*const libc::c_char>> = env_cstring.as_ref().map(|env| {
            let mut ptrs: Vec<_> = env.iter().map(cstring_ptr).collect();
            ptrs.push(ptr::null());
            ptrs
        });

        let mut last_err = Error::from_raw_os_error(libc::ENOENT);
        for candidate in &candidates {
            let ret = match &envp_ptrs {
                Some(envp) => unsafe {
                    libc::execve(cstring_ptr(candidate), argv_ptrs.as_ptr(), envp.as_ptr())
                },
                None => unsafe { libc::execv(cstring_ptr(candidate), argv_ptrs.as_ptr()) },
            };
            debug_assert_eq!(ret, -1);
            let err = Error::last_os_error();
            // ENOEXEC/EACCES/ENOENT on a PATH entry should not stop the search; a hard
            // failure on the only candidate (absolute/relative path) is final either way.
            last_err = err;
        }
        Err(last_err)
    })
}

fn search_path(cmd: &OsStr) -> Result<Vec<CString>> {
    let path = std::env::var_os("PATH").unwrap_or_default();
    let mut candidates = Vec::new();
    for dir in std::env::split_paths(&path) {
        let full = dir.join(cmd);
        candidates.push(os_to_cstring(full.as_os_str())?);
    }
    if candidates.is_empty() {
        candidates.push(os_to_cstring(cmd)?);
    }
    Ok(candidates)
}

pub const WNOHANG: i32 = libc::WNOHANG;

/// Wait for `pid` to change state, returning the raw `waitpid` status wrapped as an
/// [`ExitStatus`].
pub fn waitpid(pid: u32, flags: i32) -> Result<(u32, ExitStatus)> {
    let mut status: libc::c_int = 0;
    let got_pid = check_err(unsafe {
        libc::waitpid(pid as libc::pid_t, &mut status as *mut libc::c_int, flags)
    })?;
    Ok((got_pid as u32, ExitStatus::from_raw(status)))
}

pub const SIGTERM: i32 = libc::SIGTERM;
pub const SIGKILL: i32 = libc::SIGKILL;

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}

pub fn killpg(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::killpg(pid as libc::pid_t, signal) })?;
    Ok(())
}

pub fn setuid(uid: u32) -> Result<()> {
    check_err(unsafe { libc::setuid(uid as libc::uid_t) })?;
    Ok(())
}

pub fn setgid(gid: u32) -> Result<()> {
    check_err(unsafe { libc::setgid(gid as libc::gid_t) })?;
    Ok(())
}

pub fn setpgid(pid: u32, pgid: u32) -> Result<()> {
    check_err(unsafe { libc::setpgid(pid as libc::pid_t, pgid as libc::pid_t) })?;
    Ok(())
}

pub const F_GETFD: i32 = libc::F_GETFD;
pub const F_SETFD: i32 = libc::F_SETFD;
pub const FD_CLOEXEC: i32 = libc::FD_CLOEXEC;

pub fn fcntl(fd: i32, cmd: i32, arg1: Option<i32>) -> Result<i32> {
    check_err(unsafe {
        match arg1 {
            Some(arg1) => libc::fcntl(fd, cmd, arg1),
            None => libc::fcntl(fd, cmd),
        }
    })
}

pub fn dup2(oldfd: i32, newfd: i32) -> Result<()> {
    check_err(unsafe { libc::dup2(oldfd, newfd) })?;
    Ok(())
}

/// Obtain a `Redirection` that duplicates one of the parent's standard streams, for use
/// when a child stream isn't otherwise redirected and should fall through to the same
/// destination as the parent's.
///
/// Uses `dup` to get an independent fd rather than sharing fd 0/1/2 directly, so the
/// returned `File`'s `Drop` doesn't close the real standard stream.
pub fn make_redirection_to_standard_stream(which: StandardStream) -> Result<Arc<Redirection>> {
    let fd = which as i32;
    let dup_fd = check_err(unsafe { libc::dup(fd) })?;
    let file = unsafe { File::from_raw_fd(dup_fd) };
    Ok(Arc::new(Redirection::File(file)))
}

/// Reset `SIGPIPE` handling to the default a freshly exec'd Unix program expects.
///
/// Quoting `std::process::Command::do_exec`:
///
/// > libstd ignores SIGPIPE, and signal-handling libraries often set a mask. Child
/// > processes inherit ignored signals and the signal mask from their parent, but most
/// > UNIX programs do not reset these things on their own, so we need to clean things up
/// > now to avoid confusing the program we're about to run.
pub fn reset_sigpipe() -> Result<()> {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        check_err(libc::sigemptyset(set.as_mut_ptr()))?;
        let set = set.assume_init();
        check_err(libc::pthread_sigmask(libc::SIG_SETMASK, &set, ptr::null_mut()))?;
        let ret = libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        if ret == libc::SIG_ERR {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

pub struct PollFd(libc::pollfd);

impl PollFd {
    pub fn new(fd: Option<i32>, events: i16) -> PollFd {
        PollFd(libc::pollfd {
            fd: fd.unwrap_or(-1),
            events,
            revents: 0,
        })
    }
    pub fn test(&self, mask: i16) -> bool {
        self.0.revents & mask != 0
    }
}

pub use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI};

pub fn poll(fds: &mut [PollFd], timeout: Option<i32>) -> Result<usize> {
    let cnt = unsafe {
        let fds_ptr = fds.as_mut_ptr() as *mut libc::pollfd;
        check_err(libc::poll(
            fds_ptr,
            fds.len() as libc::nfds_t,
            timeout.unwrap_or(-1),
        ))?
    };
    Ok(cnt as usize)
}
