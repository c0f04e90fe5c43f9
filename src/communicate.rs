//! Deadlock-free reading/writing of a child's stdin/stdout/stderr.

use std::fs::File;
use std::io;
use std::time::Duration;

/// Reads a child's stdout/stderr while feeding its stdin, without risking the deadlock
/// that a naive `write` then `read` can hit when both sides fill up their pipe buffers.
///
/// Created by [`Job::communicate`](crate::Job::communicate),
/// [`Exec::communicate`](crate::Exec::communicate), or
/// [`Pipeline::communicate`](crate::Pipeline::communicate).
#[derive(Debug)]
pub struct Communicator<T = Vec<u8>> {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
    stdin_data: T,
    time_limit: Option<Duration>,
}

impl<T: AsRef<[u8]>> Communicator<T> {
    pub(crate) fn new(
        stdin: Option<File>,
        stdout: Option<File>,
        stderr: Option<File>,
        stdin_data: T,
    ) -> Communicator<T> {
        Communicator {
            stdin,
            stdout,
            stderr,
            stdin_data,
            time_limit: None,
        }
    }

    /// Bounds how long [`read`](Self::read) is allowed to take.
    ///
    /// If the limit elapses before all streams are closed, `read` returns an error of
    /// kind `ErrorKind::TimedOut`. Any data already read is lost in that case - this is a
    /// best-effort cutoff, not a resumable read.
    pub fn limit_time(mut self, timeout: Duration) -> Self {
        self.time_limit = Some(timeout);
        self
    }

    /// Feeds `stdin_data` to the child's stdin (if redirected) while concurrently
    /// reading stdout and stderr (if redirected), returning their accumulated bytes.
    ///
    /// # Panics
    ///
    /// Panics if input data was given but stdin was not redirected to a pipe, or
    /// vice versa.
    pub fn read(&mut self) -> io::Result<(Vec<u8>, Vec<u8>)> {
        os::communicate(
            &mut self.stdin,
            &mut self.stdout,
            &mut self.stderr,
            self.stdin_data.as_ref(),
            self.time_limit,
        )
    }
}

#[cfg(unix)]
mod os {
    use crate::posix;
    use std::fs::File;
    use std::io::{Error, ErrorKind, Read, Result as IoResult, Write};
    use std::os::unix::io::AsRawFd;
    use std::time::{Duration, Instant};

    fn poll3(
        fin: Option<&File>,
        fout: Option<&File>,
        ferr: Option<&File>,
        timeout_ms: Option<i32>,
    ) -> IoResult<(bool, bool, bool)> {
        fn to_poll(f: Option<&File>, for_read: bool) -> posix::PollFd {
            let optfd = f.map(File::as_raw_fd);
            let events = if for_read {
                posix::POLLIN
            } else {
                posix::POLLOUT
            };
            posix::PollFd::new(optfd, events)
        }

        let mut fds = [
            to_poll(fin, false),
            to_poll(fout, true),
            to_poll(ferr, true),
        ];
        posix::poll(&mut fds, timeout_ms)?;

        Ok((
            fds[0].test(posix::POLLOUT | posix::POLLHUP),
            fds[1].test(posix::POLLIN | posix::POLLHUP),
            fds[2].test(posix::POLLIN | posix::POLLHUP),
        ))
    }

    pub fn communicate(
        stdin_ref: &mut Option<File>,
        stdout_ref: &mut Option<File>,
        stderr_ref: &mut Option<File>,
        mut input_data: &[u8],
        time_limit: Option<Duration>,
    ) -> IoResult<(Vec<u8>, Vec<u8>)> {
        // Note: chunk size for writing must be smaller than the pipe buffer size. A
        // large enough write to a blocking pipe deadlocks despite the use of poll() to
        // check that it's ok to write.
        const WRITE_SIZE: usize = 4096;

        let deadline = time_limit.map(|d| Instant::now() + d);
        let mut stdout_ref = stdout_ref.as_ref();
        let mut stderr_ref = stderr_ref.as_ref();

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();

        loop {
            match (stdin_ref.as_ref(), stdout_ref, stderr_ref) {
                // When only a single stream remains for reading or writing, we no
                // longer need polling. When no stream remains, we are done.
                (Some(..), None, None) => {
                    stdin_ref.as_ref().unwrap().write_all(input_data)?;
                    // close stdin when done writing, so the child receives EOF
                    stdin_ref.take();
                    break;
                }
                (None, Some(ref mut stdout), None) => {
                    stdout.read_to_end(&mut out)?;
                    break;
                }
                (None, None, Some(ref mut stderr)) => {
                    stderr.read_to_end(&mut err)?;
                    break;
                }
                (None, None, None) => break,
                _ => (),
            }

            let timeout_ms = match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(Error::from(ErrorKind::TimedOut));
                    }
                    Some((dl - now).as_millis().min(i32::MAX as u128) as i32)
                }
                None => None,
            };

            let (in_ready, out_ready, err_ready) =
                poll3(stdin_ref.as_ref(), stdout_ref, stderr_ref, timeout_ms)?;
            if in_ready {
                let chunk = &input_data[..WRITE_SIZE.min(input_data.len())];
                let n = stdin_ref.as_ref().unwrap().write(chunk)?;
                input_data = &input_data[n..];
                if input_data.is_empty() {
                    // close stdin when done writing, so the child receives EOF
                    stdin_ref.take();
                }
            }
            if out_ready {
                let mut buf = [0u8; 4096];
                let n = stdout_ref.unwrap().read(&mut buf)?;
                if n != 0 {
                    out.extend(&buf[..n]);
                } else {
                    stdout_ref = None;
                }
            }
            if err_ready {
                let mut buf = [0u8; 4096];
                let n = stderr_ref.unwrap().read(&mut buf)?;
                if n != 0 {
                    err.extend(&buf[..n]);
                } else {
                    stderr_ref = None;
                }
            }
        }

        Ok((out, err))
    }
}

#[cfg(windows)]
mod os {
    use std::fs::File;
    use std::io::{ErrorKind, Read, Result as IoResult, Write};
    use std::time::{Duration, Instant};

    fn comm_read(mut outfile: File, deadline: Option<Instant>) -> IoResult<Vec<u8>> {
        // Windows overlapped pipes don't give us a portable poll-with-timeout
        // primitive at this layer; the deadline is enforced coarsely by checking
        // elapsed time between chunks rather than interrupting an in-flight read.
        let mut contents = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            if let Some(dl) = deadline
                && Instant::now() >= dl
            {
                return Err(std::io::Error::from(ErrorKind::TimedOut));
            }
            let n = outfile.read(&mut buf)?;
            if n == 0 {
                break;
            }
            contents.extend_from_slice(&buf[..n]);
        }
        Ok(contents)
    }

    fn comm_write(mut infile: File, input_data: &[u8]) -> IoResult<()> {
        infile.write_all(input_data)?;
        Ok(())
    }

    // Call up to three functions in parallel, starting as many threads as needed for
    // the functions that are actually specified.
    pub fn parallel_call<R1, R2, R3>(
        f1: Option<impl FnOnce() -> R1 + Send>,
        f2: Option<impl FnOnce() -> R2 + Send>,
        f3: Option<impl FnOnce() -> R3 + Send>,
    ) -> (Option<R1>, Option<R2>, Option<R3>)
    where
        R1: Send,
        R2: Send,
        R3: Send,
    {
        match (f1, f2, f3) {
            // only create threads if necessary
            (None, None, None) => (None, None, None),
            (Some(f1), None, None) => (Some(f1()), None, None),
            (None, Some(f2), None) => (None, Some(f2()), None),
            (None, None, Some(f3)) => (None, None, Some(f3())),
            (f1, f2, f3) => crossbeam_utils::thread::scope(move |scope| {
                // run f2 and/or f3 in the background and let f1 run in our thread
                let ta = f2.map(|f| scope.spawn(move |_| f()));
                let tb = f3.map(|f| scope.spawn(move |_| f()));
                (
                    f1.map(|f| f()),
                    ta.map(|t| t.join().unwrap()),
                    tb.map(|t| t.join().unwrap()),
                )
            })
            .unwrap(),
        }
    }

    pub fn communicate(
        stdin: &mut Option<File>,
        stdout: &mut Option<File>,
        stderr: &mut Option<File>,
        input_data: &[u8],
        time_limit: Option<Duration>,
    ) -> IoResult<(Vec<u8>, Vec<u8>)> {
        let deadline = time_limit.map(|d| Instant::now() + d);
        let write_in_fn = stdin.take().map(|in_| move || comm_write(in_, input_data));
        let read_out_fn = stdout.take().map(|out| move || comm_read(out, deadline));
        let read_err_fn = stderr.take().map(|err| move || comm_read(err, deadline));
        let (out, err, write_ret) = parallel_call(read_out_fn, read_err_fn, write_in_fn);
        if let Some(write_ret) = write_ret {
            write_ret?;
        }
        Ok((out.transpose()?.unwrap_or_default(), err.transpose()?.unwrap_or_default()))
    }
}
