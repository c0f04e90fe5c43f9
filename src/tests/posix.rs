use libc;

use super::super::exec::unix::JobExt;
use super::super::Exec;

#[test]
fn err_terminate() {
    let job = Exec::cmd("sleep").arg("5").start().unwrap();
    assert!(job.poll().is_none());
    job.terminate().unwrap();
    assert!(job.wait().unwrap().is_killed_by(libc::SIGTERM));
}

#[test]
fn waitpid_echild() {
    let job = Exec::cmd("true").start().unwrap();
    let pid = job.pid() as libc::pid_t;
    let mut status = 0 as libc::c_int;
    let wpid = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(wpid, pid);
    assert_eq!(status, 0);
    // the process has already been reaped by the raw waitpid() above; the job's
    // own wait() must tolerate ECHILD instead of erroring out.
    assert!(job.wait().is_ok());
}

#[test]
fn send_signal() {
    let job = Exec::cmd("sleep").arg("5").start().unwrap();
    job.send_signal(libc::SIGUSR1).unwrap();
    assert!(job.wait().unwrap().is_killed_by(libc::SIGUSR1));
}
