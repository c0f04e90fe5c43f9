use std::fs::File;
use std::io::Read;
use std::io::Write;

use tempfile::TempDir;

use super::super::{Exec, Redirection};

pub fn read_whole_file(mut f: File) -> String {
    let mut content = String::new();
    f.read_to_string(&mut content).unwrap();
    content
}

#[test]
fn good_cmd() {
    let status = Exec::cmd("true").join().unwrap();
    assert!(status.success());
}

#[test]
fn bad_cmd() {
    let result = Exec::cmd("nosuchcommand").join();
    assert!(result.is_err());
}

#[test]
fn err_exit() {
    let status = Exec::cmd("sh").args(&["-c", "exit 13"]).join().unwrap();
    assert_eq!(status.code(), Some(13));
}

#[test]
fn terminate() {
    let job = Exec::cmd("sleep").arg("1000").start().unwrap();
    job.terminate().unwrap();
    job.wait().unwrap();
}

#[test]
fn terminate_twice() {
    use std::thread;
    use std::time::Duration;

    let job = Exec::cmd("sleep").arg("1000").start().unwrap();
    job.terminate().unwrap();
    thread::sleep(Duration::from_millis(100));
    job.terminate().unwrap();
}

#[test]
fn read_from_stdout() {
    let mut job = Exec::cmd("echo").arg("foo").stdout(Redirection::Pipe).start().unwrap();
    assert_eq!(read_whole_file(job.stdout.take().unwrap()), "foo\n");
    assert!(job.wait().unwrap().success());
}

#[test]
fn input_from_file() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("input");
    {
        let mut outfile = File::create(&tmpname).unwrap();
        outfile.write_all(b"foo").unwrap();
    }
    let mut job = Exec::cmd("cat")
        .arg(&tmpname)
        .stdin(Redirection::File(File::open(&tmpname).unwrap()))
        .stdout(Redirection::Pipe)
        .start()
        .unwrap();
    assert_eq!(read_whole_file(job.stdout.take().unwrap()), "foo");
    assert!(job.wait().unwrap().success());
}

#[test]
fn output_to_file() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("output");
    let outfile = File::create(&tmpname).unwrap();
    let status = Exec::cmd("printf")
        .arg("foo")
        .stdout(Redirection::File(outfile))
        .join()
        .unwrap();
    assert!(status.success());
    assert_eq!(read_whole_file(File::open(&tmpname).unwrap()), "foo");
}

#[test]
fn input_output_from_file() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname_in = tmpdir.path().join("input");
    let tmpname_out = tmpdir.path().join("output");
    {
        let mut f = File::create(&tmpname_in).unwrap();
        f.write_all(b"foo").unwrap();
    }
    let status = Exec::cmd("cat")
        .stdin(Redirection::File(File::open(&tmpname_in).unwrap()))
        .stdout(Redirection::File(File::create(&tmpname_out).unwrap()))
        .join()
        .unwrap();
    assert!(status.success());
    assert_eq!(read_whole_file(File::open(&tmpname_out).unwrap()), "foo");
}

#[test]
fn communicate_input() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("input");
    let capture = Exec::cmd("cat")
        .stdin("hello world")
        .stdout(Redirection::File(File::create(&tmpname).unwrap()))
        .capture()
        .unwrap();
    assert!(capture.success());
    assert_eq!(read_whole_file(File::open(&tmpname).unwrap()), "hello world");
}

#[test]
fn communicate_output() {
    let capture = Exec::cmd("sh")
        .args(&["-c", "echo foo; echo bar >&2"])
        .capture()
        .unwrap();
    assert_eq!(capture.stdout, b"foo\n");
    assert_eq!(capture.stderr, b"bar\n");
    assert!(capture.success());
}

#[test]
fn communicate_input_output() {
    let capture = Exec::cmd("sh")
        .args(&["-c", "cat; echo foo >&2"])
        .stdin("hello world")
        .capture()
        .unwrap();
    assert_eq!(capture.stdout, b"hello world");
    assert_eq!(capture.stderr, b"foo\n");
    assert!(capture.success());
}

#[test]
fn communicate_input_output_long() {
    let input = [65u8; 1_000_000];
    let capture = Exec::cmd("sh")
        .args(&["-c", "cat; printf '%100000s' '' >&2"])
        .stdin(&input[..])
        .capture()
        .unwrap();
    assert_eq!(&capture.stdout[..], &input[..]);
    assert_eq!(&capture.stderr[..], &[32u8; 100_000][..]);
    assert!(capture.success());
}

#[test]
fn communicate_input_output_str() {
    let capture = Exec::cmd("sh")
        .args(&["-c", "cat; echo foo >&2"])
        .stdin("hello world")
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str(), "hello world");
    assert_eq!(capture.stderr_str(), "foo\n");
}

#[test]
fn null_byte_in_cmd() {
    let result = Exec::cmd("echo\0foo").join();
    assert!(result.is_err());
}

#[test]
fn merge_err_to_out_pipe() {
    let capture = Exec::cmd("sh")
        .args(&["-c", "echo foo; echo bar >&2"])
        .stdout(Redirection::Pipe)
        .stderr(Redirection::Merge)
        .capture()
        .unwrap();
    assert_eq!(capture.stdout, b"foo\nbar\n");
    assert!(capture.stderr.is_empty());
    assert!(capture.success());
}

#[test]
fn merge_out_to_err_pipe() {
    let capture = Exec::cmd("sh")
        .args(&["-c", "echo foo; echo bar >&2"])
        .stdout(Redirection::Merge)
        .stderr(Redirection::Pipe)
        .capture()
        .unwrap();
    assert_eq!(capture.stderr, b"foo\nbar\n");
    assert!(capture.stdout.is_empty());
    assert!(capture.success());
}

#[test]
fn merge_err_to_out_file() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("output");
    let status = Exec::cmd("sh")
        .args(&["-c", "echo -n foo; echo -n bar >&2"])
        .stdout(Redirection::File(File::create(&tmpname).unwrap()))
        .stderr(Redirection::Merge)
        .join()
        .unwrap();
    assert!(status.success());
    assert_eq!(read_whole_file(File::open(&tmpname).unwrap()), "foobar");
}

#[test]
fn pipe_1() {
    let capture = (Exec::cmd("printf").arg("foo\\nbar\\nbaz\\n") | Exec::cmd("wc").arg("-l"))
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str().trim(), "3");
}
