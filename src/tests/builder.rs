use std::fs::File;
use std::io::Write;

use tempfile::TempDir;

use super::super::{Exec, Redirection};

use crate::tests::common::read_whole_file;

#[test]
fn run_wait() {
    let status = Exec::cmd("true").join().unwrap();
    assert!(status.success());
}

#[test]
fn null_file() {
    let c = Exec::cmd("cat")
        .stdin(Redirection::Null)
        .stdout(Redirection::Pipe)
        .capture()
        .unwrap();
    assert_eq!(c.stdout_str(), "");
}

#[test]
fn stream_stdout() {
    let stream = Exec::cmd("echo").args(&["-n", "foo"]).stream_stdout().unwrap();
    assert_eq!(read_whole_file_reader(stream), "foo");
}

#[test]
fn stream_stderr() {
    let stream = Exec::cmd("sh")
        .args(&["-c", "echo -n foo >&2"])
        .stream_stderr()
        .unwrap();
    assert_eq!(read_whole_file_reader(stream), "foo");
}

#[test]
fn stream_stdin() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("output");
    {
        let mut stream = Exec::cmd("cat")
            .stdout(File::create(&tmpname).unwrap())
            .stream_stdin()
            .unwrap();
        stream.write_all(b"foo").unwrap();
    }
    assert_eq!(read_whole_file(File::open(&tmpname).unwrap()), "foo");
}

#[test]
fn stream_capture_out() {
    let c = Exec::cmd("printf").arg("foo").stdout(Redirection::Pipe).capture().unwrap();
    assert_eq!(c.stdout_str(), "foo");
}

#[test]
fn stream_capture_err() {
    let c = Exec::cmd("sh")
        .arg("-c")
        .arg("printf foo >&2")
        .stderr(Redirection::Pipe)
        .capture()
        .unwrap();
    assert_eq!(c.stderr_str(), "foo");
}

#[test]
fn stream_capture_out_with_input_data() {
    let c = Exec::cmd("cat")
        .stdin("foo")
        .stdout(Redirection::Pipe)
        .capture()
        .unwrap();
    assert_eq!(c.stdout_str(), "foo");
}

#[test]
fn shell_exec() {
    // note: this uses built-in echo on Windows, so don't try anything
    // fancy like echo -n
    let stream = Exec::shell("echo foo").stream_stdout().unwrap();
    assert_eq!(read_whole_file_reader(stream).trim(), "foo");
}

#[test]
fn pipeline_run() {
    let mut job = (Exec::cmd("echo").arg("foo\nbar") | Exec::cmd("wc").arg("-l"))
        .stdout(Redirection::Pipe)
        .start()
        .unwrap();
    assert_eq!(
        read_whole_file(job.stdout.take().unwrap()).trim(),
        "2"
    );
    assert!(job.wait().unwrap().success());
}

#[test]
fn pipeline_stream_out() {
    let stream = (Exec::cmd("echo").arg("foo\nbar") | Exec::cmd("wc").arg("-l"))
        .stream_stdout()
        .unwrap();
    assert_eq!(read_whole_file_reader(stream).trim(), "2");
}

#[test]
fn pipeline_stream_in() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("output");
    {
        let mut stream = (Exec::cmd("cat") | Exec::cmd("wc").arg("-l"))
            .stdout(File::create(&tmpname).unwrap())
            .stream_stdin()
            .unwrap();
        stream.write_all(b"foo\nbar\nbaz\n").unwrap();
    }
    assert_eq!(read_whole_file(File::open(&tmpname).unwrap()).trim(), "3");
}

#[test]
fn pipeline_compose_pipelines() {
    let pipe1 = Exec::cmd("echo").arg("foo\nbar\nfoo") | Exec::cmd("sort");
    let pipe2 = Exec::cmd("uniq") | Exec::cmd("wc").arg("-l");
    let pipe = pipe1 | pipe2;
    let stream = pipe.stream_stdout().unwrap();
    assert_eq!(read_whole_file_reader(stream).trim(), "2");
}

#[test]
fn pipeline_capture() {
    let c = (Exec::cmd("cat") | Exec::shell("wc -l"))
        .stdin("foo\nbar\nbaz\n")
        .capture()
        .unwrap();
    assert_eq!(c.stdout_str().trim(), "3");
}

#[test]
fn pipeline_wait() {
    let status = (Exec::cmd("true") | Exec::cmd("true")).join().unwrap();
    assert!(status.success());

    let status = (Exec::cmd("false") | Exec::cmd("true")).join().unwrap();
    assert!(status.success());

    let status = (Exec::cmd("true") | Exec::cmd("false")).join().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn pipeline_invalid_1() {
    let result = (Exec::cmd("echo").arg("foo") | Exec::cmd("no-such-command")).join();
    assert!(result.is_err());
}

#[test]
fn pipeline_invalid_2() {
    let result = (Exec::cmd("no-such-command") | Exec::cmd("echo").arg("foo")).join();
    assert!(result.is_err());
}

fn read_whole_file_reader(mut r: impl std::io::Read) -> String {
    let mut content = String::new();
    r.read_to_string(&mut content).unwrap();
    content
}
