use std::io::Read;
use std::path::PathBuf;

use osh_engine::{Exec, Redirection};

fn just_echo_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // test binary name
    if path.ends_with("deps") {
        path.pop();
    }
    path.join(if cfg!(windows) { "just-echo.exe" } else { "just-echo" })
}

#[test]
fn escape_args() {
    // This is mostly relevant for Windows: test whether
    // assemble_cmdline does a good job with arguments that require
    // escaping.
    for &arg in &[
        "x", "", " ", "  ", r" \ ", r" \\ ", r" \\\ ", r#"""#, r#""""#, r#"\"\\""#, "æ÷", "šđ",
        "本", "❤", "☃",
    ] {
        let mut handle = Exec::cmd(just_echo_path())
            .arg(arg)
            .stdout(Redirection::Pipe)
            .start()
            .unwrap();
        let mut output = handle.stdout.take().unwrap();
        let mut output_str = String::new();
        output.read_to_string(&mut output_str).unwrap();
        assert_eq!(output_str, arg);
        assert!(handle.wait().unwrap().success());
    }
}
