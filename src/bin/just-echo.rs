//! Test helper: prints its first command-line argument verbatim, with no trailing
//! newline. Used by the `escape-args` integration test to check that argv reaches
//! the child byte-for-byte through the platform's spawn path.

fn main() {
    if let Some(arg) = std::env::args().nth(1) {
        print!("{arg}");
    }
}
