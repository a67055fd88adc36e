//! Asynchronous utilities for use with Tokio.

use std::pin::Pin;

use anyhow::anyhow;
use futures::Stream;
use regex::Regex;

use crate::prelude::*;

pub mod io;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged. If the command succeeded,
/// standard error may optionally be checked against a regex to catch tools
/// that exit 0 after failing.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    error_regex: Option<&Regex>,
) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %String::from_utf8_lossy(&output.stdout),
        "Standard output from command"
    );

    if output.status.success() {
        // Tesseract and friends print progress messages here.
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
        if let Some(regex) = error_regex
            && regex.is_match(&stderr)
        {
            return Err(anyhow!("{} printed error output:\n{}", command_name, stderr));
        }
        Ok(())
    } else {
        error!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
        match output.status.code() {
            Some(exit_code) => Err(anyhow!(
                "{} failed with exit code {} and error output:\n{}",
                command_name,
                exit_code,
                stderr,
            )),
            None => Err(anyhow!(
                "{} failed with error output:\n{}",
                command_name,
                stderr,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use super::*;

    static ERROR_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

    #[cfg(unix)]
    fn output(code: i32, stderr: &str) -> std::process::Output {
        use std::os::unix::process::ExitStatusExt as _;
        std::process::Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: vec![],
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    #[cfg(unix)]
    fn reports_exit_codes_and_error_output() {
        assert!(check_for_command_failure("ok", &output(0, "Estimating resolution"), None).is_ok());
        let err = check_for_command_failure("bad", &output(1, "no such file"), None).unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
        let err = check_for_command_failure("sneaky", &output(0, "Error: oops"), Some(&ERROR_RE))
            .unwrap_err();
        assert!(err.to_string().contains("printed error output"));
    }
}
