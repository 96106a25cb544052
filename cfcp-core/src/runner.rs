//! # runner: blocking-style execution of external commands
//!
//! Runs a program with an argument vector and captures its combined stdout and
//! stderr. The input-bearing variant feeds data through the child's stdin so
//! that secrets never show up in a process listing. This is the only place in
//! the core crate that writes to the console, and only when asked to.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::ExecError;

/// Executes external commands. Implemented by [`ProcessRunner`] and by mocks in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and return the combined output.
    async fn exec(
        &self,
        program: &str,
        args: &[String],
        print_output: bool,
    ) -> Result<String, ExecError>;

    /// Like [`CommandRunner::exec`], but writes `input` to the child's stdin.
    ///
    /// `input` is never echoed and never included in an error.
    async fn exec_with_input(
        &self,
        program: &str,
        args: &[String],
        input: &str,
        print_output: bool,
    ) -> Result<String, ExecError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        input: Option<&str>,
        print_output: bool,
    ) -> Result<String, ExecError> {
        let command = render_command(program, args);
        if print_output {
            match input {
                Some(_) => println!("$ {command} (input on stdin)"),
                None => println!("$ {command}"),
            }
        }
        tracing::debug!(command = %command, piped_input = input.is_some(), "Executing command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Launch {
                command: command.clone(),
                source,
            })?;

        // stdin is fed while output is drained so neither pipe can fill up and stall the child
        let stdin = child.stdin.take();
        let feed = async move {
            match (input, stdin) {
                // stdin is dropped when this returns, so the child sees EOF
                (Some(input), Some(mut stdin)) => stdin.write_all(input.as_bytes()).await,
                _ => Ok(()),
            }
        };
        let (fed, out) = tokio::join!(feed, child.wait_with_output());
        let out = out.map_err(|source| ExecError::Launch {
            command: command.clone(),
            source,
        })?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        if !out.status.success() {
            tracing::debug!(command = %command, status = %out.status, "Command failed");
            return Err(ExecError::NonZeroExit {
                command,
                status: out.status.to_string(),
                output,
            });
        }
        // a write error only surfaces if the child still exits successfully
        if let Err(source) = fed {
            return Err(ExecError::Stdin { command, source });
        }
        if print_output {
            print!("{output}");
        }
        Ok(output)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn exec(
        &self,
        program: &str,
        args: &[String],
        print_output: bool,
    ) -> Result<String, ExecError> {
        self.run(program, args, None, print_output).await
    }

    async fn exec_with_input(
        &self,
        program: &str,
        args: &[String],
        input: &str,
        print_output: bool,
    ) -> Result<String, ExecError> {
        self.run(program, args, Some(input), print_output).await
    }
}

/// Renders a program and its arguments the way they'd be typed in a shell.
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let out = ProcessRunner::new()
            .exec("sh", &args(&["-c", "echo out; echo err >&2"]), false)
            .await
            .expect("sh should succeed");
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_command_and_output() {
        let err = ProcessRunner::new()
            .exec("sh", &args(&["-c", "echo boom; exit 3"]), false)
            .await
            .unwrap_err();
        match err {
            ExecError::NonZeroExit {
                command, output, ..
            } => {
                assert_eq!(command, "sh -c echo boom; exit 3");
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let err = ProcessRunner::new()
            .exec("cfcp-definitely-not-installed", &[], false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
        assert!(err.to_string().contains("cfcp-definitely-not-installed"));
    }

    #[tokio::test]
    async fn input_is_fed_through_stdin() {
        let out = ProcessRunner::new()
            .exec_with_input("cat", &[], "one-time-code", false)
            .await
            .expect("cat should succeed");
        assert_eq!(out, "one-time-code");
    }

    #[tokio::test]
    async fn large_input_and_output_do_not_deadlock() {
        // writes well past a pipe buffer before it starts reading its input
        let script = "head -c 300000 /dev/zero | tr '\\0' a; wc -c";
        let input = "x".repeat(300_000);
        let out = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ProcessRunner::new().exec_with_input("sh", &args(&["-c", script]), &input, false),
        )
        .await
        .expect("runner should not stall")
        .expect("sh should succeed");
        assert!(out.starts_with(&"a".repeat(300_000)));
        assert_eq!(out[300_000..].trim(), "300000");
    }

    #[tokio::test]
    async fn piped_input_never_appears_in_errors() {
        let err = ProcessRunner::new()
            .exec_with_input("sh", &args(&["-c", "cat >/dev/null; exit 1"]), "s3cr3t", false)
            .await
            .unwrap_err();
        let rendered = format!("{err} {err:?}");
        assert!(!rendered.contains("s3cr3t"), "{rendered}");
    }

    #[test]
    fn render_command_joins_with_spaces() {
        assert_eq!(
            render_command("cf", &args(&["app", "demo", "--guid"])),
            "cf app demo --guid"
        );
        assert_eq!(render_command("cf", &[]), "cf");
    }
}
