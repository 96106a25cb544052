//! Transfer through the system `scp`, wrapped in `sshpass` so the one-time
//! code can be supplied on stdin instead of a terminal prompt.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::shell_quote;
use crate::contract::{AuthCode, InstanceAddress, Transport};
use crate::error::{ExecError, TransferError};
use crate::runner::CommandRunner;

/// Runs `sshpass -d 0 scp ...` for each copy.
pub struct ScpCommandTransport<R> {
    runner: R,
    print_commands: bool,
}

impl<R: CommandRunner> ScpCommandTransport<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            print_commands: false,
        }
    }

    pub fn with_print_commands(mut self, print: bool) -> Self {
        self.print_commands = print;
        self
    }
}

/// The argument vector for `sshpass`; the password itself is never part of it.
///
/// The remote half is expanded by the remote shell, so the target is quoted.
pub(crate) fn scp_args(address: &InstanceAddress, source: &Path, target: &str) -> Vec<String> {
    vec![
        "-d".into(),
        "0".into(),
        "scp".into(),
        "-P".into(),
        address.port.to_string(),
        "-o".into(),
        format!("User={}", address.user()),
        "-o".into(),
        "StrictHostKeyChecking=accept-new".into(),
        source.display().to_string(),
        format!("{}:{}", address.host, shell_quote(target)),
    ]
}

#[async_trait]
impl<R: CommandRunner> Transport for ScpCommandTransport<R> {
    async fn copy_file(
        &self,
        address: &InstanceAddress,
        source: &Path,
        target: &str,
        code: &AuthCode,
    ) -> Result<(), TransferError> {
        let args = scp_args(address, source, target);
        let input = format!("{}\n", code.expose());
        match self
            .runner
            .exec_with_input("sshpass", &args, &input, self.print_commands)
            .await
        {
            Ok(_) => {
                info!(instance = %address, source = %source.display(), remote_path = target, "Copied file with scp");
                Ok(())
            }
            // sshpass exits with 5 on a rejected password
            Err(ExecError::NonZeroExit { status, output, .. })
                if status.ends_with(" 5") || output.contains("Permission denied") =>
            {
                Err(TransferError::AuthRejected {
                    user: address.user(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockCommandRunner;

    fn address() -> InstanceAddress {
        InstanceAddress {
            app_guid: "9775c4e8".into(),
            index: 2,
            host: "ssh.cf.example.com".into(),
            port: 2222,
            host_key_fingerprint: None,
        }
    }

    #[test]
    fn builds_scp_invocation_without_the_code() {
        let args = scp_args(&address(), Path::new("build.sh"), "/tmp");
        assert_eq!(
            args,
            vec![
                "-d",
                "0",
                "scp",
                "-P",
                "2222",
                "-o",
                "User=cf:9775c4e8/2",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "build.sh",
                "ssh.cf.example.com:'/tmp'",
            ]
        );
    }

    #[test]
    fn remote_target_is_quoted_for_the_remote_shell() {
        let args = scp_args(&address(), Path::new("build.sh"), "/home/vcap/my app/it's $HOME");
        assert_eq!(
            args.last().map(String::as_str),
            Some(r"ssh.cf.example.com:'/home/vcap/my app/it'\''s $HOME'")
        );
    }

    #[tokio::test]
    async fn code_goes_through_stdin() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_exec_with_input()
            .withf(|program: &str, args: &[String], input: &str, _: &bool| {
                program == "sshpass" && input == "abc123\n" && !args.iter().any(|a| a.contains("abc123"))
            })
            .times(1)
            .returning(|_, _, _, _| Ok(String::new()));
        ScpCommandTransport::new(runner)
            .copy_file(&address(), Path::new("build.sh"), "/tmp", &AuthCode::new("abc123"))
            .await
            .expect("copy should succeed");
    }

    #[tokio::test]
    async fn rejected_code_maps_to_auth_rejected() {
        let mut runner = MockCommandRunner::new();
        runner.expect_exec_with_input().returning(|_, _, _, _| {
            Err(ExecError::NonZeroExit {
                command: "sshpass".into(),
                status: "exit status: 5".into(),
                output: String::new(),
            })
        });
        let err = ScpCommandTransport::new(runner)
            .copy_file(&address(), Path::new("build.sh"), "/tmp", &AuthCode::new("stale"))
            .await
            .unwrap_err();
        assert!(err.is_auth_rejected(), "{err:?}");
    }
}
