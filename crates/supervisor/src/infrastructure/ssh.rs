//! Remote command execution over `ssh`.

use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use error_stack::Report;
use tracing::debug;

use crate::domain::session::Endpoint;
use crate::domain::session::Session;
use crate::domain::traits::CommandOutput;
use crate::domain::traits::RemoteExecutor;
use crate::error::RemoteExecError;

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }
    }
}

/// Credentials and launcher shared by ssh and rsync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTransport {
    pub key: PathBuf,
    pub user: String,
    /// Launch through `wsl` on Windows hosts
    pub use_wsl: bool,
}

impl SshTransport {
    /// `ssh` options for the endpoint, without the destination.
    pub fn ssh_args(&self, endpoint: &Endpoint) -> Vec<String> {
        vec![
            "-p".to_string(),
            endpoint.public_port.to_string(),
            "-i".to_string(),
            self.key.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ]
    }

    pub fn destination(&self, endpoint: &Endpoint) -> String {
        format!("{}@{}", self.user, endpoint.host)
    }

    /// Command for `program`, prefixed with `wsl` when configured.
    pub fn command(&self, program: &str) -> Command {
        if self.use_wsl {
            let mut cmd = Command::new("wsl");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }
}

/// Quotes one argument for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

pub struct SshExecutor {
    /// `None` when no ssh key is configured
    transport: Option<SshTransport>,
}

impl SshExecutor {
    pub fn new(transport: Option<SshTransport>) -> Self {
        Self { transport }
    }
}

fn build(transport: &SshTransport, endpoint: &Endpoint, argv: &[String]) -> Command {
    let remote = argv
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    let mut cmd = transport.command("ssh");
    cmd.args(transport.ssh_args(endpoint))
        .args(["-o", "BatchMode=yes"])
        .arg(transport.destination(endpoint))
        .arg(remote);
    cmd
}

impl RemoteExecutor for SshExecutor {
    fn execute(
        &self,
        session: &Session,
        argv: &[String],
    ) -> Result<CommandOutput, Report<RemoteExecError>> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            Report::new(RemoteExecError::Unavailable {
                message: "no ssh key configured".to_string(),
            })
        })?;
        let endpoint = session.ssh_endpoint().ok_or_else(|| {
            Report::new(RemoteExecError::Unavailable {
                message: format!("pod {} exposes no ssh port", session.id),
            })
        })?;

        let mut cmd = build(transport, endpoint, argv);
        debug!(command = ?cmd, "Executing remote command");

        let output = cmd.output().map_err(|e| {
            Report::new(RemoteExecError::Spawn {
                message: format!("failed to execute ssh: {e}"),
            })
        })?;
        Ok(CommandOutput::from(output))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::mock::test_session;

    fn transport(use_wsl: bool) -> SshTransport {
        SshTransport {
            key: PathBuf::from("/keys/id_ed25519"),
            user: "kasm-user".to_string(),
            use_wsl,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("/home/ht/a.json"), "/home/ht/a.json");
        assert_eq!(shell_quote("*.json"), "'*.json'");
        assert_eq!(
            shell_quote("Content-Type: application/json"),
            "'Content-Type: application/json'"
        );
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn builds_ssh_invocation() {
        let session = test_session();
        let endpoint = session.ssh_endpoint().expect("test session exposes ssh");
        let cmd = build(
            &transport(false),
            endpoint,
            &["find".to_string(), "/t".to_string(), "*.json".to_string()],
        );

        assert_eq!(cmd.get_program(), "ssh");
        assert_eq!(
            args(&cmd),
            vec![
                "-p",
                "40022",
                "-i",
                "/keys/id_ed25519",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "BatchMode=yes",
                "kasm-user@203.0.113.7",
                "find /t '*.json'",
            ]
        );
    }

    #[test]
    fn wsl_prefixes_the_program() {
        let session = test_session();
        let endpoint = session.ssh_endpoint().expect("test session exposes ssh");
        let cmd = build(&transport(true), endpoint, &["true".to_string()]);

        assert_eq!(cmd.get_program(), "wsl");
        assert_eq!(args(&cmd)[0], "ssh");
    }

    #[test]
    fn missing_ssh_endpoint_is_unavailable() {
        let mut session = test_session();
        session.endpoints.clear();

        let err = SshExecutor::new(Some(transport(false)))
            .execute(&session, &["true".to_string()])
            .expect_err("should fail");

        assert!(matches!(
            err.current_context(),
            RemoteExecError::Unavailable { .. }
        ));
    }

    #[test]
    fn missing_key_is_unavailable() {
        let err = SshExecutor::new(None)
            .execute(&test_session(), &["true".to_string()])
            .expect_err("should fail");

        assert!(matches!(
            err.current_context(),
            RemoteExecError::Unavailable { .. }
        ));
    }
}
