//! Directory tree transfer with `rsync` over ssh.

use std::path::Path;
use std::process::Command;

use error_stack::Report;
use tracing::debug;
use tracing::info;

use super::ssh::shell_quote;
use super::ssh::SshTransport;
use crate::domain::session::Endpoint;
use crate::domain::session::Session;
use crate::domain::traits::FileSync;
use crate::domain::traits::SyncDirection;
use crate::domain::traits::SyncOutcome;
use crate::domain::traits::SyncRule;
use crate::error::SyncError;

pub struct RsyncBridge {
    /// `None` when no ssh key is configured; every transfer is skipped
    transport: Option<SshTransport>,
    remote_dir: String,
}

impl RsyncBridge {
    pub fn new(transport: Option<SshTransport>, remote_dir: impl Into<String>) -> Self {
        Self {
            transport,
            remote_dir: remote_dir.into(),
        }
    }

    fn build(
        &self,
        transport: &SshTransport,
        endpoint: &Endpoint,
        direction: SyncDirection,
        local_path: &Path,
        rules: &[SyncRule],
    ) -> Command {
        let remote_shell = std::iter::once("ssh".to_string())
            .chain(
                transport
                    .ssh_args(endpoint)
                    .iter()
                    .map(|arg| shell_quote(arg)),
            )
            .collect::<Vec<_>>()
            .join(" ");
        let remote = format!("{}:{}", transport.destination(endpoint), self.remote_dir);
        let mut local = local_path.display().to_string();
        if !local.ends_with('/') {
            local.push('/');
        }

        let mut cmd = transport.command("rsync");
        cmd.arg("-avzP").arg("-e").arg(remote_shell);
        for rule in rules {
            match rule {
                SyncRule::Include(pattern) => cmd.arg(format!("--include={pattern}")),
                SyncRule::Exclude(pattern) => cmd.arg(format!("--exclude={pattern}")),
            };
        }
        match direction {
            SyncDirection::Push => cmd.arg(local).arg(remote),
            SyncDirection::Pull => cmd.arg(remote).arg(local),
        };
        cmd
    }
}

impl FileSync for RsyncBridge {
    fn sync_tree(
        &self,
        session: &Session,
        direction: SyncDirection,
        local_path: &Path,
        rules: &[SyncRule],
    ) -> Result<SyncOutcome, Report<SyncError>> {
        let Some(transport) = &self.transport else {
            return Ok(SyncOutcome::Skipped {
                reason: "SSH key not specified via --ssh-key, cannot transfer files".to_string(),
            });
        };
        let Some(endpoint) = session.ssh_endpoint() else {
            return Ok(SyncOutcome::Skipped {
                reason: "SSH port not open, cannot transfer files".to_string(),
            });
        };

        let mut cmd = self.build(transport, endpoint, direction, local_path, rules);
        debug!(command = ?cmd, "Executing rsync");

        let status = cmd.status().map_err(|e| {
            Report::new(SyncError::Spawn {
                message: e.to_string(),
            })
        })?;
        if !status.success() {
            return Err(Report::new(SyncError::Failed {
                exit_code: status.code(),
            })
            .attach_printable(format!("direction: {direction}")));
        }

        info!("Transferred files ({direction}) for {}", local_path.display());
        Ok(SyncOutcome::Synced)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::mock::test_session;
    use crate::domain::monitor::sync_rules;

    fn transport() -> SshTransport {
        SshTransport {
            key: PathBuf::from("/keys/id"),
            user: "kasm-user".to_string(),
            use_wsl: false,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn pull_restricts_to_first_level_directories() {
        let bridge = RsyncBridge::new(Some(transport()), "/home/ht/training/");
        let session = test_session();
        let endpoint = session.ssh_endpoint().expect("test session exposes ssh");

        let cmd = bridge.build(
            &transport(),
            endpoint,
            SyncDirection::Pull,
            Path::new("/tmp/out"),
            &sync_rules(SyncDirection::Pull),
        );

        assert_eq!(cmd.get_program(), "rsync");
        assert_eq!(
            args(&cmd),
            vec![
                "-avzP",
                "-e",
                "ssh -p 40022 -i /keys/id -o StrictHostKeyChecking=no",
                "--exclude=LoRA_Easy_Training_Scripts",
                "--include=/*/",
                "--include=/*/**",
                "--exclude=*",
                "kasm-user@203.0.113.7:/home/ht/training/",
                "/tmp/out/",
            ]
        );
    }

    #[test]
    fn push_copies_local_tree_to_pod() {
        let bridge = RsyncBridge::new(Some(transport()), "/home/ht/training/");
        let session = test_session();
        let endpoint = session.ssh_endpoint().expect("test session exposes ssh");

        let cmd = bridge.build(
            &transport(),
            endpoint,
            SyncDirection::Push,
            Path::new("/data/datasets/"),
            &sync_rules(SyncDirection::Push),
        );

        let args = args(&cmd);
        assert_eq!(
            &args[3..],
            &[
                "--exclude=LoRA_Easy_Training_Scripts".to_string(),
                "/data/datasets/".to_string(),
                "kasm-user@203.0.113.7:/home/ht/training/".to_string(),
            ]
        );
    }

    #[test]
    fn skips_without_key_or_ssh_port() {
        let without_key = RsyncBridge::new(None, "/home/ht/training/");
        let outcome = without_key
            .sync_tree(
                &test_session(),
                SyncDirection::Pull,
                Path::new("/tmp/out"),
                &[],
            )
            .expect("should skip");
        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));

        let mut session = test_session();
        session.endpoints.clear();
        let outcome = RsyncBridge::new(Some(transport()), "/home/ht/training/")
            .sync_tree(&session, SyncDirection::Push, Path::new("/tmp/in"), &[])
            .expect("should skip");
        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
    }
}
