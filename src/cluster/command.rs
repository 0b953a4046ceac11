//! Process runner for external CLI tools

use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs commands on the host with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
        debug!("Running: {} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| Error::CommandSpawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

        // Feed stdin while the output pipes are drained
        let writer = match (stdin, child.stdin.take()) {
            (Some(data), Some(mut pipe)) => {
                let data = data.as_bytes().to_vec();
                Some(tokio::spawn(async move {
                    // Dropping the pipe closes stdin so the process sees EOF
                    pipe.write_all(&data).await
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await?;

        if let Some(writer) = writer {
            let written = writer
                .await
                .map_err(|e| Error::Internal(format!("stdin writer for {} failed: {}", program, e)))?;
            match written {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("{} exited before reading all of stdin", program);
                }
                other => other?,
            }
        }

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_runs_process_with_stdin() {
        let out = ProcessRunner::new()
            .run("cat", &[], Some("apiVersion: v1\n"))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "apiVersion: v1\n");
    }

    #[tokio::test]
    async fn test_large_stdin_with_echoing_process() {
        let manifest = "data: xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\n".repeat(16 * 1024);
        let out = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ProcessRunner::new().run("cat", &[], Some(&manifest)),
        )
        .await
        .expect("cat did not finish")
        .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.len(), manifest.len());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let args = vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()];
        let out = ProcessRunner::new().run("sh", &args, None).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ProcessRunner::new()
            .run("definitely-not-a-real-binary-xyz", &[], None)
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandSpawn { .. });
    }
}
