//! Retried kubectl invocations
//!
//! Used for manifests that are applied as text (operators, CRDs) and for
//! `exec` into pods. Failed runs are judged by the CLI output classifier.

use crate::domain::ports::{CommandOutput, CommandRunner, ResourceRef};
use crate::error::{Error, Result};
use crate::poll::{classify_output, CliVerdict, ConditionResult, KubectlAction, Waiter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const KUBECTL: &str = "kubectl";

/// kubectl bound to an optional kubeconfig
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>, kubeconfig: Option<PathBuf>) -> Self {
        Self { runner, kubeconfig }
    }

    /// Global flags followed by `args`
    fn command_line(&self, namespace: Option<&str>, args: &[String]) -> Vec<String> {
        let mut line = Vec::with_capacity(args.len() + 2);
        if let Some(path) = &self.kubeconfig {
            line.push(format!("--kubeconfig={}", path.display()));
        }
        if let Some(ns) = namespace {
            line.push(format!("--namespace={}", ns));
        }
        line.extend(args.iter().cloned());
        line
    }

    /// Run once and return the raw output
    pub async fn run(&self, namespace: Option<&str>, args: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
        let line = self.command_line(namespace, args);
        self.runner.run(KUBECTL, &line, stdin).await
    }

    /// Run a shell command in a container and return its stdout
    pub async fn exec(&self, namespace: &str, pod: &str, container: Option<&str>, command: &str) -> Result<String> {
        let mut args = vec!["exec".to_string(), pod.to_string()];
        if let Some(c) = container {
            args.push(format!("--container={}", c));
        }
        args.extend(["--".to_string(), "sh".to_string(), "-c".to_string(), command.to_string()]);

        let output = self.run(Some(namespace), &args, None).await?;
        if !output.success {
            return Err(Error::CommandFailed {
                command: format!("exec {} in {}/{}", command, namespace, pod),
                output: output.combined(),
            });
        }
        Ok(output.stdout)
    }

    /// `kubectl <action> -f -` with `data` on stdin
    pub async fn retry_input(
        &self,
        namespace: Option<&str>,
        action: KubectlAction,
        data: &str,
        waiter: &Waiter,
    ) -> Result<()> {
        let args = vec![action.verb().to_string(), "-f".to_string(), "-".to_string()];
        self.retry(namespace, action, &args, Some(data), "stdin", waiter).await
    }

    /// `kubectl <action> -f <file>` for each file, in order
    pub async fn retry_files(
        &self,
        namespace: Option<&str>,
        action: KubectlAction,
        files: &[&Path],
        waiter: &Waiter,
    ) -> Result<()> {
        for file in files {
            let args = vec![action.verb().to_string(), "-f".to_string(), file.display().to_string()];
            self.retry(namespace, action, &args, None, &file.display().to_string(), waiter)
                .await?;
        }
        Ok(())
    }

    /// `kubectl <action> <args...>`
    pub async fn retry_args(
        &self,
        namespace: Option<&str>,
        action: KubectlAction,
        args: &[&str],
        waiter: &Waiter,
    ) -> Result<()> {
        let mut full = vec![action.verb().to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        self.retry(namespace, action, &full, None, &args.join(" "), waiter).await
    }

    async fn retry(
        &self,
        namespace: Option<&str>,
        action: KubectlAction,
        args: &[String],
        stdin: Option<&str>,
        target: &str,
        waiter: &Waiter,
    ) -> Result<()> {
        let resource = ResourceRef {
            kind: "kubectl".to_string(),
            namespace: namespace.map(str::to_string),
            name: target.to_string(),
        };
        let line = self.command_line(namespace, args);
        let line = line.as_slice();
        let runner = self.runner.as_ref();

        waiter
            .until(action.verb(), &resource, move || async move {
                let output = match runner.run(KUBECTL, line, stdin).await {
                    Ok(o) => o,
                    Err(err) => return ConditionResult::Fatal(err),
                };
                if output.success {
                    return ConditionResult::Satisfied;
                }

                let text = output.combined();
                match classify_output(&text, action) {
                    CliVerdict::Success => {
                        debug!("kubectl {} {}: goal already reached", action, target);
                        ConditionResult::Satisfied
                    }
                    CliVerdict::Retry => {
                        warn!("kubectl {} {} failed, will retry: {}", action, target, text.trim());
                        ConditionResult::Pending
                    }
                    CliVerdict::Fatal => ConditionResult::Fatal(Error::CommandFailed {
                        command: format!("{} {}", KUBECTL, line.join(" ")),
                        output: text,
                    }),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeRunner;
    use crate::lifecycle::testing::waiter;
    use assert_matches::assert_matches;

    fn kubectl(runner: &Arc<FakeRunner>) -> Kubectl {
        Kubectl::new(runner.clone(), Some(PathBuf::from("/tmp/kubeconfig")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_input_retries_transient_output() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "create -f -",
            vec![
                CommandOutput::failed(1, "Unable to connect to the server: dial tcp 10.0.0.1:6443: i/o timeout"),
                CommandOutput::ok("namespace/elastic-system created"),
            ],
        );

        kubectl(&runner)
            .retry_input(Some("es-1"), KubectlAction::Create, "kind: Namespace", &waiter(30))
            .await
            .unwrap();

        let calls = runner.invocations();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].line, "kubectl --kubeconfig=/tmp/kubeconfig --namespace=es-1 create -f -");
        assert_eq!(calls[0].stdin.as_deref(), Some("kind: Namespace"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_not_found_counts_as_done() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "delete -f manifest/eck/operator.yaml",
            vec![CommandOutput::failed(1, r#"Error from server (NotFound): namespaces "elastic-system" not found"#)],
        );

        let file = PathBuf::from("manifest/eck/operator.yaml");
        kubectl(&runner)
            .retry_files(None, KubectlAction::Delete, &[file.as_path()], &waiter(30))
            .await
            .unwrap();
        assert_eq!(runner.count("delete"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_manifest_is_fatal() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("create", vec![CommandOutput::failed(1, "error: error validating data: unknown field")]);

        let err = kubectl(&runner)
            .retry_args(Some("es-1"), KubectlAction::Create, &["secret", "generic", "creds"], &waiter(30))
            .await
            .unwrap_err();
        assert_matches!(err.root(), Error::CommandFailed { .. });
        assert_eq!(runner.count("create"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_returns_stdout() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("exec csi-rbd-demo-pod", vec![CommandOutput::ok("2048\n")]);

        let out = Kubectl::new(runner.clone(), None)
            .exec("rbd-1", "csi-rbd-demo-pod", Some("web-server"), "stat -f -c '%b' /var/lib/www/html")
            .await
            .unwrap();
        assert_eq!(out.trim(), "2048");
        assert_eq!(
            runner.invocations()[0].line,
            "kubectl --namespace=rbd-1 exec csi-rbd-demo-pod --container=web-server -- sh -c stat -f -c '%b' /var/lib/www/html"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_failure() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("exec", vec![CommandOutput::failed(1, "fdisk: cannot open /dev/rbdblock")]);

        let err = Kubectl::new(runner.clone(), None)
            .exec("rbd-1", "pod", None, "fdisk -l /dev/rbdblock")
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandFailed { ref output, .. } if output.contains("cannot open"));
    }
}
