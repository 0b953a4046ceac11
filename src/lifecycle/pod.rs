//! Application pods

use super::{create_object, delete_and_await_removal, Kubectl};
use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::{Error, Result};
use crate::poll::{condition_for, ConditionResult, Intent, Waiter};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

const RUNNING: &str = "Running";

pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Phases a pod never leaves
pub fn is_terminal_phase(phase: &str) -> bool {
    matches!(phase, "Succeeded" | "Failed")
}

/// First container of the pod, the one tests exec into
pub fn first_container(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .map(|c| c.name.as_str())
}

/// Poll until the pod reports Running; a terminal phase aborts the wait
pub async fn wait_for_pod_running(
    pods: &dyn ResourceApi<Pod>,
    namespace: &str,
    name: &str,
    waiter: &Waiter,
) -> Result<()> {
    let resource = ResourceRef::namespaced("Pod", namespace, name);
    waiter
        .until("start", &resource, move || async move {
            let pod = match pods.get(name).await {
                Ok(p) => p,
                Err(err) => return condition_for(err, Intent::Create),
            };
            match pod_phase(&pod) {
                Some(RUNNING) => ConditionResult::Satisfied,
                Some(phase) if is_terminal_phase(phase) => {
                    ConditionResult::Fatal(Error::Validation(format!("pod {} ended in phase {}", name, phase)))
                }
                phase => {
                    debug!("Pod {} is {:?}", name, phase);
                    ConditionResult::Pending
                }
            }
        })
        .await
}

/// Create a pod and wait for it to run
pub async fn create_pod(pods: &dyn ResourceApi<Pod>, pod: &Pod, waiter: &Waiter) -> Result<()> {
    let namespace = pod.namespace().unwrap_or_default();
    let name = pod.name_any();
    let resource = ResourceRef::namespaced("Pod", &namespace, &name);

    create_object(pods, pod, &resource, waiter).await?;
    info!("Waiting for {} to run", resource);
    wait_for_pod_running(pods, &namespace, &name, waiter).await
}

pub async fn delete_pod(pods: &dyn ResourceApi<Pod>, namespace: &str, name: &str, waiter: &Waiter) -> Result<()> {
    let resource = ResourceRef::namespaced("Pod", namespace, name);
    delete_and_await_removal(pods, &resource, waiter).await
}

/// Run `command` in the pod's first container
pub async fn exec_in_pod(kubectl: &Kubectl, pod: &Pod, command: &str) -> Result<String> {
    let namespace = pod.namespace().unwrap_or_default();
    kubectl
        .exec(&namespace, &pod.name_any(), first_container(pod), command)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{FakeApi, FakeRunner};
    use crate::domain::ports::CommandOutput;
    use crate::lifecycle::testing::waiter;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("rbd-1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web-server".to_string(),
                    image: Some("nginx".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        }
    }

    fn set_phase(p: &mut Pod, phase: &str) {
        p.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_running() {
        let pods = FakeApi::new();
        let reads = std::sync::atomic::AtomicUsize::new(0);
        pods.on_get(move |p: &mut Pod| {
            let n = reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            set_phase(p, if n < 2 { "Pending" } else { "Running" });
        });

        create_pod(&pods, &pod("csi-rbd-demo-pod"), &waiter(60)).await.unwrap();
        assert_eq!(pods.calls("get"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pod_aborts_wait() {
        let pods = FakeApi::new();
        pods.on_get(|p: &mut Pod| set_phase(p, "Failed"));

        let err = create_pod(&pods, &pod("csi-rbd-demo-pod"), &waiter(60)).await.unwrap_err();
        assert!(err.is_fatal());
        assert_matches!(err.root(), Error::Validation(msg) if msg.contains("Failed"));
        assert_eq!(pods.calls("get"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_pod() {
        let pods = FakeApi::new().with_object(pod("csi-rbd-demo-pod"));
        pods.set_deletion_lag(2);
        delete_pod(&pods, "rbd-1", "csi-rbd-demo-pod", &waiter(60)).await.unwrap();
        assert!(!pods.contains("csi-rbd-demo-pod"));
    }

    #[tokio::test]
    async fn test_exec_targets_first_container() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("exec", vec![CommandOutput::ok("hello")]);
        let kubectl = Kubectl::new(runner.clone(), None);

        let out = exec_in_pod(&kubectl, &pod("csi-rbd-demo-pod"), "cat /mnt/cephfs/test").await.unwrap();
        assert_eq!(out, "hello");
        assert!(runner.invocations()[0].line.contains("--container=web-server"));
    }
}
