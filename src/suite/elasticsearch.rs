//! ElasticSearch application suite
//!
//! Installs the ECK operator, runs a sample cluster on RBD volumes of the
//! default RBD class in the case namespace and queries it through its node
//! port.

use super::{Case, Context, Framework, Suite};
use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::{Error, Result};
use crate::lifecycle::{await_removal, pod_phase, wait_for_pod_running, ClassOptions};
use crate::manifest::read_with_namespace;
use crate::poll::{condition_for, ConditionResult, Intent, KubectlAction};
use futures::future::{FutureExt, LocalBoxFuture};
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const CRDS: &str = "eck/crds.yaml";
const OPERATOR: &str = "eck/operator.yaml";
const ELASTICSEARCH: &str = "eck/elasticsearch.yaml";

pub const OPERATOR_NAMESPACE: &str = "elastic-system";
pub const OPERATOR_POD: &str = "elastic-operator-0";

const CLUSTER_NAME: &str = "elasticsearch-sample";
const USER_SECRET: &str = "elasticsearch-sample-es-elastic-user";
const HTTP_SERVICE: &str = "elasticsearch-sample-es-http";
const USER: &str = "elastic";

/// Present in the root endpoint response of every ElasticSearch node
pub const BANNER: &str = "You Know, for Search";

pub fn suite() -> Suite<Framework> {
    Suite::new("ElasticSearch", "es").context(
        Context::new("app")
            .before_each(install)
            .after_each(uninstall)
            .case(Case::run(
                "should be able to run ElasticSearch using ceph rbd plugin",
                &["es"],
                query_cluster,
            )),
    )
}

// =============================================================================
// Object Inspection
// =============================================================================

/// At least one pod, all of them Running
pub fn all_running(pods: &[Pod]) -> bool {
    !pods.is_empty() && pods.iter().all(|p| pod_phase(p) == Some("Running"))
}

pub fn elastic_password(secret: &Secret) -> Result<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(USER))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
        .ok_or_else(|| Error::Validation(format!("secret {} has no {:?} key", USER_SECRET, USER)))
}

pub fn http_node_port(service: &Service) -> Result<i32> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|p| p.node_port)
        .ok_or_else(|| Error::Validation(format!("service {} exposes no node port", HTTP_SERVICE)))
}

pub fn host_ip(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.host_ip.as_deref()
}

pub fn endpoint_url(host: &str, node_port: i32) -> String {
    format!("https://{}:{}", host, node_port)
}

// =============================================================================
// Hooks
// =============================================================================

fn install(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let crds = f.manifest(CRDS);
        let operator = f.manifest(OPERATOR);
        let elasticsearch = read_with_namespace(&f.manifest(ELASTICSEARCH), &f.namespace)?;

        f.create_rbd_storage_class(&ClassOptions::default(), &BTreeMap::new())
            .await?;
        f.kubectl
            .retry_files(None, KubectlAction::Create, &[crds.as_path(), operator.as_path()], &f.waiter)
            .await?;
        info!("Waiting for the ECK operator");
        wait_for_pod_running(&f.pods_in(OPERATOR_NAMESPACE), OPERATOR_NAMESPACE, OPERATOR_POD, &f.waiter).await?;

        f.kubectl
            .retry_input(Some(&f.namespace), KubectlAction::Create, &elasticsearch, &f.waiter)
            .await?;
        info!("Waiting for {} pods in {}", CLUSTER_NAME, f.namespace);
        wait_for_cluster_pods(&f.pods(), &f.namespace, f).await
    }
    .boxed_local()
}

async fn wait_for_cluster_pods(pods: &dyn ResourceApi<Pod>, namespace: &str, f: &Framework) -> Result<()> {
    let resource = ResourceRef::namespaced("Elasticsearch", namespace, CLUSTER_NAME);
    f.waiter
        .until("rollout", &resource, move || async move {
            match pods.list(None).await {
                Ok(list) if all_running(&list) => ConditionResult::Satisfied,
                Ok(list) => {
                    debug!("{} of {} pods running", list.iter().filter(|p| pod_phase(p) == Some("Running")).count(), list.len());
                    ConditionResult::Pending
                }
                Err(err) => condition_for(err, Intent::Observe),
            }
        })
        .await
}

/// Only a failure to delete the storage class is returned; the rest is
/// logged
fn uninstall(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let crds = f.manifest(CRDS);
        let operator = f.manifest(OPERATOR);
        let elasticsearch = read_with_namespace(&f.manifest(ELASTICSEARCH), &f.namespace)?;

        if let Err(err) = f
            .kubectl
            .retry_input(Some(&f.namespace), KubectlAction::Delete, &elasticsearch, &f.waiter)
            .await
        {
            warn!("Failed to delete {}: {}", CLUSTER_NAME, err);
        }
        if let Err(err) = wait_for_no_pods(&f.pods(), &f.namespace, f).await {
            warn!("{} pods still present: {}", CLUSTER_NAME, err);
        }

        if let Err(err) = f
            .kubectl
            .retry_files(None, KubectlAction::Delete, &[operator.as_path(), crds.as_path()], &f.waiter)
            .await
        {
            warn!("Failed to delete the ECK operator: {}", err);
        }
        let operator_ns = ResourceRef::cluster("Namespace", OPERATOR_NAMESPACE);
        if let Err(err) = await_removal(&f.namespaces(), &operator_ns, &f.waiter).await {
            warn!("{} not removed: {}", operator_ns, err);
        }
        f.delete_storage_class(&f.config.rbd.storage_class).await
    }
    .boxed_local()
}

async fn wait_for_no_pods(pods: &dyn ResourceApi<Pod>, namespace: &str, f: &Framework) -> Result<()> {
    let resource = ResourceRef::namespaced("Elasticsearch", namespace, CLUSTER_NAME);
    f.waiter
        .until("removal", &resource, move || async move {
            match pods.list(None).await {
                Ok(list) if list.is_empty() => ConditionResult::Satisfied,
                Ok(list) => {
                    debug!("{} pod(s) left in {}", list.len(), namespace);
                    ConditionResult::Pending
                }
                Err(err) => condition_for(err, Intent::Observe),
            }
        })
        .await
}

// =============================================================================
// Case
// =============================================================================

fn query_cluster(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let secret: Secret = f.secrets().get(USER_SECRET).await?;
        let password = elastic_password(&secret)?;
        let service: Service = f.services().get(HTTP_SERVICE).await?;
        let node_port = http_node_port(&service)?;

        let pods = ResourceApi::list(&f.pods(), None).await?;
        let host = pods
            .first()
            .and_then(host_ip)
            .ok_or_else(|| Error::Validation(format!("no {} pod with a host IP in {}", CLUSTER_NAME, f.namespace)))?;
        let url = endpoint_url(host, node_port);
        info!("Querying {}", url);

        let args = vec!["-u".to_string(), format!("{}:{}", USER, password), "-k".to_string(), url.clone()];
        let args = &args;
        let resource = ResourceRef::namespaced("Service", &f.namespace, HTTP_SERVICE);
        f.waiter
            .until("query", &resource, move || async move {
                match f.runner.run("curl", args, None).await {
                    Ok(out) if out.success && out.stdout.contains(BANNER) => ConditionResult::Satisfied,
                    Ok(out) => {
                        debug!("Endpoint not answering yet: {}", out.combined().trim());
                        ConditionResult::Pending
                    }
                    Err(err) => ConditionResult::Fatal(err),
                }
            })
            .await
    }
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::{PodStatus, ServicePort, ServiceSpec};
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn pod(phase: &str, host: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                host_ip: host.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_all_running_needs_pods() {
        assert!(!all_running(&[]));
        assert!(!all_running(&[pod("Running", None), pod("Pending", None)]));
        assert!(all_running(&[pod("Running", None), pod("Running", None)]));
    }

    #[test]
    fn test_password_from_secret() {
        let secret = Secret {
            data: Some(BTreeMap::from([(USER.to_string(), ByteString(b"s3cret".to_vec()))])),
            ..Default::default()
        };
        assert_eq!(elastic_password(&secret).unwrap(), "s3cret");
        assert_matches!(elastic_password(&Secret::default()), Err(Error::Validation(_)));
    }

    #[test]
    fn test_endpoint_from_service_and_pod() {
        let service = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 9200,
                    node_port: Some(30920),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let port = http_node_port(&service).unwrap();
        let member = pod("Running", Some("192.168.39.10"));

        assert_eq!(endpoint_url(host_ip(&member).unwrap(), port), "https://192.168.39.10:30920");
        assert_matches!(http_node_port(&Service::default()), Err(Error::Validation(_)));
    }

    #[test]
    fn test_cluster_manifest_targets_case_namespace() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("manifest")
            .join(ELASTICSEARCH);
        let text = read_with_namespace(&path, "es-0a1b2c3d").unwrap();
        assert!(text.contains("namespace: es-0a1b2c3d"));
        assert!(!text.contains("namespace: default"));
        assert!(text.contains(CLUSTER_NAME));
    }
}
