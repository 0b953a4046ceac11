//! StatefulSet lifecycle
//!
//! Readiness means the controller reports every replica ready and every
//! pod matching the selector is Running.

use super::{create_object, delete_and_await_removal, pod_phase};
use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::Result;
use crate::poll::{condition_for, ConditionResult, Intent, Waiter};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

/// Desired replicas, 1 when unset
pub fn desired_replicas(set: &StatefulSet) -> i32 {
    set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

pub fn ready_replicas(set: &StatefulSet) -> i32 {
    set.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0)
}

/// `matchLabels` of the selector as a label selector string
pub fn selector_string(set: &StatefulSet) -> Option<String> {
    let labels = set.spec.as_ref()?.selector.match_labels.as_ref()?;
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}

pub async fn wait_for_statefulset_ready(
    sets: &dyn ResourceApi<StatefulSet>,
    pods: &dyn ResourceApi<Pod>,
    namespace: &str,
    name: &str,
    waiter: &Waiter,
) -> Result<()> {
    let resource = ResourceRef::namespaced("StatefulSet", namespace, name);
    waiter
        .until("rollout", &resource, move || async move {
            let set = match sets.get(name).await {
                Ok(s) => s,
                Err(err) => return condition_for(err, Intent::Create),
            };
            let desired = desired_replicas(&set);
            let ready = ready_replicas(&set);
            if ready != desired {
                debug!("StatefulSet {}: {}/{} replicas ready", name, ready, desired);
                return ConditionResult::Pending;
            }

            let selector = selector_string(&set);
            let members = match pods.list(selector.as_deref()).await {
                Ok(p) => p,
                Err(err) => return condition_for(err, Intent::Observe),
            };
            let running = members.iter().filter(|p| pod_phase(p) == Some("Running")).count();
            if members.len() == desired as usize && running == members.len() {
                ConditionResult::Satisfied
            } else {
                debug!("StatefulSet {}: {}/{} pods running", name, running, desired);
                ConditionResult::Pending
            }
        })
        .await
}

pub async fn create_statefulset(
    sets: &dyn ResourceApi<StatefulSet>,
    pods: &dyn ResourceApi<Pod>,
    set: &StatefulSet,
    waiter: &Waiter,
) -> Result<()> {
    let namespace = set.namespace().unwrap_or_default();
    let name = set.name_any();
    let resource = ResourceRef::namespaced("StatefulSet", &namespace, &name);

    create_object(sets, set, &resource, waiter).await?;
    info!("Waiting for {} replicas of {}", desired_replicas(set), resource);
    wait_for_statefulset_ready(sets, pods, &namespace, &name, waiter).await
}

pub async fn delete_statefulset(sets: &dyn ResourceApi<StatefulSet>, namespace: &str, name: &str, waiter: &Waiter) -> Result<()> {
    let resource = ResourceRef::namespaced("StatefulSet", namespace, name);
    delete_and_await_removal(sets, &resource, waiter).await
}
