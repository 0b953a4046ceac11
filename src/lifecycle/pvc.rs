//! PersistentVolumeClaim lifecycle
//!
//! A claim is only considered provisioned once it and its volume are both
//! `Bound` and the volume's claimRef points back at the claim.

use super::create_object;
use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::{Error, Result};
use crate::poll::{condition_for, ConditionResult, Intent, Waiter};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::ResourceExt;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Cadence for one-off reads of claims and volumes
pub const GET_RETRY_INTERVAL: Duration = Duration::from_secs(1);

const BOUND: &str = "Bound";
const FILE_SYSTEM_RESIZE_PENDING: &str = "FileSystemResizePending";

// =============================================================================
// Status helpers
// =============================================================================

pub fn claim_phase(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.status.as_ref().and_then(|s| s.phase.as_deref())
}

pub fn volume_phase(volume: &PersistentVolume) -> Option<&str> {
    volume.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Name of the volume the claim is bound to, if any
pub fn bound_volume_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .filter(|v| !v.is_empty())
}

/// Both sides report Bound and the volume's claimRef names the claim
pub fn is_bound_pair(claim: &PersistentVolumeClaim, volume: &PersistentVolume) -> bool {
    if claim_phase(claim) != Some(BOUND) || volume_phase(volume) != Some(BOUND) {
        return false;
    }
    let claim_ref = volume.spec.as_ref().and_then(|s| s.claim_ref.as_ref());
    match claim_ref {
        Some(r) => {
            r.name.as_deref() == claim.metadata.name.as_deref()
                && r.namespace.as_deref() == claim.metadata.namespace.as_deref()
        }
        None => false,
    }
}

/// A filesystem resize is still waiting for the node
pub fn resize_pending(claim: &PersistentVolumeClaim) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == FILE_SYSTEM_RESIZE_PENDING))
        .unwrap_or(false)
}

fn claim_ref(namespace: &str, name: &str) -> ResourceRef {
    ResourceRef::namespaced("PersistentVolumeClaim", namespace, name)
}

// =============================================================================
// Lookups
// =============================================================================

/// Read a claim, retrying transient errors every second
pub async fn get_pvc(
    pvcs: &dyn ResourceApi<PersistentVolumeClaim>,
    namespace: &str,
    name: &str,
    waiter: &Waiter,
) -> Result<PersistentVolumeClaim> {
    let resource = claim_ref(namespace, name);
    waiter
        .with_interval(GET_RETRY_INTERVAL)
        .submit("get", &resource, Intent::Observe, || pvcs.get(name))
        .await?
        .ok_or_else(|| Error::ResourceNotFound {
            kind: resource.kind.clone(),
            name: name.to_string(),
        })
}

/// Read a volume, retrying transient errors every second
pub async fn get_pv(pvs: &dyn ResourceApi<PersistentVolume>, name: &str, waiter: &Waiter) -> Result<PersistentVolume> {
    let resource = ResourceRef::cluster("PersistentVolume", name);
    waiter
        .with_interval(GET_RETRY_INTERVAL)
        .submit("get", &resource, Intent::Observe, || pvs.get(name))
        .await?
        .ok_or_else(|| Error::ResourceNotFound {
            kind: resource.kind.clone(),
            name: name.to_string(),
        })
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Create a claim and wait for it and its volume to be bound to each other
pub async fn create_pvc_and_validate_pv(
    pvcs: &dyn ResourceApi<PersistentVolumeClaim>,
    pvs: &dyn ResourceApi<PersistentVolume>,
    claim: &PersistentVolumeClaim,
    waiter: &Waiter,
) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();
    let name = claim.name_any();
    let resource = claim_ref(&namespace, &name);

    create_object(pvcs, claim, &resource, waiter).await?;
    info!("Waiting for {} to be bound", resource);

    let name = name.as_str();
    waiter
        .until("binding", &resource, move || async move {
            let current = match pvcs.get(name).await {
                Ok(c) => c,
                Err(err) => return condition_for(err, Intent::Create),
            };
            let Some(volume_name) = bound_volume_name(&current) else {
                debug!("Claim {} has no volume yet", name);
                return ConditionResult::Pending;
            };
            let volume = match pvs.get(volume_name).await {
                Ok(v) => v,
                Err(err) => return condition_for(err, Intent::Create),
            };
            if is_bound_pair(&current, &volume) {
                ConditionResult::Satisfied
            } else {
                debug!(
                    "Claim {} is {:?}, volume {} is {:?}",
                    name,
                    claim_phase(&current),
                    volume_name,
                    volume_phase(&volume)
                );
                ConditionResult::Pending
            }
        })
        .await
}

/// Grow a claim to `size` and wait for the resize to finish.
///
/// The first check happens one interval after the patch, giving the
/// resizer a chance to pick the request up.
pub async fn expand_pvc(
    pvcs: &dyn ResourceApi<PersistentVolumeClaim>,
    namespace: &str,
    name: &str,
    size: &str,
    waiter: &Waiter,
) -> Result<()> {
    let resource = claim_ref(namespace, name);
    let patch = json!({ "spec": { "resources": { "requests": { "storage": size } } } });

    info!("Expanding {} to {}", resource, size);
    waiter
        .submit("expand", &resource, Intent::Observe, || pvcs.patch(name, &patch))
        .await?;

    waiter
        .deferred()
        .until("resize", &resource, move || async move {
            let current = match pvcs.get(name).await {
                Ok(c) => c,
                Err(err) => return condition_for(err, Intent::Observe),
            };
            if bound_volume_name(&current).is_none() || claim_phase(&current) != Some(BOUND) {
                return ConditionResult::Pending;
            }
            if resize_pending(&current) {
                debug!("Claim {} waiting for filesystem resize", name);
                return ConditionResult::Pending;
            }
            ConditionResult::Satisfied
        })
        .await
}

/// Delete a claim and wait for both it and its volume to disappear
pub async fn delete_pvc_and_validate_pv(
    pvcs: &dyn ResourceApi<PersistentVolumeClaim>,
    pvs: &dyn ResourceApi<PersistentVolume>,
    namespace: &str,
    name: &str,
    waiter: &Waiter,
) -> Result<()> {
    let resource = claim_ref(namespace, name);
    let claim = get_pvc(pvcs, namespace, name, waiter).await?;
    let volume_name = bound_volume_name(&claim).map(str::to_string);
    if let Some(volume) = &volume_name {
        get_pv(pvs, volume, waiter).await?;
    }

    super::delete_object(pvcs, &resource, waiter).await?;

    let volume_name = volume_name.as_deref();
    waiter
        .until("removal", &resource, move || async move {
            match pvcs.get(name).await {
                Ok(c) => {
                    debug!("Claim {} still present ({:?})", name, claim_phase(&c));
                    return ConditionResult::Pending;
                }
                Err(err) => match condition_for(err, Intent::Delete) {
                    ConditionResult::Satisfied => {}
                    other => return other,
                },
            }
            let Some(volume) = volume_name else {
                return ConditionResult::Satisfied;
            };
            match pvs.get(volume).await {
                Ok(_) => {
                    debug!("Volume {} still present", volume);
                    ConditionResult::Pending
                }
                Err(err) => condition_for(err, Intent::Delete),
            }
        })
        .await
}
