//! Lifecycle orchestrators
//!
//! Each orchestrator submits a request through a `ResourceApi` and then
//! polls until the cluster reports the requested state, using a `Waiter`
//! so that every failure names the operation and the object.
//!
//! - namespace: privileged per-case namespaces
//! - storage_class: RBD and CephFS classes
//! - pvc: claim binding, expansion and removal
//! - pod: application pods and exec
//! - snapshot: VolumeSnapshot and VolumeSnapshotClass
//! - statefulset: replica readiness
//! - kubectl: retried kubectl invocations

pub mod kubectl;
pub mod namespace;
pub mod pod;
pub mod pvc;
pub mod snapshot;
pub mod statefulset;
pub mod storage_class;

pub use kubectl::*;
pub use namespace::*;
pub use pod::*;
pub use pvc::*;
pub use snapshot::*;
pub use statefulset::*;
pub use storage_class::*;

use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::Result;
use crate::poll::{condition_for, ConditionResult, Intent, Waiter};
use tracing::{debug, info};

/// Submit `obj`, tolerating AlreadyExists.
///
/// Returns the object the server accepted, or `None` when it already
/// existed or the wait was skipped.
pub async fn create_object<K>(
    api: &dyn ResourceApi<K>,
    obj: &K,
    resource: &ResourceRef,
    waiter: &Waiter,
) -> Result<Option<K>> {
    info!("Creating {}", resource);
    waiter
        .submit("create", resource, Intent::Create, || api.create(obj))
        .await
}

/// Request deletion, tolerating NotFound.
///
/// Returns `false` when the object was already gone.
pub async fn delete_object<K>(api: &dyn ResourceApi<K>, resource: &ResourceRef, waiter: &Waiter) -> Result<bool> {
    info!("Deleting {}", resource);
    let accepted = waiter
        .submit("delete", resource, Intent::Delete, || api.delete(&resource.name))
        .await?;
    Ok(accepted.is_some())
}

/// Poll until a get of the object returns NotFound
pub async fn await_removal<K>(api: &dyn ResourceApi<K>, resource: &ResourceRef, waiter: &Waiter) -> Result<()> {
    waiter
        .until("removal", resource, move || async move {
            match api.get(&resource.name).await {
                Ok(_) => {
                    debug!("{} still present", resource);
                    ConditionResult::Pending
                }
                Err(err) => condition_for(err, Intent::Delete),
            }
        })
        .await
}

/// Poll until a get of the object succeeds
pub async fn await_presence<K>(api: &dyn ResourceApi<K>, resource: &ResourceRef, waiter: &Waiter) -> Result<()> {
    waiter
        .until("creation", resource, move || async move {
            match api.get(&resource.name).await {
                Ok(_) => ConditionResult::Satisfied,
                Err(err) => {
                    debug!("{} not visible yet: {}", resource, err);
                    condition_for(err, Intent::Create)
                }
            }
        })
        .await
}

pub async fn delete_and_await_removal<K>(
    api: &dyn ResourceApi<K>,
    resource: &ResourceRef,
    waiter: &Waiter,
) -> Result<()> {
    if !delete_object(api, resource, waiter).await? {
        debug!("{} already gone", resource);
        return Ok(());
    }
    await_removal(api, resource, waiter).await
}
