//! Test namespaces
//!
//! Every case runs in a fresh namespace labelled with the pod security
//! level the CSI node plugins and app pods need.

use super::{await_presence, create_object, delete_and_await_removal};
use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::Result;
use crate::poll::Waiter;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

pub const POD_SECURITY_ENFORCE_LABEL: &str = "pod-security.kubernetes.io/enforce";

/// Namespace object enforcing `security_level`, unlabelled when empty
pub fn namespace_object(name: &str, security_level: &str) -> Namespace {
    let labels = (!security_level.is_empty()).then(|| {
        BTreeMap::from([(POD_SECURITY_ENFORCE_LABEL.to_string(), security_level.to_string())])
    });

    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels,
            ..Default::default()
        },
        ..Default::default()
    }
}

static NAMESPACE_SEQ: AtomicU32 = AtomicU32::new(0);

/// `<base>-<hex>` from the wall clock and a per-process sequence number
pub fn unique_namespace_name(base: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    let seq = NAMESPACE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:06x}{:02x}", base, nanos & 0xff_ffff, seq & 0xff)
}

/// Create the namespace and wait until it can be read back
pub async fn create_namespace(
    api: &dyn ResourceApi<Namespace>,
    name: &str,
    security_level: &str,
    waiter: &Waiter,
) -> Result<()> {
    let resource = ResourceRef::cluster("Namespace", name);
    create_object(api, &namespace_object(name, security_level), &resource, waiter).await?;
    await_presence(api, &resource, waiter).await
}

/// Delete the namespace and wait until it is gone
pub async fn delete_namespace(api: &dyn ResourceApi<Namespace>, name: &str, waiter: &Waiter) -> Result<()> {
    let resource = ResourceRef::cluster("Namespace", name);
    delete_and_await_removal(api, &resource, waiter).await
}
