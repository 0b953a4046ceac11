//! In-pod checks
//!
//! Commands run inside application pods to prove a volume is usable.

use crate::error::{Error, Result};
use crate::lifecycle::{exec_in_pod, Kubectl};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::info;

/// Mount path of the volume in every file-mode fixture pod
pub const VOLUME_MOUNT_PATH: &str = "/var/lib/www/html";

/// Device path of the volume in block-mode fixture pods
pub const BLOCK_DEVICE: &str = "/dev/rbdblock";

/// Written by one pod and read back by another
pub const TEST_DATA: &str = "cephfs-test";

pub fn parse_stat_number(what: &str, output: &str) -> Result<u64> {
    output
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("{}: expected a number, got {:?}", what, output.trim())))
}

/// Filesystem size in MiB, rounded down
pub fn size_in_mib(blocks: u64, block_size: u64) -> u64 {
    blocks.saturating_mul(block_size) / 1024 / 1024
}

/// Fail unless the filesystem mounted in the pod holds at least `min_mib`
pub async fn validate_volume_size(kubectl: &Kubectl, pod: &Pod, min_mib: u64) -> Result<()> {
    let blocks = exec_in_pod(kubectl, pod, &format!("stat -f -c '%b' {}", VOLUME_MOUNT_PATH)).await?;
    let blocks = parse_stat_number("total blocks", &blocks)?;
    let block_size = exec_in_pod(kubectl, pod, &format!("stat -f -c '%S' {}", VOLUME_MOUNT_PATH)).await?;
    let block_size = parse_stat_number("block size", &block_size)?;

    let size = size_in_mib(blocks, block_size);
    info!("Volume in {} is {}MiB", pod.name_any(), size);
    if size < min_mib {
        return Err(Error::Validation(format!(
            "volume in {} is {}MiB, expected at least {}MiB",
            pod.name_any(),
            size,
            min_mib
        )));
    }
    Ok(())
}

/// The raw block device is visible to the pod
pub async fn validate_block_device(kubectl: &Kubectl, pod: &Pod) -> Result<()> {
    let out = exec_in_pod(kubectl, pod, &format!("fdisk -l {}", BLOCK_DEVICE)).await?;
    info!("{} sees {}: {}", pod.name_any(), BLOCK_DEVICE, out.trim());
    Ok(())
}

pub async fn write_test_data(kubectl: &Kubectl, pod: &Pod) -> Result<()> {
    let cmd = format!("echo {} | tee {}/test", TEST_DATA, VOLUME_MOUNT_PATH);
    exec_in_pod(kubectl, pod, &cmd).await?;
    Ok(())
}

/// Read the file written by `write_test_data` and compare
pub async fn read_test_data(kubectl: &Kubectl, pod: &Pod) -> Result<()> {
    let out = exec_in_pod(kubectl, pod, &format!("cat {}/test", VOLUME_MOUNT_PATH)).await?;
    if out.trim() != TEST_DATA {
        return Err(Error::Validation(format!(
            "{} read {:?} from the shared volume, expected {:?}",
            pod.name_any(),
            out.trim(),
            TEST_DATA
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeRunner;
    use crate::domain::ports::CommandOutput;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn app_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("csi-rbd-demo-pod".to_string()),
                namespace: Some("rbd-1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web-server".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_stat_number() {
        assert_eq!(parse_stat_number("blocks", "259584\n").unwrap(), 259584);
        assert_matches!(parse_stat_number("blocks", "stat: cannot read"), Err(Error::Validation(_)));
    }

    #[test]
    fn test_size_in_mib() {
        assert_eq!(size_in_mib(259584, 4096), 1014);
        assert_eq!(size_in_mib(0, 4096), 0);
    }

    #[tokio::test]
    async fn test_volume_size_against_minimum() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("%b", vec![CommandOutput::ok("259584\n")]);
        runner.respond("%S", vec![CommandOutput::ok("4096\n")]);
        let kubectl = Kubectl::new(runner.clone(), None);

        validate_volume_size(&kubectl, &app_pod(), 900).await.unwrap();
        let err = validate_volume_size(&kubectl, &app_pod(), 1800).await.unwrap_err();
        assert_matches!(err, Error::Validation(msg) if msg.contains("1014MiB"));

        let first = &runner.invocations()[0];
        assert!(first.line.contains("exec csi-rbd-demo-pod --container=web-server"));
        assert!(first.line.ends_with("stat -f -c '%b' /var/lib/www/html"));
    }

    #[tokio::test]
    async fn test_shared_data_round_trip() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("tee", vec![CommandOutput::ok("cephfs-test\n")]);
        runner.respond("cat", vec![CommandOutput::ok("cephfs-test\n"), CommandOutput::ok("")]);
        let kubectl = Kubectl::new(runner.clone(), None);

        write_test_data(&kubectl, &app_pod()).await.unwrap();
        read_test_data(&kubectl, &app_pod()).await.unwrap();
        assert_matches!(read_test_data(&kubectl, &app_pod()).await, Err(Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_block_device_exec_failure_is_reported() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("fdisk", vec![CommandOutput::failed(1, "fdisk: cannot open /dev/rbdblock")]);
        let kubectl = Kubectl::new(runner.clone(), None);

        let err = validate_block_device(&kubectl, &app_pod()).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { .. });
    }
}
