//! YAML fixtures
//!
//! Fixtures are plain upstream Kubernetes YAML. They are parsed into typed
//! objects before being submitted, or fed to kubectl as text after
//! namespace substitution.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Parse a single-document YAML file into `T`
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&text).map_err(|e| Error::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Point every `namespace: default` in a template at `namespace`
pub fn replace_namespace(template: &str, namespace: &str) -> String {
    template.replace("namespace: default", &format!("namespace: {}", namespace))
}

/// Read a template and retarget it at `namespace`
pub fn read_with_namespace(path: &Path, namespace: &str) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(replace_namespace(&text, namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;
    use std::io::Write;

    #[test]
    fn test_load_typed_object() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apiVersion: v1\nkind: PersistentVolumeClaim\nmetadata:\n  name: rbd-pvc\nspec:\n  accessModes: [ReadWriteOnce]\n  resources:\n    requests:\n      storage: 1Gi\n  storageClassName: csi-rbd-sc"
        )
        .unwrap();

        let pvc: PersistentVolumeClaim = load(file.path()).unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("rbd-pvc"));
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("csi-rbd-sc"));
    }

    #[test]
    fn test_load_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        let err = load::<PersistentVolumeClaim>(&missing).unwrap_err();
        assert_matches!(err, Error::Manifest { ref path, .. } if path.ends_with("missing.yaml"));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "metadata: [unclosed").unwrap();
        assert_matches!(load::<PersistentVolumeClaim>(&bad), Err(Error::Manifest { .. }));
    }

    #[test]
    fn test_replace_namespace() {
        let template = "metadata:\n  name: operator\n  namespace: default\n";
        assert_eq!(
            replace_namespace(template, "es-9a1c"),
            "metadata:\n  name: operator\n  namespace: es-9a1c\n"
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("es.yaml");
        std::fs::write(&path, template).unwrap();
        assert!(read_with_namespace(&path, "es-1").unwrap().contains("namespace: es-1"));
    }
}
