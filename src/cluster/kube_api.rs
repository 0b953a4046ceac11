//! `kube::Api` as a `ResourceApi`

use crate::domain::ports::ResourceApi;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

#[async_trait]
impl<K> ResourceApi<K> for Api<K>
where
    K: Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn create(&self, obj: &K) -> Result<K, kube::Error> {
        Api::create(self, &PostParams::default(), obj).await
    }

    async fn get(&self, name: &str) -> Result<K, kube::Error> {
        Api::get(self, name).await
    }

    async fn delete(&self, name: &str) -> Result<(), kube::Error> {
        Api::delete(self, name, &DeleteParams::default()).await.map(|_| ())
    }

    async fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<K, kube::Error> {
        Api::patch(self, name, &PatchParams::default(), &Patch::Merge(patch)).await
    }

    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>, kube::Error> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(Api::list(self, &params).await?.items)
    }
}
