use crate::{
    core::{ClusterStore, StoreError, POLICY_CONTROLLER_NAME},
    k8s::{
        self,
        policy::{TimeSyncPolicy, TimeSyncPolicyStatus},
        Namespace, Resource, ResourceExt,
    },
};
use async_trait::async_trait;

/// A [`ClusterStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: k8s::Client,
}

impl KubeStore {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }

    fn policies(&self) -> k8s::Api<TimeSyncPolicy> {
        k8s::Api::all(self.client.clone())
    }

    fn namespaces(&self) -> k8s::Api<Namespace> {
        k8s::Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_policy(&self, name: &str) -> Result<Option<TimeSyncPolicy>, StoreError> {
        self.policies()
            .get_opt(name)
            .await
            .map_err(|error| StoreError::Read(error.into()))
    }

    async fn list_policies(&self) -> Result<Vec<TimeSyncPolicy>, StoreError> {
        let list = self
            .policies()
            .list(&k8s::ListParams::default())
            .await
            .map_err(|error| StoreError::Read(error.into()))?;
        Ok(list.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, StoreError> {
        self.namespaces()
            .get_opt(name)
            .await
            .map_err(|error| StoreError::Read(error.into()))
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        let list = self
            .namespaces()
            .list(&k8s::ListParams::default())
            .await
            .map_err(|error| StoreError::Read(error.into()))?;
        Ok(list.items)
    }

    async fn update_status(
        &self,
        policy: &TimeSyncPolicy,
        status: TimeSyncPolicyStatus,
    ) -> Result<(), StoreError> {
        let name = policy.name_any();
        let patch = make_patch(policy, status);
        let params = k8s::PatchParams {
            field_manager: Some(POLICY_CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        match self.policies().patch_status(&name, &params, &patch).await {
            Ok(_) => Ok(()),
            Err(k8s::Error::Api(rsp)) if rsp.code == 409 => {
                Err(StoreError::Conflict(k8s::Error::Api(rsp).into()))
            }
            Err(error) => Err(StoreError::Write(error.into())),
        }
    }
}

/// Builds a status merge patch that only applies if the policy has not been
/// modified since it was read.
pub(crate) fn make_patch(
    policy: &TimeSyncPolicy,
    status: TimeSyncPolicyStatus,
) -> k8s::Patch<serde_json::Value> {
    let value = serde_json::json!({
        "apiVersion": TimeSyncPolicy::api_version(&()),
        "kind": TimeSyncPolicy::kind(&()),
        "metadata": {
            "name": policy.name_any(),
            "resourceVersion": policy.resource_version(),
        },
        "status": status,
    });
    k8s::Patch::Merge(value)
}
