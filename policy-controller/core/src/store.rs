use async_trait::async_trait;
use thiserror::Error;
use timesync_policy_controller_k8s_api::{
    policy::{TimeSyncPolicy, TimeSyncPolicyStatus},
    Namespace,
};

/// Reads and writes the cluster objects that policy matching depends on.
///
/// Lookups of a single object return `Ok(None)` when the object does not exist.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_policy(&self, name: &str) -> Result<Option<TimeSyncPolicy>, StoreError>;

    async fn list_policies(&self) -> Result<Vec<TimeSyncPolicy>, StoreError>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, StoreError>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError>;

    /// Replaces the status of `policy`.
    ///
    /// The write is conditional on the policy's resource version, so a write
    /// based on a stale read fails with [`StoreError::Conflict`].
    async fn update_status(
        &self,
        policy: &TimeSyncPolicy,
        status: TimeSyncPolicyStatus,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("read failed: {0}")]
    Read(anyhow::Error),

    #[error("write conflicted with a concurrent update: {0}")]
    Conflict(anyhow::Error),

    #[error("write failed: {0}")]
    Write(anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[async_trait]
impl<S: ClusterStore + ?Sized> ClusterStore for std::sync::Arc<S> {
    async fn get_policy(&self, name: &str) -> Result<Option<TimeSyncPolicy>, StoreError> {
        (**self).get_policy(name).await
    }

    async fn list_policies(&self) -> Result<Vec<TimeSyncPolicy>, StoreError> {
        (**self).list_policies().await
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, StoreError> {
        (**self).get_namespace(name).await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        (**self).list_namespaces().await
    }

    async fn update_status(
        &self,
        policy: &TimeSyncPolicy,
        status: TimeSyncPolicyStatus,
    ) -> Result<(), StoreError> {
        (**self).update_status(policy, status).await
    }
}
