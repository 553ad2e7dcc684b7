use crate::{
    core::{count_matching_namespaces, ClusterStore, StoreError},
    k8s::policy::TimeSyncPolicyStatus,
    metrics::ReconcileMetrics,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Keeps a policy's `status.matchedNamespaces` in line with the namespaces its
/// selector currently selects.
#[derive(Clone, Debug)]
pub struct Reconciler<S> {
    store: S,
    metrics: ReconcileMetrics,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The policy no longer exists.
    Deleted,

    /// The recorded count was already current; nothing was written.
    Unchanged { matched: u32 },

    Updated { previous: u32, matched: u32 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to get policy {name}: {source}")]
    GetPolicy {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to list namespaces: {0}")]
    ListNamespaces(#[source] StoreError),

    #[error("failed to update status of policy {name}: {source}")]
    UpdateStatus {
        name: String,
        #[source]
        source: StoreError,
    },
}

// === impl Reconciler ===

impl<S: ClusterStore> Reconciler<S> {
    pub fn new(store: S, metrics: ReconcileMetrics) -> Self {
        Self { store, metrics }
    }

    /// Runs a single reconciliation of the named policy.
    ///
    /// Failures are returned to the caller, which owns retries. A status
    /// write that loses an optimistic concurrency race is returned as an
    /// [`Error::UpdateStatus`] wrapping [`StoreError::Conflict`].
    #[instrument(skip_all, fields(policy = %name))]
    pub async fn reconcile(&self, name: &str) -> Result<Outcome, Error> {
        let res = self.reconcile_policy(name).await;
        self.metrics.outcome(match &res {
            Ok(Outcome::Deleted) => "deleted",
            Ok(Outcome::Unchanged { .. }) => "unchanged",
            Ok(Outcome::Updated { .. }) => "updated",
            Err(_) => "error",
        });
        res
    }

    async fn reconcile_policy(&self, name: &str) -> Result<Outcome, Error> {
        let policy = match self.store.get_policy(name).await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                debug!("Policy not found");
                self.metrics.forget(name);
                return Ok(Outcome::Deleted);
            }
            Err(source) => {
                return Err(Error::GetPolicy {
                    name: name.to_string(),
                    source,
                })
            }
        };

        let namespaces = self
            .store
            .list_namespaces()
            .await
            .map_err(Error::ListNamespaces)?;

        let matched = match count_matching_namespaces(&policy, &namespaces) {
            Ok(count) => u32::try_from(count).unwrap_or(u32::MAX),
            Err(error) => {
                warn!(%error, "Invalid namespace selector; the policy selects no namespaces");
                0
            }
        };

        let previous = policy.matched_namespaces().unwrap_or_default();
        if previous == matched {
            debug!(matched, "Status is current");
            self.metrics.matched(name, matched);
            return Ok(Outcome::Unchanged { matched });
        }

        self.store
            .update_status(
                &policy,
                TimeSyncPolicyStatus {
                    matched_namespaces: matched,
                },
            )
            .await
            .map_err(|source| Error::UpdateStatus {
                name: name.to_string(),
                source,
            })?;
        info!(previous, matched, "Updated matched namespaces");
        self.metrics.matched(name, matched);
        Ok(Outcome::Updated { previous, matched })
    }
}

// === impl Error ===

impl Error {
    /// Indicates that the status write raced with another update of the
    /// policy and should be retried from a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::UpdateStatus { source, .. } if source.is_conflict())
    }
}
