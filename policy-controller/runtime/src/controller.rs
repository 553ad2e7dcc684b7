use crate::{
    core::{namespace_labels, selecting_policies, ClusterStore},
    k8s::{self, policy::TimeSyncPolicy, watcher, Namespace, ResourceExt},
    reconcile::{self, Reconciler},
};
use futures::prelude::*;
use kube::runtime::{
    controller::{Action, Controller},
    reflector::ObjectRef,
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// State shared by every reconciliation spawned by the controller.
pub struct Context<S> {
    reconciler: Reconciler<S>,
    error_backoff: Duration,
}

impl<S> Context<S> {
    pub fn new(reconciler: Reconciler<S>, error_backoff: Duration) -> Arc<Self> {
        Arc::new(Self {
            reconciler,
            error_backoff,
        })
    }
}

/// Watches policies and namespaces, reconciling each policy when it changes
/// or when a namespace that it selects changes.
///
/// Completes when the underlying watches terminate.
pub async fn run<S>(client: k8s::Client, ctx: Arc<Context<S>>)
where
    S: ClusterStore + 'static,
{
    let policies = k8s::Api::<TimeSyncPolicy>::all(client.clone());
    let namespaces = k8s::Api::<Namespace>::all(client);

    let controller = Controller::new(policies, watcher::Config::default());
    let store = controller.store();
    controller
        .watches(namespaces, watcher::Config::default(), move |ns| {
            let policies = store.state();
            namespace_policy_refs(policies.iter().map(|p| p.as_ref()), &ns)
        })
        .run(reconcile_policy, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((policy, _)) => debug!(policy = %policy.name, "Reconciled"),
                Err(error) => warn!(%error, "Reconciliation failed"),
            }
        })
        .await;
    info!("Policy controller terminated");
}

/// Lists the policies that select the namespace in its current state.
///
/// Policies with malformed selectors are omitted.
pub fn namespace_policy_refs<'p>(
    policies: impl IntoIterator<Item = &'p TimeSyncPolicy>,
    ns: &Namespace,
) -> Vec<ObjectRef<TimeSyncPolicy>> {
    let labels = namespace_labels(ns);
    let refs = selecting_policies(policies, &labels)
        .into_iter()
        .map(ObjectRef::from_obj)
        .collect::<Vec<_>>();
    debug!(namespace = %ns.name_any(), policies = refs.len(), "Namespace changed");
    refs
}

async fn reconcile_policy<S>(
    policy: Arc<TimeSyncPolicy>,
    ctx: Arc<Context<S>>,
) -> Result<Action, reconcile::Error>
where
    S: ClusterStore,
{
    ctx.reconciler.reconcile(&policy.name_any()).await?;
    Ok(Action::await_change())
}

fn error_policy<S>(
    policy: Arc<TimeSyncPolicy>,
    error: &reconcile::Error,
    ctx: Arc<Context<S>>,
) -> Action {
    if error.is_conflict() {
        debug!(policy = %policy.name_any(), %error, "Status update conflicted");
    } else {
        warn!(policy = %policy.name_any(), %error, "Failed to reconcile policy");
    }
    Action::requeue(ctx.error_backoff)
}
