use crate::{
    core::{
        enabled_matches, find_first_enabled_match, namespace_labels,
        sidecar::{self, Marker},
        ClusterStore,
    },
    k8s::{policy::TimeSyncPolicy, Pod, ResourceExt},
    metrics::AdmissionMetrics,
};
use tracing::{debug, info, warn};

/// Decides whether admitted pods receive a timesync sidecar.
///
/// Injection is fail-open: when the cluster state needed to decide cannot be
/// read, the pod is admitted without a sidecar.
#[derive(Clone, Debug)]
pub struct Injector<S> {
    store: S,
    metrics: AdmissionMetrics,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// The pod already has a sidecar.
    AlreadyInjected,

    /// The pod's namespace could not be read.
    NamespaceUnavailable,

    /// Policies could not be listed.
    PoliciesUnavailable,

    /// No enabled policy selects the pod's namespace.
    NoMatch,

    Inject(TimeSyncPolicy),
}

// === impl Injector ===

impl<S: ClusterStore> Injector<S> {
    pub fn new(store: S, metrics: AdmissionMetrics) -> Self {
        Self { store, metrics }
    }

    /// Decides how `pod` should be mutated without modifying it.
    pub async fn decide(&self, pod: &Pod) -> Decision {
        if sidecar::is_injected(pod) {
            debug!(marker = ?Marker::from_pod(pod), "Sidecar already present");
            return Decision::AlreadyInjected;
        }

        let Some(namespace) = pod.namespace() else {
            warn!("Pod has no namespace");
            return Decision::NamespaceUnavailable;
        };
        let ns = match self.store.get_namespace(&namespace).await {
            Ok(Some(ns)) => ns,
            Ok(None) => {
                warn!(%namespace, "Namespace not found");
                return Decision::NamespaceUnavailable;
            }
            Err(error) => {
                warn!(%namespace, %error, "Failed to get namespace");
                return Decision::NamespaceUnavailable;
            }
        };

        let mut policies = match self.store.list_policies().await {
            Ok(policies) => policies,
            Err(error) => {
                warn!(%namespace, %error, "Failed to list policies");
                return Decision::PoliciesUnavailable;
            }
        };
        // Listing order is unspecified, so ties are broken by name.
        policies.sort_by_key(|policy| policy.name_any());

        let labels = namespace_labels(&ns);
        let Some(policy) = find_first_enabled_match(&policies, &labels) else {
            debug!(%namespace, "No enabled policy selects namespace");
            return Decision::NoMatch;
        };
        let matches = enabled_matches(&policies, &labels);
        if matches.len() > 1 {
            let names = matches.iter().map(|p| p.name_any()).collect::<Vec<_>>();
            warn!(
                %namespace,
                policies = ?names,
                selected = %policy.name_any(),
                "Multiple enabled policies select namespace"
            );
        }

        Decision::Inject(policy.clone())
    }

    /// Returns the pod with a sidecar appended if an enabled policy selects its
    /// namespace; otherwise the pod is returned unmodified.
    pub async fn mutate_pod(&self, mut pod: Pod) -> Pod {
        let decision = self.decide(&pod).await;
        self.metrics.decision(decision.as_str());
        if let Decision::Inject(policy) = decision {
            info!(
                namespace = %pod.namespace().unwrap_or_default(),
                policy = %policy.name_any(),
                image = %policy.spec.image,
                "Injecting sidecar"
            );
            sidecar::inject(&mut pod, &policy);
        }
        pod
    }
}

// === impl Decision ===

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyInjected => "already_injected",
            Self::NamespaceUnavailable => "namespace_unavailable",
            Self::PoliciesUnavailable => "policies_unavailable",
            Self::NoMatch => "no_match",
            Self::Inject(_) => "injected",
        }
    }
}
