use crate::labels::{self, Labels};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Selects namespaces whose new pods receive a timesync sidecar.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "sync.example.com",
    version = "v1alpha1",
    kind = "TimeSyncPolicy",
    status = "TimeSyncPolicyStatus",
    shortname = "tsp",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Enabled","type":"boolean","jsonPath":".spec.enable"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Matched","type":"integer","jsonPath":".status.matchedNamespaces"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncPolicySpec {
    /// Selects the namespaces this policy applies to. A selector without
    /// requirements selects every namespace.
    pub namespace_selector: LabelSelector,

    /// Sidecars are only injected while the policy is enabled.
    #[serde(default)]
    pub enable: bool,

    /// Image reference of the injected sidecar container.
    pub image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncPolicyStatus {
    /// The number of namespaces selected by the policy when it was last
    /// reconciled.
    #[serde(default)]
    pub matched_namespaces: u32,
}

// === impl TimeSyncPolicySpec ===

impl TimeSyncPolicySpec {
    pub fn selector(&self) -> Result<labels::Selector, labels::ParseError> {
        labels::Selector::try_from(&self.namespace_selector)
    }

    /// Parses the namespace selector and tests it against `labels`.
    pub fn selects(&self, labels: &Labels) -> Result<bool, labels::ParseError> {
        self.selector().map(|selector| selector.matches(labels))
    }
}

// === impl TimeSyncPolicy ===

impl TimeSyncPolicy {
    /// The match count recorded by the last successful reconciliation, if any.
    pub fn matched_namespaces(&self) -> Option<u32> {
        self.status.as_ref().map(|status| status.matched_namespaces)
    }
}
