//! Builders for policies, namespaces and pods used in tests.

use timesync_policy_controller_k8s_api::{
    policy::{TimeSyncPolicy, TimeSyncPolicySpec},
    Container, LabelSelector, Namespace, ObjectMeta, Pod, PodSpec,
};

pub fn selector_eq(key: &str, value: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(Some((key.to_string(), value.to_string())).into_iter().collect()),
        ..Default::default()
    }
}

pub fn mk_policy(
    name: &str,
    namespace_selector: LabelSelector,
    enable: bool,
    image: &str,
) -> TimeSyncPolicy {
    let mut policy = TimeSyncPolicy::new(
        name,
        TimeSyncPolicySpec {
            namespace_selector,
            enable,
            image: image.to_string(),
        },
    );
    policy.metadata.resource_version = Some("1".to_string());
    policy
}

pub fn mk_namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn mk_pod(ns: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some("pod-0".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
