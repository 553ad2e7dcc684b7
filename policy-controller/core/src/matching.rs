use timesync_policy_controller_k8s_api::{
    labels::{Labels, ParseError},
    policy::TimeSyncPolicy,
    Namespace, ResourceExt,
};
use tracing::debug;

pub fn namespace_labels(ns: &Namespace) -> Labels {
    Labels::from(ns.labels().clone())
}

/// Counts the namespaces selected by `policy`.
///
/// Fails without inspecting any namespace when the policy's selector cannot be
/// parsed.
pub fn count_matching_namespaces<'n>(
    policy: &TimeSyncPolicy,
    namespaces: impl IntoIterator<Item = &'n Namespace>,
) -> Result<usize, ParseError> {
    let selector = policy.spec.selector()?;
    Ok(namespaces
        .into_iter()
        .filter(|ns| selector.matches(&namespace_labels(ns)))
        .count())
}

/// Returns the policies, enabled or not, whose selector matches `labels`, in
/// the order they are supplied.
///
/// Policies with a malformed selector are skipped.
pub fn selecting_policies<'p>(
    policies: impl IntoIterator<Item = &'p TimeSyncPolicy>,
    labels: &Labels,
) -> Vec<&'p TimeSyncPolicy> {
    policies
        .into_iter()
        .filter(|policy| selects(policy, labels))
        .collect()
}

/// Returns the enabled policies whose selector matches `labels`, in the order
/// they are supplied.
pub fn enabled_matches<'p>(
    policies: impl IntoIterator<Item = &'p TimeSyncPolicy>,
    labels: &Labels,
) -> Vec<&'p TimeSyncPolicy> {
    policies
        .into_iter()
        .filter(|policy| policy.spec.enable && selects(policy, labels))
        .collect()
}

pub fn find_first_enabled_match<'p>(
    policies: impl IntoIterator<Item = &'p TimeSyncPolicy>,
    labels: &Labels,
) -> Option<&'p TimeSyncPolicy> {
    policies
        .into_iter()
        .find(|policy| policy.spec.enable && selects(policy, labels))
}

fn selects(policy: &TimeSyncPolicy, labels: &Labels) -> bool {
    match policy.spec.selects(labels) {
        Ok(selected) => selected,
        Err(error) => {
            debug!(
                policy = %policy.name_any(),
                %error,
                "Skipping policy with invalid namespace selector"
            );
            false
        }
    }
}
