#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod matching;
pub mod sidecar;
mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use self::{
    matching::{
        count_matching_namespaces, enabled_matches, find_first_enabled_match, namespace_labels,
        selecting_policies,
    },
    store::{ClusterStore, StoreError},
};

pub const POLICY_CONTROLLER_NAME: &str = "sync.example.com/timesync-policy-controller";
