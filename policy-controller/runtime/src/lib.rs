#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use timesync_policy_controller_core as core;
pub use timesync_policy_controller_k8s_api as k8s;

mod admission;
mod args;
pub mod controller;
pub mod inject;
mod lease;
pub mod metrics;
pub mod reconcile;
mod store;


pub use self::{
    admission::Admission,
    args::Args,
    inject::{Decision, Injector},
    reconcile::{Outcome, Reconciler},
    store::KubeStore,
};
