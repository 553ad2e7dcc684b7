pub mod timesync_policy;

pub use self::timesync_policy::{TimeSyncPolicy, TimeSyncPolicySpec, TimeSyncPolicyStatus};
