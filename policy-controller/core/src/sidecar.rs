use timesync_policy_controller_k8s_api::{policy::TimeSyncPolicy, Container, Pod, ResourceExt};

/// The reserved name of the injected container.
pub const CONTAINER_NAME: &str = "timesync";

/// Records the name of the policy that injected the sidecar.
pub const POLICY_ANNOTATION: &str = "sync.example.com/timesync-policy";

/// Records the sidecar image at injection time.
pub const IMAGE_ANNOTATION: &str = "sync.example.com/timesync-image";

const ARGS: [&str; 2] = ["sleep", "infinity"];

/// Identifies the policy and image that produced a pod's sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    pub policy: String,
    pub image: String,
}

pub fn container(image: impl Into<String>) -> Container {
    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.into()),
        args: Some(ARGS.iter().map(|arg| arg.to_string()).collect()),
        ..Default::default()
    }
}

pub fn has_container(pod: &Pod) -> bool {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .any(|c| c.name == CONTAINER_NAME)
}

/// Returns true if the pod already carries a sidecar, either by container name
/// or by injection marker.
pub fn is_injected(pod: &Pod) -> bool {
    has_container(pod) || Marker::from_pod(pod).is_some()
}

/// Appends the sidecar for `policy` to the pod's containers and records the
/// marker annotations. Existing containers are left untouched.
pub fn inject(pod: &mut Pod, policy: &TimeSyncPolicy) {
    let image = policy.spec.image.clone();

    pod.spec
        .get_or_insert_with(Default::default)
        .containers
        .push(container(image.clone()));

    let annotations = pod.metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(POLICY_ANNOTATION.to_string(), policy.name_any());
    annotations.insert(IMAGE_ANNOTATION.to_string(), image);
}

// === impl Marker ===

impl Marker {
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let annotations = pod.metadata.annotations.as_ref()?;
        let policy = annotations.get(POLICY_ANNOTATION)?.clone();
        let image = annotations.get(IMAGE_ANNOTATION).cloned().unwrap_or_default();
        Some(Self { policy, image })
    }
}
