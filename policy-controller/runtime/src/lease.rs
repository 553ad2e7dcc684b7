use crate::{
    core::POLICY_CONTROLLER_NAME,
    k8s::{self, Deployment, Lease, ObjectMeta, OwnerReference, Resource, ResourceExt},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const LEASE_NAME: &str = "timesync-policy-controller-write";
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

pub type Claims = watch::Receiver<Arc<kubert::lease::Claim>>;

/// Ensures the write Lease exists and spawns a task that competes for it.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    deployment_name: &str,
    hostname: &str,
) -> Result<Claims> {
    let deployment = k8s::Api::<Deployment>::namespaced(runtime.client(), ns)
        .get(deployment_name)
        .await
        .with_context(|| format!("failed to get deployment {ns}/{deployment_name}"))?;
    let owner = deployment
        .controller_owner_ref(&())
        .context("deployment has no name or uid")?;

    let api = k8s::Api::<Lease>::namespaced(runtime.client(), ns);
    let params = k8s::PatchParams {
        field_manager: Some(POLICY_CONTROLLER_NAME.to_string()),
        ..Default::default()
    };
    match api
        .patch(
            LEASE_NAME,
            &params,
            &k8s::Patch::Apply(mk_lease(ns, deployment_name, owner)),
        )
        .await
    {
        Ok(lease) => tracing::info!(lease = %lease.name_any(), "Created write lease"),
        Err(k8s::Error::Api(error)) => {
            tracing::debug!(%error, "Write lease already exists");
        }
        Err(error) => return Err(error.into()),
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, LEASE_NAME)
        .await?
        .spawn(hostname, params)
        .await?;
    Ok(claims)
}

/// The write Lease, owned by the controller's deployment so that it is garbage
/// collected with it.
fn mk_lease(ns: &str, deployment_name: &str, owner: OwnerReference) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(ns.to_string()),
            // Create-only: the apply is rejected if the Lease already exists.
            resource_version: Some("0".to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(
                [(
                    "app.kubernetes.io/name".to_string(),
                    deployment_name.to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    }
}

/// Waits until `hostname` holds the lease.
pub async fn acquired(claims: &mut Claims, hostname: &str) -> Result<()> {
    claims
        .wait_for(|claim| claim.is_current_for(hostname))
        .await
        .context("lease manager terminated")?;
    Ok(())
}

/// Waits until `hostname` no longer holds the lease.
pub async fn lost(claims: &mut Claims, hostname: &str) -> Result<()> {
    claims
        .wait_for(|claim| !claim.is_current_for(hostname))
        .await
        .context("lease manager terminated")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use maplit::btreemap;

    fn mk_claim(holder: &str) -> Arc<kubert::lease::Claim> {
        Arc::new(kubert::lease::Claim {
            holder: holder.to_string(),
            expiry: DateTime::<Utc>::MAX_UTC,
        })
    }

    #[test]
    fn lease_is_create_only_and_owned_by_deployment() {
        let owner = OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "timesync-controller".to_string(),
            uid: "3f1e2d6c-9a57-4b8e-8f0b-0e7d5c4a2b19".to_string(),
            controller: Some(true),
            ..Default::default()
        };
        let lease = mk_lease("timesync", "timesync-controller", owner.clone());

        assert_eq!(lease.name_any(), LEASE_NAME);
        assert_eq!(lease.namespace().as_deref(), Some("timesync"));
        assert_eq!(lease.resource_version().as_deref(), Some("0"));
        assert_eq!(lease.owner_references(), &[owner]);
        assert_eq!(
            lease.labels(),
            &btreemap! {
                "app.kubernetes.io/name".to_string() => "timesync-controller".to_string(),
            }
        );
        assert!(lease.spec.is_none());
    }

    #[tokio::test]
    async fn waits_for_claim_changes() {
        let (tx, mut claims) = watch::channel(mk_claim("other"));

        let handover = tokio::spawn(async move {
            tx.send(mk_claim("self")).expect("claims must be observed");
            tx
        });
        acquired(&mut claims, "self")
            .await
            .expect("claim must be acquired");
        let tx = handover.await.expect("task must not panic");

        tx.send(mk_claim("other")).expect("claims must be observed");
        lost(&mut claims, "self").await.expect("claim must be lost");
    }

    #[tokio::test]
    async fn fails_when_lease_manager_terminates() {
        let (tx, mut claims) = watch::channel(mk_claim("other"));
        drop(tx);
        assert!(acquired(&mut claims, "self").await.is_err());

        let (tx, mut claims) = watch::channel(mk_claim("self"));
        drop(tx);
        assert!(lost(&mut claims, "self").await.is_err());
    }
}
