use crate::{
    admission::Admission,
    controller::{self, Context},
    inject::Injector,
    k8s,
    lease,
    metrics::{AdmissionMetrics, ReconcileMetrics},
    reconcile::Reconciler,
    store::KubeStore,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "timesync", about = "A timesync policy controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "timesync=info,warn",
        env = "TIMESYNC_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Namespace of the Lease that elects the status writer.
    #[clap(long, default_value = "timesync-system")]
    controller_namespace: String,

    #[clap(long, default_value = "timesync-policy-controller")]
    controller_deployment_name: String,

    /// Identifies this replica when claiming the Lease.
    #[clap(long, env = "HOSTNAME")]
    hostname: String,

    /// Delay before a failed reconciliation is retried.
    #[clap(long, default_value = "5000")]
    reconcile_error_backoff_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            controller_namespace,
            controller_deployment_name,
            hostname,
            reconcile_error_backoff_ms,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let timesync = prom.sub_registry_with_prefix("timesync");
        let reconcile_metrics = ReconcileMetrics::register(timesync);
        let admission_metrics = AdmissionMetrics::register(timesync);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        let store = Arc::new(KubeStore::new(runtime.client()));
        let ctx = Context::new(
            Reconciler::new(store.clone(), reconcile_metrics),
            Duration::from_millis(reconcile_error_backoff_ms),
        );
        tokio::spawn(
            lead(runtime.client(), ctx, claims, hostname).instrument(info_span!("controller")),
        );

        let runtime = runtime.spawn_server(move || {
            Admission::new(Injector::new(store.clone(), admission_metrics.clone()))
        });

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Runs the policy controller whenever this replica holds the write lease.
async fn lead(
    client: k8s::Client,
    ctx: Arc<Context<Arc<KubeStore>>>,
    mut claims: lease::Claims,
    hostname: String,
) {
    loop {
        if let Err(error) = lease::acquired(&mut claims, &hostname).await {
            warn!(%error, "Stopped waiting for the write lease");
            return;
        }
        info!("Acquired write lease");

        tokio::select! {
            _ = controller::run(client.clone(), ctx.clone()) => {
                warn!("Policy controller exited while holding the write lease");
                return;
            }
            res = lease::lost(&mut claims, &hostname) => {
                if let Err(error) = res {
                    warn!(%error, "Stopped watching the write lease");
                    return;
                }
                info!("Lost write lease");
            }
        }
    }
}
