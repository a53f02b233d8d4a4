//! O2 Operator - keeps OpenObserve objects in sync with Kubernetes custom resources

mod crds;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;

use o2_admission::{serve, webhook_router, WebhookState};
use o2_common::leader_election::{LeaderElector, LEADER_LEASE_NAME};
use o2_common::settings::OperatorSettings;
use o2_common::telemetry::{init_telemetry, TelemetryConfig};
use o2_controller::{build_controllers, warm_index, Context};

/// O2 Operator - CRD-driven management of OpenObserve alerts, pipelines and dashboards
#[derive(Parser, Debug)]
#[command(name = "o2-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Emit logs as JSON
    #[arg(long, env = "O2_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    settings: OperatorSettings,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers and the admission webhook (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crds::render_crds()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.settings).await,
    }
}

async fn run_controller(settings: OperatorSettings) -> anyhow::Result<()> {
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid settings: {}", e))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    crds::ensure_crds(&client).await?;

    let ctx = Arc::new(Context::builder(client.clone(), settings.clone()).build());

    // Every replica answers admission reviews; only the leader reconciles
    let router = webhook_router(Arc::new(WebhookState::new(Arc::clone(&ctx.admission))));
    let webhook = tokio::spawn(serve(
        settings.webhook_addr,
        settings.webhook_cert.clone(),
        settings.webhook_key.clone(),
        router,
    ));

    let mut leadership = if settings.leader_election {
        let identity = settings
            .identity
            .clone()
            .unwrap_or_else(|| format!("o2-operator-{}", std::process::id()));
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &settings.operator_namespace,
            &identity,
        ));
        let guard = elector
            .acquire()
            .await
            .map_err(|e| anyhow::anyhow!("leader election failed: {}", e))?;
        tracing::info!(identity = %identity, "Acquired leadership");
        Some(guard)
    } else {
        tracing::warn!("Leader election disabled; running controllers unconditionally");
        None
    };

    let loaded = warm_index(&ctx)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load resources: {}", e))?;
    tracing::info!(resources = loaded, "Starting controllers");

    let controllers = futures::future::join_all(build_controllers(client, Arc::clone(&ctx)));

    let lost = async {
        match leadership.as_mut() {
            Some(guard) => guard.lost().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = controllers => {
            tracing::info!("Controllers stopped");
        }
        _ = lost => {
            tracing::error!("Lost leadership, exiting");
            std::process::exit(1);
        }
        result = webhook => {
            match result {
                Ok(Ok(())) => tracing::info!("Webhook server stopped"),
                Ok(Err(e)) => return Err(anyhow::anyhow!("webhook server failed: {}", e)),
                Err(e) => return Err(anyhow::anyhow!("webhook task panicked: {}", e)),
            }
        }
    }

    if let Some(guard) = leadership {
        if let Err(e) = guard.release_leadership().await {
            tracing::warn!(error = %e, "Failed to release leadership");
        }
    }
    Ok(())
}
