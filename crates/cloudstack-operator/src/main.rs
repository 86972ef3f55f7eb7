//! CloudStack cloud controller binary

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cloudstack_client::HttpCloudStackClient;
use cloudstack_common::telemetry::init_telemetry;
use cloudstack_common::CloudConfig;
use cloudstack_operator::loadbalancer::CloudStackCloud;
use cloudstack_operator::{controller, Context};

/// Kubernetes cloud controller for Apache CloudStack
#[derive(Parser, Debug)]
#[command(name = "cloudstack-operator", version, about, long_about = None)]
struct Cli {
    /// Path to the cloud provider configuration file
    #[arg(long, env = "CLOUD_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let cli = Cli::parse();
    let config = CloudConfig::load(&cli.config)?;

    let api = HttpCloudStackClient::new(&config)?;
    let cloud = CloudStackCloud::new(Arc::new(api));

    let client = Client::try_default().await?;
    info!("connected to the Kubernetes API");

    let shutdown = CancellationToken::new();
    let context = Arc::new(Context {
        client: client.clone(),
        cloud,
        shutdown: shutdown.clone(),
    });

    let services: Api<Service> = Api::all(client);

    info!("starting service controller");
    Controller::new(services, WatcherConfig::default())
        .shutdown_on_signal()
        .run(controller::reconcile, controller::error_policy, context)
        .for_each(|result| async {
            match result {
                Ok((service, _action)) => {
                    info!(service = %service.name, "reconciled");
                }
                Err(err) => {
                    error!(%err, "reconcile error");
                }
            }
        })
        .await;

    shutdown.cancel();
    info!("controller stopped");

    Ok(())
}
