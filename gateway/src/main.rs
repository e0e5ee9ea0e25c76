//! Gateway process entrypoint: loads configuration, builds one SSH pool
//! and scheduler adapter per cluster, starts the health checker and the
//! idle-session reaper, and serves the admission-gate-relevant HTTP surface.
//!
//! Full business routing (ls/upload/submit/...) lives outside this crate's
//! scope; what's here is the ambient stack every handler would sit behind:
//! config, health, admission, and the central error mapper.

mod admission;
mod config;
mod s3_probe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use credentials::{CredentialProvider, KeyServiceProvider, StaticKeyProvider};
use health::{ClusterProbeTarget, HealthStore};
use model::{Cluster, ClusterName, ErrorKind, SchedulerType, Username};
use scheduler::composite::CompositeSchedulerClient;
use scheduler::rest::{ApiVersion, SlurmRestClient};
use scheduler::shell::SlurmShellClient;
use scheduler::SchedulerAdapter;
use ssh_pool::transport::real::AsyncSsh2Dialer;
use ssh_pool::SshPool;
use tracing::{error, info};

use crate::admission::ServiceContext;
use crate::config::{ConfigLoadError, GatewayConfig, SshCredentialsConfig};

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "FirecREST-style HPC gateway")]
struct Cli {
    /// Overrides YAML_CONFIG_FILE / INPUT_YAML_CONFIG_FILE.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: std::net::SocketAddr,
}

fn credential_provider(cfg: &SshCredentialsConfig) -> Arc<dyn CredentialProvider> {
    match cfg {
        SshCredentialsConfig::KeyService { url } => {
            Arc::new(KeyServiceProvider::new(url.clone(), Duration::from_secs(5)))
        }
        SshCredentialsConfig::Static(keys) => {
            let mut map = HashMap::new();
            for (user, entry) in keys {
                map.insert(
                    Username::from(user.as_str()),
                    model::CredentialMaterial {
                        private_key_pem: model::SecretString::new(entry.private_key.0.clone()),
                        public_certificate: entry.public_cert.clone(),
                        passphrase: entry.passphrase.as_ref().map(|p| model::SecretString::new(p.0.clone())),
                    },
                );
            }
            Arc::new(StaticKeyProvider::new(map))
        }
    }
}

fn scheduler_for(cluster: &Cluster, pool: Arc<SshPool>) -> Arc<dyn SchedulerAdapter> {
    let shell: Box<dyn SchedulerAdapter> = Box::new(SlurmShellClient::new(
        pool,
        Duration::from_secs(cluster.scheduler.timeout_secs),
    ));

    match (cluster.scheduler.kind, &cluster.scheduler.api_url, &cluster.scheduler.api_version) {
        (SchedulerType::Slurm, Some(base_url), Some(api_version)) => {
            let version = ApiVersion::parse(api_version).unwrap_or(ApiVersion(0, 0, 38));
            let rest: Box<dyn SchedulerAdapter> = Box::new(SlurmRestClient::new(base_url.clone(), version));
            Arc::new(CompositeSchedulerClient::new(Some(rest), shell))
        }
        (SchedulerType::Slurm, _, _) => Arc::new(CompositeSchedulerClient::new(None, shell)),
        (SchedulerType::Pbs, _, _) => Arc::new(scheduler::pbs::PbsClient),
    }
}

struct ClusterRuntime {
    ssh_pool: Arc<SshPool>,
    idle_timeout: Duration,
}

fn build_cluster_runtimes(
    clusters: &[Cluster],
    credential_provider: Arc<dyn CredentialProvider>,
) -> HashMap<ClusterName, ClusterRuntime> {
    clusters
        .iter()
        .map(|cluster| {
            let pool = Arc::new(SshPool::new(
                cluster.ssh.clone(),
                Arc::new(AsyncSsh2Dialer),
                credential_provider.clone(),
            ));
            (
                cluster.name.clone(),
                ClusterRuntime {
                    ssh_pool: pool,
                    idle_timeout: Duration::from_secs(cluster.ssh.timeouts.idle_secs),
                },
            )
        })
        .collect()
}

async fn resolve_config_path(cli: &Cli) -> Result<std::path::PathBuf, ConfigLoadError> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::config_path_from_env(),
    }
}

async fn liveness(State(ctx): State<Arc<ServiceContext>>) -> Response {
    let mut body = serde_json::Map::new();
    for (name, _) in &ctx.clusters {
        let samples = ctx.health.get(name).unwrap_or_default();
        body.insert(name.to_string(), serde_json::to_value(samples).unwrap_or_default());
    }
    let mut response = Json(serde_json::Value::Object(body)).into_response();
    admission::apply_f7t_headers(response.headers_mut(), &ctx.app_version, None);
    response
}

async fn cluster_liveness(
    State(ctx): State<Arc<ServiceContext>>,
    AxumPath(cluster): AxumPath<String>,
) -> Response {
    let cluster_name = ClusterName::from(cluster.as_str());
    match admission::admit(&ctx, &cluster_name, &admission::RequiredService::None, true) {
        Ok(_) => {
            let samples = ctx.health.get(&cluster_name).unwrap_or_default();
            let mut response = Json(samples).into_response();
            admission::apply_f7t_headers(response.headers_mut(), &ctx.app_version, None);
            response
        }
        Err(err) => admission::map_error(err, &ctx.app_version, None),
    }
}

fn router(ctx: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/status/liveness", get(liveness))
        .route("/status/liveness/{cluster}", get(cluster_liveness))
        .with_state(ctx)
        .fallback(not_found)
}

async fn not_found() -> Response {
    admission::map_error(ErrorKind::NotFound("no such route".into()), "unknown", None)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(&cli).await?;
    let config: GatewayConfig = config::load(&config_path)?;
    info!(clusters = config.clusters.len(), "loaded gateway configuration");

    let credential_provider = credential_provider(&config.ssh_credentials);
    let runtimes = build_cluster_runtimes(&config.clusters, credential_provider);

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_sdk_s3::config::Region::new(
            config.storage.region.clone().unwrap_or_else(|| "us-east-1".to_string()),
        ))
        .credentials_provider(aws_credential_types::Credentials::new(
            config.storage.access_key_id.0.clone(),
            config.storage.secret_access_key.0.clone(),
            None,
            None,
            "gateway-static",
        ))
        .load()
        .await;

    let private_client = aws_sdk_s3::Client::from_conf(
        aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(config.storage.private_endpoint.clone())
            .force_path_style(config.storage.tenant.is_some())
            .build(),
    );
    let object_store_probe: Arc<dyn health::ObjectStoreProbe> =
        Arc::new(s3_probe::S3LivenessProbe::new(private_client.clone()));

    let health_store = HealthStore::new();
    let mut probe_targets = Vec::new();
    let mut idle_pools = Vec::new();

    for cluster in &config.clusters {
        let runtime = runtimes.get(&cluster.name).expect("runtime built for every configured cluster");
        let scheduler = scheduler_for(cluster, runtime.ssh_pool.clone());
        idle_pools.push((runtime.ssh_pool.clone(), runtime.idle_timeout));

        if cluster.probing.is_some() {
            probe_targets.push(ClusterProbeTarget {
                cluster: cluster.clone(),
                scheduler,
                ssh_pool: runtime.ssh_pool.clone(),
                object_store: object_store_probe.clone(),
                service_user: Username::from(cluster.service_account.client_id.as_str()),
                service_token: cluster.service_account.secret.clone(),
            });
        }
    }

    let _health_tasks = health::spawn_checker(probe_targets, health_store.clone());
    let _reaper_task = ssh_pool::spawn_idle_reaper(idle_pools);

    let ctx = Arc::new(ServiceContext::new(config.clusters.clone(), health_store, config.app_version.clone()));
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(addr = %cli.listen, "gateway listening");
    if let Err(err) = axum::serve(listener, app).await {
        error!("server exited: {err}");
    }

    Ok(())
}
