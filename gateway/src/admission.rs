//! Request Admission Gate and the single central error mapper.
//!
//! Every handler that names a `systemName` resolves the cluster and checks
//! the relevant health sample here before doing any real work; no component
//! maps its own errors to an HTTP status (spec.md §4.6, §7).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use health::HealthStore;
use model::{Cluster, ClusterName, ErrorKind, ServiceType, Username};
use serde::Serialize;
use serde_json::Value;

/// Process-wide state shared by every handler: the static cluster table and
/// the live health sample store. HTTP clients to the scheduler REST API and
/// the key-mint service are created once at startup and live alongside this.
pub struct ServiceContext {
    pub clusters: HashMap<ClusterName, Cluster>,
    pub health: HealthStore,
    pub app_version: String,
    pub http: reqwest::Client,
}

impl ServiceContext {
    pub fn new(clusters: Vec<Cluster>, health: HealthStore, app_version: String) -> Self {
        let clusters = clusters.into_iter().map(|c| (c.name.clone(), c)).collect();
        ServiceContext {
            clusters,
            health,
            app_version,
            http: reqwest::Client::new(),
        }
    }
}

/// What an endpoint needs admitted before it runs.
pub enum RequiredService {
    None,
    Scheduler,
    Ssh,
    Filesystem { path: String },
}

/// Resolves the cluster and, unless bypassed, checks the matching health
/// sample. Returns the resolved cluster on success.
pub fn admit<'a>(
    ctx: &'a ServiceContext,
    cluster_name: &ClusterName,
    required: &RequiredService,
    ignore_health: bool,
) -> Result<&'a Cluster, ErrorKind> {
    let cluster = ctx
        .clusters
        .get(cluster_name)
        .ok_or_else(|| ErrorKind::NotFound(format!("unknown cluster {cluster_name}")))?;

    if ignore_health {
        return Ok(cluster);
    }

    match required {
        RequiredService::None => {}
        RequiredService::Scheduler => check_single(ctx, cluster_name, ServiceType::Scheduler)?,
        RequiredService::Ssh => check_single(ctx, cluster_name, ServiceType::Ssh)?,
        RequiredService::Filesystem { path } => check_filesystem(ctx, cluster_name, path)?,
    }

    Ok(cluster)
}

fn check_single(ctx: &ServiceContext, cluster: &ClusterName, service: ServiceType) -> Result<(), ErrorKind> {
    let samples = ctx.health.get(cluster).unwrap_or_default();
    let sample = samples.into_iter().find(|s| s.service_type == service);
    match sample {
        None => Err(ErrorKind::PreconditionRequired(format!(
            "no health sample for {cluster} {service:?} yet"
        ))),
        Some(s) if !s.healthy => Err(unhealthy(cluster, service, s.message)),
        Some(_) => Ok(()),
    }
}

/// The most specific (longest-prefix) matching filesystem sample wins.
/// Missing a match entirely is treated the same as a missing sample.
fn check_filesystem(ctx: &ServiceContext, cluster: &ClusterName, request_path: &str) -> Result<(), ErrorKind> {
    let samples = ctx.health.get(cluster).unwrap_or_default();
    let best = samples
        .into_iter()
        .filter(|s| s.service_type == ServiceType::Filesystem)
        .filter(|s| s.path.as_deref().is_some_and(|p| request_path.starts_with(p)))
        .max_by_key(|s| s.path.as_ref().map(|p| p.len()).unwrap_or(0));

    match best {
        None => Err(ErrorKind::PreconditionRequired(format!(
            "no filesystem health sample matches {request_path} on {cluster}"
        ))),
        Some(s) if !s.healthy => Err(unhealthy(cluster, ServiceType::Filesystem, s.message)),
        Some(_) => Ok(()),
    }
}

/// Unhealthy-service admission failures share `SchedulerInternal`'s 503
/// mapping; there is no separate "unhealthy" error kind, since the table in
/// spec.md §6 maps both scheduler errors and unhealthy infra to 503.
fn unhealthy(cluster: &ClusterName, service: ServiceType, message: Option<String>) -> ErrorKind {
    ErrorKind::SchedulerInternal(format!(
        "{cluster} {service:?} is unhealthy: {}",
        message.unwrap_or_else(|| "no detail".to_string())
    ))
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "errorType")]
    error_type: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

fn error_type(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::BadRequest(_)
        | ErrorKind::Validation(_)
        | ErrorKind::Conflict(_)
        | ErrorKind::AuthToken(_)
        | ErrorKind::CredentialMissing(_) => "validation",
        _ => "error",
    }
}

/// Converts a typed failure into the `{errorType, message, data?, user?}`
/// body and status code from spec.md §6, with the `F7T-*` headers attached.
pub fn map_error(kind: ErrorKind, app_version: &str, user: Option<&Username>) -> Response {
    let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        error_type: error_type(&kind),
        message: kind.to_string(),
        data: None,
        user: user.map(|u| u.to_string()),
    };
    let mut response = (status, Json(body)).into_response();
    apply_f7t_headers(response.headers_mut(), app_version, user);
    response
}

/// Stamps every response (success or error) with the three headers spec.md
/// §6 requires.
pub fn apply_f7t_headers(headers: &mut HeaderMap, app_version: &str, user: Option<&Username>) {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    if let Ok(v) = HeaderValue::from_str(&now.as_secs().to_string()) {
        headers.insert("F7T-Timestamp", v);
    }
    if let Ok(v) = HeaderValue::from_str(app_version) {
        headers.insert("F7T-AppVersion", v);
    }
    if let Some(user) = user {
        if let Ok(v) = HeaderValue::from_str(&user.to_string()) {
            headers.insert("F7T-AuthUsername", v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{HealthSample, SchedulerDescriptor, SchedulerType, ServiceAccount, SshEndpoint, SshTimeouts};

    fn test_cluster(name: &str) -> Cluster {
        Cluster {
            name: ClusterName::from(name),
            ssh: SshEndpoint {
                host: "host".into(),
                port: 22,
                proxy_host: None,
                proxy_port: 22,
                max_clients: 10,
                timeouts: SshTimeouts {
                    connect_secs: 5,
                    login_secs: 5,
                    execute_secs: 10,
                    idle_secs: 60,
                    keep_alive_secs: 5,
                },
            },
            scheduler: SchedulerDescriptor {
                kind: SchedulerType::Slurm,
                version: None,
                api_url: None,
                api_version: None,
                timeout_secs: 10,
            },
            service_account: ServiceAccount {
                client_id: "svc".into(),
                secret: "secret".into(),
            },
            file_systems: vec![],
            probing: None,
            datatransfer_jobs_directives: vec![],
        }
    }

    fn sample(service_type: ServiceType, healthy: bool, path: Option<&str>) -> HealthSample {
        HealthSample {
            service_type,
            last_checked: SystemTime::now(),
            latency_secs: 0.01,
            healthy,
            message: if healthy { None } else { Some("down".into()) },
            path: path.map(|p| p.to_string()),
        }
    }

    fn test_context() -> (ServiceContext, ClusterName) {
        let cluster = test_cluster("daint");
        let name = cluster.name.clone();
        let ctx = ServiceContext::new(vec![cluster], HealthStore::new(), "1.0".into());
        (ctx, name)
    }

    #[test]
    fn unknown_cluster_is_not_found() {
        let (ctx, _) = test_context();
        let err = admit(&ctx, &ClusterName::from("nope"), &RequiredService::None, false).unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn missing_sample_is_precondition_required() {
        let (ctx, name) = test_context();
        let err = admit(&ctx, &name, &RequiredService::Scheduler, false).unwrap_err();
        assert_eq!(err.http_status(), 428);
    }

    #[test]
    fn unhealthy_sample_is_503() {
        let (ctx, name) = test_context();
        ctx.health.replace(name.clone(), vec![sample(ServiceType::Scheduler, false, None)]);
        let err = admit(&ctx, &name, &RequiredService::Scheduler, false).unwrap_err();
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn healthy_sample_admits() {
        let (ctx, name) = test_context();
        ctx.health.replace(name.clone(), vec![sample(ServiceType::Scheduler, true, None)]);
        assert!(admit(&ctx, &name, &RequiredService::Scheduler, false).is_ok());
    }

    #[test]
    fn ignore_health_bypasses_missing_sample() {
        let (ctx, name) = test_context();
        assert!(admit(&ctx, &name, &RequiredService::Scheduler, true).is_ok());
    }

    #[test]
    fn filesystem_longest_prefix_wins() {
        let (ctx, name) = test_context();
        ctx.health.replace(
            name.clone(),
            vec![
                sample(ServiceType::Filesystem, true, Some("/scratch")),
                sample(ServiceType::Filesystem, false, Some("/scratch/project")),
            ],
        );
        let required = RequiredService::Filesystem { path: "/scratch/project/x".into() };
        let err = admit(&ctx, &name, &required, false).unwrap_err();
        assert_eq!(err.http_status(), 503, "the more specific, unhealthy mount must win");
    }

    #[test]
    fn filesystem_no_matching_prefix_is_precondition_required() {
        let (ctx, name) = test_context();
        ctx.health.replace(name.clone(), vec![sample(ServiceType::Filesystem, true, Some("/scratch"))]);
        let required = RequiredService::Filesystem { path: "/home/user".into() };
        let err = admit(&ctx, &name, &required, false).unwrap_err();
        assert_eq!(err.http_status(), 428);
    }

    #[test]
    fn error_body_marks_validation_errors_distinctly() {
        assert_eq!(error_type(&ErrorKind::BadRequest("x".into())), "validation");
        assert_eq!(error_type(&ErrorKind::NotFound("x".into())), "error");
    }
}
