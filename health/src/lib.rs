//! Health Checker: periodically probes scheduler, SSH, filesystems, and
//! object store per cluster, then atomically replaces that cluster's sample
//! list. Never raises — a probe failure becomes an unhealthy sample, and a
//! catastrophic failure inside a probe task becomes a synthetic `exception`
//! sample, matching the contract spec.md §4.5 names.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use commands::{LsCommand, Recursion};
use dashmap::DashMap;
use model::{ClusterName, Cluster, FilesystemMount, HealthSample, ServiceType, Username};
use scheduler::SchedulerAdapter;
use ssh_pool::SshPool;
use tracing::warn;

/// Narrow seam for the object-store liveness probe (`list_buckets` against
/// the private endpoint). Kept separate from `transfer::ObjectStore` so the
/// health checker doesn't need the full presigning surface or the
/// `aws-sdk-s3` dependency tree.
#[async_trait]
pub trait ObjectStoreProbe: Send + Sync {
    async fn list_buckets_probe(&self) -> Result<(), String>;
}

/// Holds the most recent sample list per cluster. Replaced atomically by
/// swapping the `Vec` behind the `DashMap` entry; readers never observe a
/// torn list.
#[derive(Default, Clone)]
pub struct HealthStore {
    samples: Arc<DashMap<ClusterName, Vec<HealthSample>>>,
}

impl HealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cluster: &ClusterName) -> Option<Vec<HealthSample>> {
        self.samples.get(cluster).map(|entry| entry.value().clone())
    }

    pub fn replace(&self, cluster: ClusterName, samples: Vec<HealthSample>) {
        self.samples.insert(cluster, samples);
    }
}

fn exception_sample(message: String) -> HealthSample {
    HealthSample {
        service_type: ServiceType::Exception,
        last_checked: SystemTime::now(),
        latency_secs: 0.0,
        healthy: false,
        message: Some(message),
        path: None,
    }
}

async fn probe_scheduler(
    scheduler: &dyn SchedulerAdapter,
    user: &Username,
    token: &str,
) -> HealthSample {
    let start = Instant::now();
    let result = scheduler.ping(user, token).await;
    let (healthy, message) = match result {
        Ok(up) => (up, if up { None } else { Some("one or more controllers are not UP".to_string()) }),
        Err(e) => (false, Some(format!("{e}"))),
    };
    HealthSample {
        service_type: ServiceType::Scheduler,
        last_checked: SystemTime::now(),
        latency_secs: start.elapsed().as_secs_f64(),
        healthy,
        message,
        path: None,
    }
}

async fn probe_ssh(pool: &SshPool, user: &Username, token: &str) -> HealthSample {
    let start = Instant::now();
    let result = pool
        .with_session(user, token, |transport| async move {
            transport
                .execute("true", None, 4096, Duration::from_secs(5))
                .await
        })
        .await;
    let (healthy, message) = match result {
        Ok(out) if out.exit_status == 0 => (true, None),
        Ok(out) => (false, Some(format!("exit status {}", out.exit_status))),
        Err(e) => (false, Some(format!("{e}"))),
    };
    HealthSample {
        service_type: ServiceType::Ssh,
        last_checked: SystemTime::now(),
        latency_secs: start.elapsed().as_secs_f64(),
        healthy,
        message,
        path: None,
    }
}

async fn probe_filesystem(
    pool: &SshPool,
    user: &Username,
    token: &str,
    mount: &FilesystemMount,
) -> HealthSample {
    let start = Instant::now();
    let command = LsCommand {
        path: mount.path.clone(),
        recursion: Recursion::None,
        show_hidden: false,
        numeric_uid_gid: false,
        dereference: false,
    };
    let line = command.render_command_line();
    let result = pool
        .with_session(user, token, |transport| async move {
            transport.execute(&line, None, 1024 * 1024, Duration::from_secs(5)).await
        })
        .await;

    let (healthy, message) = match result {
        Ok(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            let stderr = String::from_utf8_lossy(&out.stderr);
            match command.parse_output(&stdout, &stderr, out.exit_status) {
                Ok(_) => (true, None),
                Err(e) => (false, Some(format!("{e}"))),
            }
        }
        Err(e) => (false, Some(format!("{e}"))),
    };

    HealthSample {
        service_type: ServiceType::Filesystem,
        last_checked: SystemTime::now(),
        latency_secs: start.elapsed().as_secs_f64(),
        healthy,
        message,
        path: Some(mount.path.clone()),
    }
}

async fn probe_object_store(store: &dyn ObjectStoreProbe) -> HealthSample {
    let start = Instant::now();
    let result = store.list_buckets_probe().await;
    let (healthy, message) = match result {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e)),
    };
    HealthSample {
        service_type: ServiceType::S3,
        last_checked: SystemTime::now(),
        latency_secs: start.elapsed().as_secs_f64(),
        healthy,
        message,
        path: None,
    }
}

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Enforces the per-cluster probe deadline (spec.md §4.5: "a per-call
/// deadline of `timeout` seconds"). A probe that doesn't finish in time
/// yields an unhealthy sample rather than hanging the whole run.
async fn with_deadline(
    service_type: ServiceType,
    path: Option<String>,
    timeout: Duration,
    fut: impl std::future::Future<Output = HealthSample>,
) -> HealthSample {
    match tokio::time::timeout(timeout, fut).await {
        Ok(sample) => sample,
        Err(_) => HealthSample {
            service_type,
            last_checked: SystemTime::now(),
            latency_secs: timeout.as_secs_f64(),
            healthy: false,
            message: Some(format!("probe exceeded {}s deadline", timeout.as_secs())),
            path,
        },
    }
}

/// Everything one cluster's periodic probe run needs. `service_user`/
/// `service_token` stand in for the OIDC client-credentials-minted service
/// account identity used for scheduler/SSH probes.
#[derive(Clone)]
pub struct ClusterProbeTarget {
    pub cluster: Cluster,
    pub scheduler: Arc<dyn SchedulerAdapter>,
    pub ssh_pool: Arc<SshPool>,
    pub object_store: Arc<dyn ObjectStoreProbe>,
    pub service_user: Username,
    pub service_token: String,
}

async fn run_once(target: &ClusterProbeTarget, store: &HealthStore) {
    let deadline = Duration::from_secs(
        target.cluster.probing.map(|p| p.timeout_secs).unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS),
    );

    let scheduler_sample = with_deadline(
        ServiceType::Scheduler,
        None,
        deadline,
        probe_scheduler(target.scheduler.as_ref(), &target.service_user, &target.service_token),
    );
    let ssh_sample = with_deadline(
        ServiceType::Ssh,
        None,
        deadline,
        probe_ssh(target.ssh_pool.as_ref(), &target.service_user, &target.service_token),
    );
    let object_store_sample = with_deadline(
        ServiceType::S3,
        None,
        deadline,
        probe_object_store(target.object_store.as_ref()),
    );
    let filesystem_samples = futures_join_filesystems(target, deadline);

    let (scheduler_sample, ssh_sample, object_store_sample, filesystem_samples) =
        tokio::join!(scheduler_sample, ssh_sample, object_store_sample, filesystem_samples);

    let mut samples = vec![scheduler_sample, ssh_sample, object_store_sample];
    samples.extend(filesystem_samples);
    store.replace(target.cluster.name.clone(), samples);
}

async fn futures_join_filesystems(target: &ClusterProbeTarget, deadline: Duration) -> Vec<HealthSample> {
    let mut samples = Vec::with_capacity(target.cluster.file_systems.len());
    for mount in &target.cluster.file_systems {
        let sample = with_deadline(
            ServiceType::Filesystem,
            Some(mount.path.clone()),
            deadline,
            probe_filesystem(target.ssh_pool.as_ref(), &target.service_user, &target.service_token, mount),
        )
        .await;
        samples.push(sample);
    }
    samples
}

/// Spawns one periodic task per probed cluster. Each tick's probe run
/// executes inside its own task so a panic is caught at the join boundary
/// and recorded as a synthetic `exception` sample rather than taking down
/// the whole checker.
pub fn spawn_checker(targets: Vec<ClusterProbeTarget>, store: HealthStore) -> Vec<tokio::task::JoinHandle<()>> {
    targets
        .into_iter()
        .map(|target| {
            let store = store.clone();
            let interval_secs = target.cluster.probing.map(|p| p.interval_secs).unwrap_or(30);
            let cluster_name = target.cluster.name.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
                loop {
                    interval.tick().await;
                    let target = target.clone();
                    let store_for_run = store.clone();
                    let run = tokio::spawn(async move { run_once(&target, &store_for_run).await });
                    if let Err(join_err) = run.await {
                        warn!(cluster = %cluster_name, "health probe task panicked: {join_err}");
                        store.replace(cluster_name.clone(), vec![exception_sample(join_err.to_string())]);
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe {
        healthy: bool,
    }

    #[async_trait]
    impl ObjectStoreProbe for FakeProbe {
        async fn list_buckets_probe(&self) -> Result<(), String> {
            if self.healthy {
                Ok(())
            } else {
                Err("connection refused".to_string())
            }
        }
    }

    #[tokio::test]
    async fn healthy_probe_yields_healthy_sample() {
        let probe = FakeProbe { healthy: true };
        let sample = probe_object_store(&probe).await;
        assert!(sample.healthy);
        assert_eq!(sample.service_type, ServiceType::S3);
    }

    #[tokio::test]
    async fn unhealthy_probe_carries_message() {
        let probe = FakeProbe { healthy: false };
        let sample = probe_object_store(&probe).await;
        assert!(!sample.healthy);
        assert_eq!(sample.message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn slow_probe_is_reported_unhealthy_at_deadline() {
        tokio::time::pause();
        let fut = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            HealthSample {
                service_type: ServiceType::S3,
                last_checked: SystemTime::now(),
                latency_secs: 0.0,
                healthy: true,
                message: None,
                path: None,
            }
        };
        let probe = tokio::spawn(with_deadline(ServiceType::S3, None, Duration::from_secs(1), fut));
        tokio::time::advance(Duration::from_secs(2)).await;
        let sample = probe.await.unwrap();
        assert!(!sample.healthy);
        assert!(sample.message.unwrap().contains("deadline"));
    }

    #[test]
    fn store_replace_is_visible_to_get() {
        let store = HealthStore::new();
        let cluster = ClusterName::from("daint");
        store.replace(cluster.clone(), vec![exception_sample("boom".into())]);
        let samples = store.get(&cluster).unwrap();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].healthy);
    }

    #[test]
    fn get_on_unknown_cluster_returns_none() {
        let store = HealthStore::new();
        assert!(store.get(&ClusterName::from("nope")).is_none());
    }
}
