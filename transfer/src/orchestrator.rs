//! Large-file transfer orchestration: composes presigned S3 URLs with a
//! generated shell script and submits it as a scheduler job under the
//! caller's identity. The gateway's own bandwidth is never touched.

use std::sync::Arc;
use std::time::Duration;

use commands::{CpCommand, MvCommand, RmCommand, TarCommand};
use model::{Cluster, ErrorKind, JobDescription, TransferJob, Username};
use scheduler::SchedulerAdapter;
use uuid::Uuid;

use crate::script::{render_egress_script, render_ingress_script};
use crate::store::{rewrite_bucket_name, ObjectStore};

const PRESIGN_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub part_size_bytes: u64,
    pub max_part_size_bytes: u64,
    pub bucket_lifecycle_days: u32,
    pub tenant: Option<String>,
    pub egress_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size_bytes: 2 * 1024 * 1024 * 1024,
            max_part_size_bytes: 2 * 1024 * 1024 * 1024,
            bucket_lifecycle_days: 7,
            tenant: None,
            egress_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub parts_urls: Vec<String>,
    pub complete_url: String,
    pub max_part_size: u64,
    pub transfer_job: TransferJob,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub get_url: String,
    pub transfer_job: TransferJob,
}

pub struct TransferOrchestrator {
    store: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn SchedulerAdapter>,
    config: TransferConfig,
}

impl TransferOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, scheduler: Arc<dyn SchedulerAdapter>, config: TransferConfig) -> Self {
        Self { store, scheduler, config }
    }

    fn bucket_for(&self, user: &Username) -> String {
        rewrite_bucket_name(self.config.tenant.as_deref(), &user.0)
    }

    fn work_dir(&self, cluster: &Cluster) -> Result<String, ErrorKind> {
        cluster
            .default_work_dir()
            .map(|fs| fs.path.clone())
            .ok_or_else(|| ErrorKind::Validation(format!("cluster {} has no default work directory", cluster.name)))
    }

    fn directives(&self, cluster: &Cluster, account: Option<&str>) -> Result<String, ErrorKind> {
        let mut rendered = Vec::with_capacity(cluster.datatransfer_jobs_directives.len());
        for directive in &cluster.datatransfer_jobs_directives {
            if directive.contains("{account}") {
                let account = account.ok_or_else(|| {
                    ErrorKind::Validation("cluster transfer directives require an account".into())
                })?;
                rendered.push(directive.replace("{account}", account));
            } else {
                rendered.push(directive.clone());
            }
        }
        Ok(rendered.join("\n"))
    }

    async fn submit_transfer_job(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        job_name: &str,
        account: Option<&str>,
        body: String,
    ) -> Result<TransferJob, ErrorKind> {
        let work_dir = self.work_dir(cluster)?;
        let directives = self.directives(cluster, account)?;
        let full_script = format!("{directives}\n{body}");
        let job_uuid = Uuid::new_v4();
        let out_log = format!("{work_dir}/{user}/.f7t_file_handling_job_{job_uuid}.log");
        let err_log = format!("{work_dir}/{user}/.f7t_file_handling_job_{job_uuid}.err.log");

        let description = JobDescription {
            name: Some(job_name.to_string()),
            account: account.map(String::from),
            working_directory: work_dir.clone(),
            stdout: Some(out_log.clone()),
            stderr: Some(err_log.clone()),
            script: Some(full_script),
            ..Default::default()
        };
        let job_id = self.scheduler.submit_job(&description, user, token).await?;

        Ok(TransferJob {
            job_id,
            cluster: cluster.name.clone(),
            working_directory: work_dir,
            output_log_path: out_log,
            error_log_path: err_log,
        })
    }

    pub async fn upload(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        target_path: &str,
        file_name: &str,
        file_size: u64,
        account: Option<&str>,
    ) -> Result<UploadResult, ErrorKind> {
        let bucket = self.bucket_for(user);
        self.store.ensure_bucket(&bucket, self.config.bucket_lifecycle_days).await?;

        let object_id = Uuid::new_v4();
        let key = format!("{object_id}/{file_name}");
        let upload_id = self.store.create_multipart_upload(&bucket, &key).await?;

        let part_count = file_size.div_ceil(self.config.part_size_bytes).max(1);
        let mut parts_urls = Vec::with_capacity(part_count as usize);
        for part_number in 1..=part_count {
            parts_urls.push(
                self.store
                    .presign_upload_part(&bucket, &key, &upload_id, part_number as i32, PRESIGN_TTL, true)
                    .await?,
            );
        }
        let complete_url = self
            .store
            .presign_complete_multipart_upload(&bucket, &key, &upload_id, PRESIGN_TTL, true)
            .await?;

        let get_url = self.store.presign_get_object(&bucket, &key, PRESIGN_TTL, false).await?;
        let head_url = self.store.presign_head_object(&bucket, &key, PRESIGN_TTL, false).await?;
        let script = render_ingress_script(&get_url, &head_url, target_path, self.config.max_part_size_bytes);

        let transfer_job = self
            .submit_transfer_job(cluster, user, token, "IngressFileTransfer", account, script)
            .await?;

        Ok(UploadResult {
            parts_urls,
            complete_url,
            max_part_size: self.config.max_part_size_bytes,
            transfer_job,
        })
    }

    pub async fn download(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        source_path: &str,
        file_size: u64,
        account: Option<&str>,
    ) -> Result<DownloadResult, ErrorKind> {
        let bucket = self.bucket_for(user);
        self.store.ensure_bucket(&bucket, self.config.bucket_lifecycle_days).await?;

        let object_id = Uuid::new_v4();
        let file_name = source_path.rsplit('/').next().unwrap_or(source_path);
        let key = format!("{object_id}/{file_name}");
        let upload_id = self.store.create_multipart_upload(&bucket, &key).await?;

        let part_count = file_size.div_ceil(self.config.part_size_bytes).max(1);
        let mut part_urls = Vec::with_capacity(part_count as usize);
        for part_number in 1..=part_count {
            part_urls.push(
                self.store
                    .presign_upload_part(&bucket, &key, &upload_id, part_number as i32, PRESIGN_TTL, false)
                    .await?,
            );
        }
        let complete_url = self
            .store
            .presign_complete_multipart_upload(&bucket, &key, &upload_id, PRESIGN_TTL, false)
            .await?;

        let script = render_egress_script(
            source_path,
            &part_urls,
            &complete_url,
            self.config.part_size_bytes,
            self.config.egress_concurrency,
        );

        let get_url = self.store.presign_get_object(&bucket, &key, PRESIGN_TTL, true).await?;

        let transfer_job = self
            .submit_transfer_job(cluster, user, token, "OutgressFileTransfer", account, script)
            .await?;

        Ok(DownloadResult { get_url, transfer_job })
    }

    pub async fn mv(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        source: &str,
        target: &str,
        account: Option<&str>,
    ) -> Result<TransferJob, ErrorKind> {
        let cmd = MvCommand {
            source: source.to_string(),
            target: target.to_string(),
        }
        .render_command_line();
        self.submit_transfer_job(cluster, user, token, "MvFileTransfer", account, cmd).await
    }

    pub async fn cp(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        source: &str,
        target: &str,
        recursive: bool,
        account: Option<&str>,
    ) -> Result<TransferJob, ErrorKind> {
        let cmd = CpCommand {
            source: source.to_string(),
            target: target.to_string(),
            recursive,
        }
        .render_command_line();
        self.submit_transfer_job(cluster, user, token, "CpFileTransfer", account, cmd).await
    }

    pub async fn rm(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        path: &str,
        recursive: bool,
        account: Option<&str>,
    ) -> Result<TransferJob, ErrorKind> {
        let cmd = RmCommand {
            path: path.to_string(),
            recursive,
        }
        .render_command_line();
        self.submit_transfer_job(cluster, user, token, "RmFileTransfer", account, cmd).await
    }

    pub async fn compress(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        source_dir: &str,
        source_file: &str,
        target: &str,
        account: Option<&str>,
    ) -> Result<TransferJob, ErrorKind> {
        let cmd = TarCommand::Compress {
            source_dir: source_dir.to_string(),
            source_file: source_file.to_string(),
            target: target.to_string(),
            dereference: false,
        }
        .render_command_line();
        self.submit_transfer_job(cluster, user, token, "CompressFileTransfer", account, cmd).await
    }

    pub async fn extract(
        &self,
        cluster: &Cluster,
        user: &Username,
        token: &str,
        source: &str,
        target_dir: &str,
        account: Option<&str>,
    ) -> Result<TransferJob, ErrorKind> {
        let cmd = TarCommand::Extract {
            source: source.to_string(),
            target_dir: target_dir.to_string(),
        }
        .render_command_line();
        self.submit_transfer_job(cluster, user, token, "ExtractFileTransfer", account, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeObjectStore;
    use async_trait::async_trait;
    use model::{ClusterName, FilesystemDataType, FilesystemMount, Job, JobMetadata, SchedulerDescriptor, SchedulerType, ServiceAccount, SshEndpoint, SshTimeouts};
    use scheduler::{Node, Partition, Reservation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingScheduler {
        submissions: AtomicUsize,
    }

    #[async_trait]
    impl SchedulerAdapter for CountingScheduler {
        async fn submit_job(&self, _d: &JobDescription, _u: &Username, _t: &str) -> Result<String, ErrorKind> {
            let n = self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(format!("job-{n}"))
        }
        async fn attach_command(&self, _c: &str, _j: &str, _u: &Username, _t: &str) -> Result<(), ErrorKind> {
            Ok(())
        }
        async fn get_job(&self, _j: &str, _u: &Username, _t: &str) -> Result<Vec<Job>, ErrorKind> {
            Ok(vec![])
        }
        async fn get_jobs(&self, _u: &Username, _t: &str, _a: bool) -> Result<Vec<Job>, ErrorKind> {
            Ok(vec![])
        }
        async fn get_job_metadata(&self, _j: &str, _u: &Username, _t: &str) -> Result<Vec<JobMetadata>, ErrorKind> {
            Ok(vec![])
        }
        async fn cancel_job(&self, _j: &str, _u: &Username, _t: &str) -> Result<bool, ErrorKind> {
            Ok(true)
        }
        async fn get_nodes(&self, _u: &Username, _t: &str) -> Result<Vec<Node>, ErrorKind> {
            Ok(vec![])
        }
        async fn get_partitions(&self, _u: &Username, _t: &str) -> Result<Vec<Partition>, ErrorKind> {
            Ok(vec![])
        }
        async fn get_reservations(&self, _u: &Username, _t: &str) -> Result<Vec<Reservation>, ErrorKind> {
            Ok(vec![])
        }
        async fn ping(&self, _u: &Username, _t: &str) -> Result<bool, ErrorKind> {
            Ok(true)
        }
    }

    fn test_cluster() -> Cluster {
        Cluster {
            name: ClusterName::from("daint"),
            ssh: SshEndpoint {
                host: "daint.example".into(),
                port: 22,
                proxy_host: None,
                proxy_port: 22,
                max_clients: 10,
                timeouts: SshTimeouts {
                    connect_secs: 5,
                    login_secs: 5,
                    execute_secs: 5,
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
            file_systems: vec![FilesystemMount {
                path: "/scratch".into(),
                data_type: FilesystemDataType::Scratch,
                default_work_dir: true,
            }],
            probing: None,
            datatransfer_jobs_directives: vec!["#SBATCH --account={account}".to_string()],
        }
    }

    fn orchestrator() -> TransferOrchestrator {
        TransferOrchestrator::new(
            Arc::new(FakeObjectStore::default()),
            Arc::new(CountingScheduler {
                submissions: AtomicUsize::new(0),
            }),
            TransferConfig {
                part_size_bytes: 2 * 1024 * 1024 * 1024,
                max_part_size_bytes: 2 * 1024 * 1024 * 1024,
                bucket_lifecycle_days: 7,
                tenant: None,
                egress_concurrency: 4,
            },
        )
    }

    #[tokio::test]
    async fn upload_of_5gib_mints_three_part_urls_and_one_complete_url() {
        let orch = orchestrator();
        let cluster = test_cluster();
        let result = orch
            .upload(
                &cluster,
                &Username::from("alice"),
                "tok",
                "/scratch/alice/f.bin",
                "f.bin",
                5 * 1024 * 1024 * 1024,
                Some("proj1"),
            )
            .await
            .unwrap();
        assert_eq!(result.parts_urls.len(), 3);
        assert_eq!(result.max_part_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(result.transfer_job.job_id, "job-0");
    }

    #[tokio::test]
    async fn upload_without_account_fails_when_directive_requires_one() {
        let orch = orchestrator();
        let cluster = test_cluster();
        let err = orch
            .upload(
                &cluster,
                &Username::from("alice"),
                "tok",
                "/scratch/alice/f.bin",
                "f.bin",
                1024,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ErrorKind::Validation(_)));
    }

    #[tokio::test]
    async fn mv_submits_a_job_without_touching_the_object_store() {
        let orch = orchestrator();
        let cluster = test_cluster();
        let job = orch
            .mv(&cluster, &Username::from("alice"), "tok", "/a", "/b", Some("proj1"))
            .await
            .unwrap();
        assert_eq!(job.job_id, "job-0");
    }
}
