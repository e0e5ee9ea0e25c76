//! Scheduler Adapter: one scheduler-neutral interface over two Slurm
//! backends (REST API, shell-over-SSH), unified by a composite routing
//! client. PBS is referenced as planned; `pbs` only stubs the seam.

pub mod composite;
pub mod decode;
pub mod pbs;
pub mod rest;
pub mod shell;

use async_trait::async_trait;
use model::{ErrorKind, Job, JobDescription, JobMetadata, Username};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub sockets_cores_threads: Option<String>,
    pub cpus: Option<i64>,
    pub cpu_load: Option<f64>,
    pub free_memory: Option<i64>,
    pub features: Option<String>,
    pub address: Option<String>,
    pub hostname: Option<String>,
    pub state: Option<String>,
    pub partitions: Vec<String>,
    pub weight: Option<i64>,
    pub slurmd_version: Option<String>,
    pub alloc_memory: Option<i64>,
    pub alloc_idle_cpus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub name: String,
    pub fields: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub fields: std::collections::BTreeMap<String, String>,
}

/// Scheduler-neutral interface. Every call is user-scoped: the caller always
/// supplies the end user's identity and access token, never a service
/// credential (the health checker's `ping` call is the one exception, using
/// the service account instead).
#[async_trait]
pub trait SchedulerAdapter: Send + Sync {
    async fn submit_job(
        &self,
        description: &JobDescription,
        user: &Username,
        token: &str,
    ) -> Result<String, ErrorKind>;

    async fn attach_command(
        &self,
        command: &str,
        job_id: &str,
        user: &Username,
        token: &str,
    ) -> Result<(), ErrorKind>;

    async fn get_job(&self, job_id: &str, user: &Username, token: &str) -> Result<Vec<Job>, ErrorKind>;

    async fn get_jobs(
        &self,
        user: &Username,
        token: &str,
        all_users: bool,
    ) -> Result<Vec<Job>, ErrorKind>;

    async fn get_job_metadata(
        &self,
        job_id: &str,
        user: &Username,
        token: &str,
    ) -> Result<Vec<JobMetadata>, ErrorKind>;

    async fn cancel_job(&self, job_id: &str, user: &Username, token: &str) -> Result<bool, ErrorKind>;

    async fn get_nodes(&self, user: &Username, token: &str) -> Result<Vec<Node>, ErrorKind>;

    async fn get_partitions(&self, user: &Username, token: &str) -> Result<Vec<Partition>, ErrorKind>;

    async fn get_reservations(&self, user: &Username, token: &str) -> Result<Vec<Reservation>, ErrorKind>;

    async fn ping(&self, user: &Username, token: &str) -> Result<bool, ErrorKind>;
}
