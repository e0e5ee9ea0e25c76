//! Scheduler-neutral data model shared by every execution-plane crate.
//!
//! Kept deliberately dumb: plain data, `serde` round-trips, no I/O. Decoding
//! from a particular scheduler wire format lives in the `scheduler` crate, not
//! here, per the "one neutral model, explicit per-format decoders" rule.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Interned cluster name. Cheap to clone, used as a map key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterName(pub SmolStr);

impl From<&str> for ClusterName {
    fn from(s: &str) -> Self {
        ClusterName(SmolStr::new(s))
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// End-user identity as asserted by the access token. Never looked up in a
/// local database — there is none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Username(pub SmolStr);

impl From<&str> for Username {
    fn from(s: &str) -> Self {
        Username(SmolStr::new(s))
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilesystemDataType {
    Users,
    Store,
    Archive,
    Apps,
    Scratch,
    Project,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemMount {
    pub path: String,
    pub data_type: FilesystemDataType,
    #[serde(default)]
    pub default_work_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    Slurm,
    /// Referenced by the glossary as planned; no concrete payload shaping is
    /// specified, so this variant only exists so configuration can name it.
    Pbs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerDescriptor {
    #[serde(rename = "type")]
    pub kind: SchedulerType,
    pub version: Option<String>,
    pub api_url: Option<String>,
    pub api_version: Option<String>,
    #[serde(default = "default_scheduler_timeout")]
    pub timeout_secs: u64,
}

fn default_scheduler_timeout() -> u64 {
    10
}

/// The five distinct SSH timeouts named in the cluster record. Ordering
/// invariant `keep_alive < execute < idle` is enforced by `SshTimeouts::validate`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshTimeouts {
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,
    #[serde(default = "default_login_timeout")]
    pub login_secs: u64,
    #[serde(default = "default_execute_timeout")]
    pub execute_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_secs: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}
fn default_login_timeout() -> u64 {
    5
}
fn default_execute_timeout() -> u64 {
    5
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_keep_alive() -> u64 {
    5
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "SSH timeout ordering invariant violated: keep_alive ({keep_alive}) < execute ({execute}) < idle ({idle}) must hold"
    )]
    TimeoutOrdering {
        keep_alive: u64,
        execute: u64,
        idle: u64,
    },
    #[error("cluster {0:?} has more than one filesystem mount marked defaultWorkDir")]
    MultipleDefaultWorkDirs(ClusterName),
}

impl SshTimeouts {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.keep_alive_secs < self.execute_secs && self.execute_secs < self.idle_secs) {
            return Err(ConfigError::TimeoutOrdering {
                keep_alive: self.keep_alive_secs,
                execute: self.execute_secs,
                idle: self.idle_secs,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshEndpoint {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub proxy_host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub proxy_port: u16,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    pub timeouts: SshTimeouts,
}

fn default_ssh_port() -> u16 {
    22
}
fn default_max_clients() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub client_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterProbing {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

/// Immutable cluster configuration record. Read-only after load; health
/// samples are tracked in a separate owned structure (`health::HealthStore`),
/// never mutated onto this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: ClusterName,
    pub ssh: SshEndpoint,
    pub scheduler: SchedulerDescriptor,
    pub service_account: ServiceAccount,
    #[serde(default)]
    pub file_systems: Vec<FilesystemMount>,
    pub probing: Option<ClusterProbing>,
    /// May contain the literal `{account}` placeholder, substituted at
    /// transfer-job submission time.
    #[serde(default)]
    pub datatransfer_jobs_directives: Vec<String>,
}

impl Cluster {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ssh.timeouts.validate()?;
        let defaults = self.file_systems.iter().filter(|fs| fs.default_work_dir).count();
        if defaults > 1 {
            return Err(ConfigError::MultipleDefaultWorkDirs(self.name.clone()));
        }
        Ok(())
    }

    pub fn default_work_dir(&self) -> Option<&FilesystemMount> {
        self.file_systems.iter().find(|fs| fs.default_work_dir)
    }
}

/// `(privateKey, optionalPublicCertificate, optionalPassphrase)`. Short-lived;
/// never persisted; owned by the request that fetched it unless the pool
/// keeps the session it unlocked alive for reuse.
#[derive(Clone)]
pub struct CredentialMaterial {
    pub private_key_pem: SecretString,
    pub public_certificate: Option<String>,
    pub passphrase: Option<SecretString>,
}

/// Wrapper that redacts its contents from `Debug`/`Display`, matching the
/// pack's "secrets never enter logs" convention.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    NodeFail,
    Unknown,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Unknown
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub reason: Option<String>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTime {
    pub elapsed: Option<i64>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub suspended: Option<i64>,
    pub limit: Option<i64>,
}

/// Step of a job. Structurally identical to `Job` minus nested tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub job_id: String,
    pub name: Option<String>,
    pub status: JobStatus,
    pub time: JobTime,
    pub allocation_nodes: Option<i64>,
    pub nodes: Option<String>,
}

/// Scheduler-neutral job view, converged from either the Slurm REST payload
/// or the `sacct`/`scontrol` textual output by dedicated decoders in the
/// `scheduler` crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub name: Option<String>,
    pub status: JobStatus,
    pub time: JobTime,
    pub account: Option<String>,
    pub allocation_nodes: Option<i64>,
    pub cluster: Option<String>,
    pub group: Option<String>,
    pub nodes: Option<String>,
    pub partition: Option<String>,
    pub user: Option<String>,
    pub working_directory: Option<String>,
    pub priority: Option<i64>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: String,
    pub stdin_path: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub script: Option<String>,
}

/// Job submission input. Exactly one of `script`/`script_path` must be set;
/// `script_path` forces the shell-over-SSH path regardless of scheduler
/// capability (see `scheduler::composite`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDescription {
    pub name: Option<String>,
    pub account: Option<String>,
    pub working_directory: String,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    #[serde(default)]
    pub environment: Vec<(String, String)>,
    pub constraints: Option<String>,
    pub script: Option<String>,
    pub script_path: Option<String>,
}

impl JobDescription {
    pub fn validate(&self) -> Result<(), ErrorKind> {
        match (&self.script, &self.script_path) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ErrorKind::Validation(
                "exactly one of script or scriptPath must be set".into(),
            )),
        }
    }
}

/// Created synchronously by the transfer orchestrator; the actual data
/// motion runs later, on the cluster, under the issuing user's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    pub job_id: String,
    pub cluster: ClusterName,
    pub working_directory: String,
    pub output_log_path: String,
    pub error_log_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Scheduler,
    Filesystem,
    Ssh,
    S3,
    Exception,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub service_type: ServiceType,
    #[serde(with = "humantime_serde_system_time")]
    pub last_checked: SystemTime,
    pub latency_secs: f64,
    pub healthy: bool,
    pub message: Option<String>,
    /// Only set for `ServiceType::Filesystem` samples.
    pub path: Option<String>,
}

/// `serde` doesn't know `SystemTime` as RFC3339 out of the box; this mirrors
/// the shape `humantime_serde` uses for `Duration` but for an instant.
mod humantime_serde_system_time {
    use super::SystemTime;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::UNIX_EPOCH;

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?
            .as_secs_f64();
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs_f64(secs))
    }
}

/// Error kinds, scheduler-neutral, mapped to an HTTP status by exactly one
/// central mapper (`gateway::admission::map_error`). No component may map its
/// own errors to an HTTP status.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("output too large: {0}")]
    OutputTooLarge(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("scheduler error: {0}")]
    SchedulerInternal(String),
    #[error("auth token invalid: {0}")]
    AuthToken(String),
    #[error("credential missing: {0}")]
    CredentialMissing(String),
    #[error("precondition required: {0}")]
    PreconditionRequired(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Matches §6's status code table exactly.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound(_) => 404,
            ErrorKind::Forbidden(_) => 403,
            ErrorKind::Conflict(_) => 400,
            ErrorKind::BadRequest(_) => 400,
            ErrorKind::Validation(_) => 400,
            ErrorKind::Timeout(_) => 408,
            ErrorKind::OutputTooLarge(_) => 413,
            ErrorKind::UpstreamUnavailable(_) => 424,
            ErrorKind::SchedulerInternal(_) => 503,
            ErrorKind::AuthToken(_) => 400,
            ErrorKind::CredentialMissing(_) => 400,
            ErrorKind::PreconditionRequired(_) => 428,
            ErrorKind::NotImplemented(_) => 501,
            ErrorKind::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_ordering_rejects_equal_bounds() {
        let t = SshTimeouts {
            connect_secs: 5,
            login_secs: 5,
            execute_secs: 5,
            idle_secs: 5,
            keep_alive_secs: 5,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn timeout_ordering_accepts_strictly_increasing() {
        let t = SshTimeouts {
            connect_secs: 5,
            login_secs: 5,
            execute_secs: 5,
            idle_secs: 60,
            keep_alive_secs: 5,
        };
        assert!(t.validate().is_ok());
    }

    #[test]
    fn error_kind_status_codes_match_spec_table() {
        assert_eq!(ErrorKind::NotFound("x".into()).http_status(), 404);
        assert_eq!(ErrorKind::Forbidden("x".into()).http_status(), 403);
        assert_eq!(ErrorKind::Conflict("x".into()).http_status(), 400);
        assert_eq!(ErrorKind::Timeout("x".into()).http_status(), 408);
        assert_eq!(ErrorKind::OutputTooLarge("x".into()).http_status(), 413);
        assert_eq!(ErrorKind::UpstreamUnavailable("x".into()).http_status(), 424);
        assert_eq!(ErrorKind::SchedulerInternal("x".into()).http_status(), 503);
        assert_eq!(ErrorKind::PreconditionRequired("x".into()).http_status(), 428);
        assert_eq!(ErrorKind::NotImplemented("x".into()).http_status(), 501);
    }

    #[test]
    fn job_description_requires_exactly_one_of_script_or_path() {
        let mut jd = JobDescription {
            working_directory: "/home/x".into(),
            ..Default::default()
        };
        assert!(jd.validate().is_err());
        jd.script = Some("echo hi".into());
        assert!(jd.validate().is_ok());
        jd.script_path = Some("/tmp/s.sh".into());
        assert!(jd.validate().is_err());
    }
}
