//! Slurm shell backend: `sbatch`/`sacct`/`scontrol`/`scancel`/`srun`/`sinfo`
//! driven over an `ssh_pool::SshPool` session, using `commands::shell` for
//! quoting and error mapping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use commands::shell::{map_error, shell_quote, with_timeout};
use model::{ErrorKind, Job, JobDescription, JobMetadata, Username};
use once_cell::sync::Lazy;
use regex::Regex;
use ssh_pool::{SshError, SshPool};

use crate::decode::jobs_from_sacct;
use crate::{Node, Partition, Reservation, SchedulerAdapter};

const SACCT_FORMAT: &str = "JobID,AllocNodes,Cluster,ExitCode,Group,Account,JobName,NodeList,\
Partition,Priority,State,Reason,ElapsedRaw,Submit,Start,End,Suspended,TimelimitRaw,User,WorkDir";

static SUBMITTED_JOB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Submitted batch job (\d+)").expect("valid regex"));

static KV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w+)=(\S*)").expect("valid regex"));

pub struct SlurmShellClient {
    pool: Arc<SshPool>,
    command_timeout: Duration,
}

impl SlurmShellClient {
    pub fn new(pool: Arc<SshPool>, command_timeout: Duration) -> Self {
        Self { pool, command_timeout }
    }

    async fn exec(
        &self,
        user: &Username,
        token: &str,
        command: String,
        stdin: Option<Vec<u8>>,
    ) -> Result<(String, String, i32), ErrorKind> {
        let timeout = self.command_timeout;
        let out = self
            .pool
            .with_session(user, token, move |transport| {
                let command = command.clone();
                async move {
                    transport
                        .execute(&command, stdin, 5 * 1024 * 1024, timeout)
                        .await
                }
            })
            .await
            .map_err(ssh_err_to_error_kind)?;
        Ok((
            String::from_utf8_lossy(&out.stdout).into_owned(),
            String::from_utf8_lossy(&out.stderr).into_owned(),
            out.exit_status,
        ))
    }
}

fn ssh_err_to_error_kind(e: SshError) -> ErrorKind {
    e.into()
}

fn build_sbatch_command(description: &JobDescription) -> (String, Option<Vec<u8>>) {
    let mut args = Vec::new();
    // Preserved as-is per the recorded design decision: always exports the
    // caller's full environment alongside explicit K=V pairs.
    let mut export = vec!["ALL".to_string()];
    for (k, v) in &description.environment {
        export.push(format!("{k}={v}"));
    }
    args.push(format!("--export={}", shell_quote(&export.join(","))));
    args.push(format!("--chdir={}", shell_quote(&description.working_directory)));
    if let Some(name) = &description.name {
        args.push(format!("--job-name {}", shell_quote(name)));
    }
    if let Some(stderr) = &description.stderr {
        args.push(format!("--error {}", shell_quote(stderr)));
    }
    if let Some(stdout) = &description.stdout {
        args.push(format!("--output {}", shell_quote(stdout)));
    }
    if let Some(stdin) = &description.stdin {
        args.push(format!("--input {}", shell_quote(stdin)));
    }
    if let Some(constraints) = &description.constraints {
        args.push(format!("--constraint {}", shell_quote(constraints)));
    }
    if let Some(account) = &description.account {
        args.push(format!("--account {}", shell_quote(account)));
    }

    match &description.script_path {
        Some(path) => {
            args.push(format!("-- {}", shell_quote(path)));
            (format!("sbatch {}", args.join(" ")), None)
        }
        None => (
            format!("sbatch {}", args.join(" ")),
            description.script.clone().map(String::into_bytes),
        ),
    }
}

#[async_trait]
impl SchedulerAdapter for SlurmShellClient {
    async fn submit_job(
        &self,
        description: &JobDescription,
        user: &Username,
        token: &str,
    ) -> Result<String, ErrorKind> {
        let (command, stdin) = build_sbatch_command(description);
        let (stdout, stderr, exit_status) = self.exec(user, token, command, stdin).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        SUBMITTED_JOB_RE
            .captures(&stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ErrorKind::SchedulerInternal(format!("unparseable sbatch output: {stdout:?}")))
    }

    async fn attach_command(
        &self,
        command: &str,
        job_id: &str,
        user: &Username,
        token: &str,
    ) -> Result<(), ErrorKind> {
        let cmd = format!("srun --jobid={job_id} --overlap {command}");
        let (_stdout, stderr, exit_status) = self.exec(user, token, cmd, None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &str, user: &Username, token: &str) -> Result<Vec<Job>, ErrorKind> {
        let cmd = with_timeout(
            10,
            &format!("sacct -P --noheader --format={SACCT_FORMAT} -j {}", shell_quote(job_id)),
        );
        let (stdout, stderr, exit_status) = self.exec(user, token, cmd, None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        Ok(jobs_from_sacct(&stdout))
    }

    async fn get_jobs(
        &self,
        user: &Username,
        token: &str,
        all_users: bool,
    ) -> Result<Vec<Job>, ErrorKind> {
        let user_flag = if all_users {
            String::new()
        } else {
            format!("-u {} ", shell_quote(&user.0))
        };
        let cmd = with_timeout(
            10,
            &format!("sacct -P --noheader {user_flag}--format={SACCT_FORMAT}"),
        );
        let (stdout, stderr, exit_status) = self.exec(user, token, cmd, None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        Ok(jobs_from_sacct(&stdout))
    }

    async fn get_job_metadata(
        &self,
        job_id: &str,
        user: &Username,
        token: &str,
    ) -> Result<Vec<JobMetadata>, ErrorKind> {
        let show_cmd = with_timeout(10, &format!("scontrol show -o job {}", shell_quote(job_id)));
        let show = self.exec(user, token, show_cmd, None).await;

        let script_cmd = with_timeout(
            10,
            &format!("scontrol write batch_script {} -", shell_quote(job_id)),
        );
        let script = self.exec(user, token, script_cmd, None).await;

        match (show, script) {
            (Ok((show_out, show_err, show_status)), script_result) if show_status == 0 => {
                let _ = show_err;
                let fields = parse_kv(&show_out);
                let script_text = match script_result {
                    Ok((out, _, status)) if status == 0 => Some(out),
                    _ => None,
                };
                Ok(vec![JobMetadata {
                    job_id: job_id.to_string(),
                    stdin_path: fields.get("StdIn").cloned(),
                    stdout_path: fields.get("StdOut").cloned(),
                    stderr_path: fields.get("StdErr").cloned(),
                    script: script_text,
                }])
            }
            (Ok((_, show_err, show_status)), _) => {
                // scontrol failed; fall back to sacct-derived paths if it
                // succeeds, matching the documented fallback behavior.
                let sacct_cmd = with_timeout(
                    10,
                    &format!(
                        "sacct -P --noheader --format=JobID,StdIn,StdOut,StdErr -j {}",
                        shell_quote(job_id)
                    ),
                );
                let (out, err, status) = self.exec(user, token, sacct_cmd, None).await?;
                if status != 0 {
                    return Err(map_error(&show_err, show_status).unwrap_or(ErrorKind::Internal(err)));
                }
                let fields: Vec<&str> = out.lines().next().unwrap_or("").split('|').collect();
                Ok(vec![JobMetadata {
                    job_id: job_id.to_string(),
                    stdin_path: fields.get(1).map(|s| s.to_string()),
                    stdout_path: fields.get(2).map(|s| s.to_string()),
                    stderr_path: fields.get(3).map(|s| s.to_string()),
                    script: None,
                }])
            }
            (Err(e), _) => Err(e),
        }
    }

    async fn cancel_job(&self, job_id: &str, user: &Username, token: &str) -> Result<bool, ErrorKind> {
        let cmd = with_timeout(10, &format!("scancel --verbose {}", shell_quote(job_id)));
        let (_stdout, stderr, exit_status) = self.exec(user, token, cmd, None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        // Any `error:` line in stderr is a failure even on exit 0.
        Ok(!stderr.lines().any(|l| l.contains("error:")))
    }

    async fn get_nodes(&self, user: &Username, token: &str) -> Result<Vec<Node>, ErrorKind> {
        let cmd = with_timeout(
            10,
            "sinfo -N --noheader --format=%z|%c|%O|%e|%f|%N|%o|%n|%T|%R|%w|%v|%m|%C",
        );
        let (stdout, stderr, exit_status) = self.exec(user, token, cmd.to_string(), None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        Ok(nodes_from_sinfo(&stdout))
    }

    async fn get_partitions(&self, user: &Username, token: &str) -> Result<Vec<Partition>, ErrorKind> {
        let cmd = with_timeout(10, "scontrol show -o partitions");
        let (stdout, stderr, exit_status) = self.exec(user, token, cmd.to_string(), None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let fields = parse_kv(line);
                let name = fields.get("PartitionName").cloned().unwrap_or_default();
                Partition { name, fields }
            })
            .collect())
    }

    async fn get_reservations(
        &self,
        user: &Username,
        token: &str,
    ) -> Result<Vec<Reservation>, ErrorKind> {
        let cmd = with_timeout(10, "scontrol show -o reservations");
        let (stdout, stderr, exit_status) = self.exec(user, token, cmd.to_string(), None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let fields = parse_kv(line);
                let name = fields.get("ReservationName").cloned().unwrap_or_default();
                Reservation { name, fields }
            })
            .collect())
    }

    async fn ping(&self, user: &Username, token: &str) -> Result<bool, ErrorKind> {
        let cmd = with_timeout(10, "scontrol ping");
        let (stdout, stderr, exit_status) = self.exec(user, token, cmd.to_string(), None).await?;
        if exit_status != 0 {
            return Err(map_error(&stderr, exit_status).unwrap_or(ErrorKind::Internal(stderr)));
        }
        Ok(stdout.lines().all(|l| !l.to_uppercase().contains("DOWN")))
    }
}

fn parse_kv(line: &str) -> BTreeMap<String, String> {
    KV_RE
        .captures_iter(line)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

fn nodes_from_sinfo(stdout: &str) -> Vec<Node> {
    let mut by_name: BTreeMap<String, Node> = BTreeMap::new();
    for line in stdout.lines() {
        let f: Vec<&str> = line.split('|').collect();
        if f.len() < 14 {
            continue;
        }
        let name = f[7].to_string();
        let entry = by_name.entry(name.clone()).or_insert_with(|| Node {
            name: name.clone(),
            sockets_cores_threads: Some(f[0].to_string()),
            cpus: f[1].parse().ok(),
            cpu_load: f[2].parse().ok(),
            free_memory: f[3].parse().ok(),
            features: Some(f[4].to_string()),
            address: Some(f[5].to_string()),
            hostname: Some(f[6].to_string()),
            state: Some(f[8].to_string()),
            partitions: Vec::new(),
            weight: f[10].parse().ok(),
            slurmd_version: Some(f[11].to_string()),
            alloc_memory: f[12].parse().ok(),
            alloc_idle_cpus: Some(f[13].to_string()),
        });
        if !f[9].is_empty() && !entry.partitions.iter().any(|p| p == f[9]) {
            entry.partitions.push(f[9].to_string());
        }
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sbatch_command_always_includes_export_all() {
        let desc = JobDescription {
            working_directory: "/home/x".into(),
            script: Some("echo hi".into()),
            ..Default::default()
        };
        let (cmd, stdin) = build_sbatch_command(&desc);
        assert!(cmd.contains("--export='ALL'"));
        assert_eq!(stdin, Some(b"echo hi".to_vec()));
    }

    #[test]
    fn sbatch_command_uses_script_path_with_dash_dash() {
        let desc = JobDescription {
            working_directory: "/home/x".into(),
            script_path: Some("/tmp/run.sh".into()),
            ..Default::default()
        };
        let (cmd, stdin) = build_sbatch_command(&desc);
        assert!(cmd.contains("-- '/tmp/run.sh'"));
        assert_eq!(stdin, None);
    }

    #[test]
    fn parses_submitted_batch_job_id() {
        let caps = SUBMITTED_JOB_RE.captures("Submitted batch job 4567\n").unwrap();
        assert_eq!(&caps[1], "4567");
    }

    #[test]
    fn cancel_treats_error_line_in_stderr_as_failure_even_on_exit_zero() {
        let stderr = "scancel: error: Kill job error on job id 5: Invalid job id specified";
        assert!(stderr.lines().any(|l| l.contains("error:")));
    }

    #[test]
    fn nodes_from_sinfo_merges_partitions_by_node_name() {
        let row = "2:4:1|8|0.50|1000|avx|10.0.0.1|host1|node01|idle|partA|1|23.02|500|0-7";
        let row2 = "2:4:1|8|0.50|1000|avx|10.0.0.1|host1|node01|idle|partB|1|23.02|500|0-7";
        let stdout = format!("{row}\n{row2}\n");
        let nodes = nodes_from_sinfo(&stdout);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].partitions, vec!["partA", "partB"]);
    }
}
