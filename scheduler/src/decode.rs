//! Explicit decoder functions per source format, converging on the neutral
//! `model::Job`. Kept separate rather than one polymorphic constructor, per
//! the design note about replacing dynamic object initialisation with
//! explicit per-version decoders.

use model::{Job, JobState, JobStatus, JobTime, Task};
use serde_json::Value;

/// Decodes the Slurm `{set, infinite, number}` integer envelope (or a plain
/// number, for older API versions) used for `exitCode`/time fields/priority.
/// `set=false` yields `None`.
pub fn slurm_int_to_int(v: &Value) -> Option<i64> {
    match v {
        Value::Null => None,
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => {
            let set = map.get("set").and_then(Value::as_bool).unwrap_or(true);
            if !set {
                return None;
            }
            map.get("number").and_then(Value::as_i64)
        }
        _ => None,
    }
}

fn state_from_str(s: &str) -> JobState {
    match s.to_ascii_uppercase().as_str() {
        "PENDING" => JobState::Pending,
        "RUNNING" => JobState::Running,
        "COMPLETED" => JobState::Completed,
        "CANCELLED" => JobState::Cancelled,
        "FAILED" => JobState::Failed,
        "TIMEOUT" => JobState::Timeout,
        "NODE_FAIL" => JobState::NodeFail,
        _ => JobState::Unknown,
    }
}

/// Decodes one REST `jobs[]` element (Slurm REST `/slurmdb/v{api}/job(s)`
/// response shape) into a neutral `Job`.
pub fn job_from_rest(v: &Value) -> Job {
    let state = v
        .get("job_state")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(Value::as_str)
        .map(state_from_str)
        .unwrap_or_default();

    let exit_code = v
        .get("exit_code")
        .and_then(|ec| ec.get("return_code"))
        .and_then(slurm_int_to_int)
        .map(|n| n as i32);
    let signal = v
        .get("exit_code")
        .and_then(|ec| ec.get("signal"))
        .and_then(|s| s.get("id"))
        .and_then(slurm_int_to_int)
        .map(|n| n as i32);

    Job {
        job_id: v
            .get("job_id")
            .map(|n| n.to_string())
            .unwrap_or_default(),
        name: v.get("name").and_then(Value::as_str).map(String::from),
        status: JobStatus {
            state,
            reason: v.get("state_reason").and_then(Value::as_str).map(String::from),
            exit_code,
            signal,
        },
        time: JobTime {
            elapsed: v.get("time").and_then(|t| t.get("elapsed")).and_then(slurm_int_to_int),
            start: v.get("time").and_then(|t| t.get("start")).and_then(slurm_int_to_int),
            end: v.get("time").and_then(|t| t.get("end")).and_then(slurm_int_to_int),
            suspended: v
                .get("time")
                .and_then(|t| t.get("suspended"))
                .and_then(slurm_int_to_int),
            limit: v.get("time").and_then(|t| t.get("limit")).and_then(slurm_int_to_int),
        },
        account: v.get("account").and_then(Value::as_str).map(String::from),
        allocation_nodes: v.get("node_count").and_then(slurm_int_to_int),
        cluster: v.get("cluster").and_then(Value::as_str).map(String::from),
        group: v.get("group").and_then(Value::as_str).map(String::from),
        nodes: v.get("nodes").and_then(Value::as_str).map(String::from),
        partition: v.get("partition").and_then(Value::as_str).map(String::from),
        user: v.get("user").and_then(Value::as_str).map(String::from),
        working_directory: v
            .get("current_working_directory")
            .and_then(Value::as_str)
            .map(String::from),
        priority: v.get("priority").and_then(slurm_int_to_int),
        tasks: Vec::new(),
    }
}

/// One `sacct` row, already split on `|` into the fixed 20-field order.
pub struct SacctRow<'a> {
    pub fields: Vec<&'a str>,
}

const SACCT_FIELDS: [&str; 20] = [
    "JobID", "AllocNodes", "Cluster", "ExitCode", "Group", "Account", "JobName", "NodeList",
    "Partition", "Priority", "State", "Reason", "ElapsedRaw", "Submit", "Start", "End",
    "Suspended", "TimelimitRaw", "User", "WorkDir",
];

impl<'a> SacctRow<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != SACCT_FIELDS.len() {
            return None;
        }
        Some(Self { fields })
    }

    fn field(&self, name: &str) -> &'a str {
        let idx = SACCT_FIELDS.iter().position(|f| *f == name).expect("known field");
        self.fields[idx]
    }

    pub fn is_step(&self) -> bool {
        self.field("JobID").contains('.')
    }

    pub fn main_job_id(&self) -> &'a str {
        self.field("JobID").split('.').next().unwrap_or("")
    }
}

fn datestr_to_epoch(s: &str) -> Option<i64> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

fn timestr_to_seconds(s: &str) -> Option<i64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let h: i64 = parts[0].parse().ok()?;
    let m: i64 = parts[1].parse().ok()?;
    let sec: i64 = parts[2].parse().ok()?;
    Some(h * 3600 + m * 60 + sec)
}

fn exit_code_and_signal(raw: &str) -> (Option<i32>, Option<i32>) {
    let mut parts = raw.split(':');
    let code = parts.next().and_then(|s| s.parse().ok());
    let signal = parts.next().and_then(|s| s.parse().ok());
    (code, signal)
}

/// Decodes one `sacct` job row into the neutral `Job`, attaching step rows
/// as `Task`s by matching `main_job_id`. Assumes job rows precede their step
/// rows in the input, matching `sacct`'s natural output order.
pub fn jobs_from_sacct(stdout: &str) -> Vec<Job> {
    let mut jobs: Vec<Job> = Vec::new();

    for line in stdout.lines() {
        let Some(row) = SacctRow::parse(line) else {
            continue;
        };

        if row.is_step() {
            if let Some(job) = jobs.iter_mut().find(|j| j.job_id == row.main_job_id()) {
                job.tasks.push(task_from_sacct(&row));
            }
            continue;
        }

        jobs.push(job_from_sacct(&row));
    }

    jobs
}

fn job_from_sacct(row: &SacctRow<'_>) -> Job {
    let (exit_code, signal) = exit_code_and_signal(row.field("ExitCode"));
    Job {
        job_id: row.field("JobID").to_string(),
        name: non_empty(row.field("JobName")),
        status: JobStatus {
            state: state_from_str(row.field("State")),
            reason: non_empty(row.field("Reason")),
            exit_code,
            signal,
        },
        time: JobTime {
            elapsed: row.field("ElapsedRaw").parse().ok(),
            start: datestr_to_epoch(row.field("Start")),
            end: datestr_to_epoch(row.field("End")),
            suspended: timestr_to_seconds(row.field("Suspended")),
            limit: row.field("TimelimitRaw").parse().ok(),
        },
        account: non_empty(row.field("Account")),
        allocation_nodes: row.field("AllocNodes").parse().ok(),
        cluster: non_empty(row.field("Cluster")),
        group: non_empty(row.field("Group")),
        nodes: non_empty(row.field("NodeList")),
        partition: non_empty(row.field("Partition")),
        user: non_empty(row.field("User")),
        working_directory: non_empty(row.field("WorkDir")),
        priority: row.field("Priority").parse().ok(),
        tasks: Vec::new(),
    }
}

fn task_from_sacct(row: &SacctRow<'_>) -> Task {
    let (exit_code, signal) = exit_code_and_signal(row.field("ExitCode"));
    Task {
        job_id: row.field("JobID").to_string(),
        name: non_empty(row.field("JobName")),
        status: JobStatus {
            state: state_from_str(row.field("State")),
            reason: non_empty(row.field("Reason")),
            exit_code,
            signal,
        },
        time: JobTime {
            elapsed: row.field("ElapsedRaw").parse().ok(),
            start: datestr_to_epoch(row.field("Start")),
            end: datestr_to_epoch(row.field("End")),
            suspended: timestr_to_seconds(row.field("Suspended")),
            limit: row.field("TimelimitRaw").parse().ok(),
        },
        allocation_nodes: row.field("AllocNodes").parse().ok(),
        nodes: non_empty(row.field("NodeList")),
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slurm_int_decodes_set_false_as_none() {
        let v = json!({"set": false, "infinite": false, "number": 5});
        assert_eq!(slurm_int_to_int(&v), None);
    }

    #[test]
    fn slurm_int_decodes_plain_number() {
        assert_eq!(slurm_int_to_int(&json!(42)), Some(42));
    }

    #[test]
    fn slurm_int_decodes_set_true_object() {
        let v = json!({"set": true, "infinite": false, "number": 7});
        assert_eq!(slurm_int_to_int(&v), Some(7));
    }

    #[test]
    fn sacct_step_rows_attach_to_owning_job() {
        let header_job = "100|1|c|0:0|g|a|name|n1|p|1|RUNNING||10|2024-01-02T03:04:05|2024-01-02T03:04:05|2024-01-02T03:05:05|00:00:00|60|u|/home/u";
        let step = "100.0|1|c|0:0|g|a|name|n1|p|1|RUNNING||10|2024-01-02T03:04:05|2024-01-02T03:04:05|2024-01-02T03:05:05|00:00:00|60|u|/home/u";
        let stdout = format!("{header_job}\n{step}\n");
        let jobs = jobs_from_sacct(&stdout);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].tasks.len(), 1);
        assert_eq!(jobs[0].tasks[0].job_id, "100.0");
    }
}
