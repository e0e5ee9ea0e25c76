//! Slurm REST backend: one authenticated HTTP request per call, with
//! version-sensitive payload shaping (environment shape at 0.0.39, script
//! placement at 0.0.41).

use async_trait::async_trait;
use model::{ErrorKind, Job, JobDescription, JobMetadata, Username};
use serde_json::{json, Value};

use crate::decode::job_from_rest;
use crate::{Node, Partition, Reservation, SchedulerAdapter};

/// Parsed Slurm REST API version, e.g. `0.0.40` → `(0, 0, 40)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion(pub u32, pub u32, pub u32);

impl ApiVersion {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        Some(Self(major, minor, patch))
    }
}

pub struct SlurmRestClient {
    pub base_url: String,
    pub api_version: ApiVersion,
    pub http: reqwest::Client,
}

impl SlurmRestClient {
    pub fn new(base_url: String, api_version: ApiVersion) -> Self {
        Self {
            base_url,
            api_version,
            http: reqwest::Client::new(),
        }
    }

    fn headers(&self, user: &Username, token: &str) -> Result<reqwest::header::HeaderMap, ErrorKind> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-SLURM-USER-NAME",
            user.0
                .as_str()
                .parse()
                .map_err(|_| ErrorKind::AuthToken("invalid username header value".into()))?,
        );
        headers.insert(
            "X-SLURM-USER-TOKEN",
            token
                .parse()
                .map_err(|_| ErrorKind::AuthToken("invalid token header value".into()))?,
        );
        Ok(headers)
    }

    fn job_submit_payload(&self, description: &JobDescription) -> Value {
        let environment: Value = if self.api_version >= ApiVersion(0, 0, 39) {
            Value::Array(
                description
                    .environment
                    .iter()
                    .map(|(k, v)| {
                        if v.is_empty() {
                            Value::String(k.clone())
                        } else {
                            Value::String(format!("{k}={v}"))
                        }
                    })
                    .collect(),
            )
        } else {
            let map: serde_json::Map<String, Value> = description
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Value::Object(map)
        };

        let mut job = serde_json::Map::new();
        if let Some(name) = &description.name {
            job.insert("name".into(), json!(name));
        }
        job.insert(
            "current_working_directory".into(),
            json!(description.working_directory),
        );
        job.insert("environment".into(), environment);
        if let Some(account) = &description.account {
            job.insert("account".into(), json!(account));
        }
        if let Some(stdin) = &description.stdin {
            job.insert("standard_input".into(), json!(stdin));
        }
        if let Some(stdout) = &description.stdout {
            job.insert("standard_output".into(), json!(stdout));
        }
        if let Some(stderr) = &description.stderr {
            job.insert("standard_error".into(), json!(stderr));
        }
        if let Some(constraints) = &description.constraints {
            job.insert("constraints".into(), json!(constraints));
        }

        let script = description.script.clone().unwrap_or_default();
        if self.api_version >= ApiVersion(0, 0, 41) {
            job.insert("script".into(), json!(script));
            json!({ "job": Value::Object(job) })
        } else {
            json!({ "job": Value::Object(job), "script": script })
        }
    }

    async fn get_json(&self, path: &str, user: &Username, token: &str) -> Result<Value, ErrorKind> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .headers(self.headers(user, token)?)
            .send()
            .await
            .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
        self.decode_response(resp).await
    }

    async fn decode_response(&self, resp: reqwest::Response) -> Result<Value, ErrorKind> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(ErrorKind::SchedulerInternal(body));
        }
        serde_json::from_str(&body)
            .map_err(|e| ErrorKind::SchedulerInternal(format!("unparseable response: {e}: {body}")))
    }
}

#[async_trait]
impl SchedulerAdapter for SlurmRestClient {
    async fn submit_job(
        &self,
        description: &JobDescription,
        user: &Username,
        token: &str,
    ) -> Result<String, ErrorKind> {
        let payload = self.job_submit_payload(description);
        let resp = self
            .http
            .post(format!(
                "{}/slurm/v{}.{}.{}/job/submit",
                self.base_url, self.api_version.0, self.api_version.1, self.api_version.2
            ))
            .headers(self.headers(user, token)?)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
        let body = self.decode_response(resp).await?;
        body.get("job_id")
            .map(|v| v.to_string())
            .ok_or_else(|| ErrorKind::SchedulerInternal("response missing job_id".into()))
    }

    async fn attach_command(
        &self,
        _command: &str,
        _job_id: &str,
        _user: &Username,
        _token: &str,
    ) -> Result<(), ErrorKind> {
        Err(ErrorKind::NotImplemented(
            "attachCommand is not exposed by the Slurm REST API".into(),
        ))
    }

    async fn get_job(&self, job_id: &str, user: &Username, token: &str) -> Result<Vec<Job>, ErrorKind> {
        let body = self
            .get_json(
                &format!(
                    "/slurmdb/v{}.{}.{}/job/{job_id}",
                    self.api_version.0, self.api_version.1, self.api_version.2
                ),
                user,
                token,
            )
            .await?;
        let jobs = body
            .get("jobs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(job_from_rest).collect())
            .unwrap_or_default();
        Ok(jobs)
    }

    async fn get_jobs(
        &self,
        user: &Username,
        token: &str,
        _all_users: bool,
    ) -> Result<Vec<Job>, ErrorKind> {
        let body = self
            .get_json(
                &format!(
                    "/slurmdb/v{}.{}.{}/jobs",
                    self.api_version.0, self.api_version.1, self.api_version.2
                ),
                user,
                token,
            )
            .await?;
        let jobs = body
            .get("jobs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(job_from_rest).collect())
            .unwrap_or_default();
        Ok(jobs)
    }

    async fn get_job_metadata(
        &self,
        _job_id: &str,
        _user: &Username,
        _token: &str,
    ) -> Result<Vec<JobMetadata>, ErrorKind> {
        Err(ErrorKind::NotImplemented(
            "the Slurm REST API does not expose stdout/stderr/script paths".into(),
        ))
    }

    async fn cancel_job(&self, job_id: &str, user: &Username, token: &str) -> Result<bool, ErrorKind> {
        let resp = self
            .http
            .delete(format!(
                "{}/slurm/v{}.{}.{}/job/{job_id}",
                self.base_url, self.api_version.0, self.api_version.1, self.api_version.2
            ))
            .headers(self.headers(user, token)?)
            .send()
            .await
            .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
        // Preserved as-is: HTTP 200 means success without inspecting the
        // body's errors[] field, matching the described behavior.
        Ok(resp.status().is_success())
    }

    async fn get_nodes(&self, user: &Username, token: &str) -> Result<Vec<Node>, ErrorKind> {
        let body = self
            .get_json(
                &format!("/slurm/v{}.{}.{}/nodes", self.api_version.0, self.api_version.1, self.api_version.2),
                user,
                token,
            )
            .await?;
        let nodes = body
            .get("nodes")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(node_from_rest).collect())
            .unwrap_or_default();
        Ok(nodes)
    }

    async fn get_partitions(&self, user: &Username, token: &str) -> Result<Vec<Partition>, ErrorKind> {
        let body = self
            .get_json(
                &format!(
                    "/slurm/v{}.{}.{}/partitions",
                    self.api_version.0, self.api_version.1, self.api_version.2
                ),
                user,
                token,
            )
            .await?;
        let partitions = body
            .get("partitions")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| {
                        let (name, fields) = name_and_fields(v);
                        Partition { name, fields }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(partitions)
    }

    async fn get_reservations(
        &self,
        user: &Username,
        token: &str,
    ) -> Result<Vec<Reservation>, ErrorKind> {
        let body = self
            .get_json(
                &format!(
                    "/slurm/v{}.{}.{}/reservations",
                    self.api_version.0, self.api_version.1, self.api_version.2
                ),
                user,
                token,
            )
            .await?;
        let reservations = body
            .get("reservations")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| {
                        let (name, fields) = name_and_fields(v);
                        Reservation { name, fields }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(reservations)
    }

    async fn ping(&self, user: &Username, token: &str) -> Result<bool, ErrorKind> {
        let body = self
            .get_json(
                &format!("/slurm/v{}.{}.{}/ping", self.api_version.0, self.api_version.1, self.api_version.2),
                user,
                token,
            )
            .await?;
        let pings = body.get("pings").and_then(Value::as_array);
        match pings {
            Some(pings) => Ok(pings
                .iter()
                .all(|p| p.get("pinged").and_then(Value::as_str) == Some("UP"))),
            None => Ok(false),
        }
    }
}

fn node_from_rest(v: &Value) -> Node {
    Node {
        name: v.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        sockets_cores_threads: v.get("sockets").and_then(Value::as_str).map(String::from),
        cpus: v.get("cpus").and_then(Value::as_i64),
        cpu_load: v.get("cpu_load").and_then(Value::as_f64),
        free_memory: v.get("free_mem").and_then(Value::as_i64),
        features: v.get("features").and_then(Value::as_str).map(String::from),
        address: v.get("address").and_then(Value::as_str).map(String::from),
        hostname: v.get("hostname").and_then(Value::as_str).map(String::from),
        state: v
            .get("state")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(String::from),
        partitions: v
            .get("partitions")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default(),
        weight: v.get("weight").and_then(Value::as_i64),
        slurmd_version: v.get("slurmd_version").and_then(Value::as_str).map(String::from),
        alloc_memory: v.get("alloc_memory").and_then(Value::as_i64),
        alloc_idle_cpus: v.get("alloc_idle_cpus").and_then(Value::as_str).map(String::from),
    }
}

fn name_and_fields(v: &Value) -> (String, std::collections::BTreeMap<String, String>) {
    let name = v.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    let fields = match v {
        Value::Object(map) => map
            .iter()
            .map(|(k, val)| (k.clone(), val.to_string()))
            .collect(),
        _ => Default::default(),
    };
    (name, fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_is_list_at_or_above_0_0_39() {
        let client = SlurmRestClient::new("http://x".into(), ApiVersion(0, 0, 40));
        let desc = JobDescription {
            name: Some("test1".into()),
            working_directory: "/home/test1".into(),
            environment: vec![("F7T_version".into(), "v2.0.0".into())],
            script: Some("#!/bin/bash\necho hi".into()),
            ..Default::default()
        };
        let payload = client.job_submit_payload(&desc);
        assert_eq!(
            payload,
            json!({
                "job": {
                    "name": "test1",
                    "current_working_directory": "/home/test1",
                    "environment": ["F7T_version=v2.0.0"]
                },
                "script": "#!/bin/bash\necho hi"
            })
        );
    }

    #[test]
    fn environment_is_map_below_0_0_39() {
        let client = SlurmRestClient::new("http://x".into(), ApiVersion(0, 0, 38));
        let desc = JobDescription {
            working_directory: "/home/x".into(),
            environment: vec![("A".into(), "B".into())],
            script: Some("echo".into()),
            ..Default::default()
        };
        let payload = client.job_submit_payload(&desc);
        assert_eq!(payload["job"]["environment"], json!({"A": "B"}));
    }

    #[test]
    fn script_is_sibling_field_below_0_0_41() {
        let client = SlurmRestClient::new("http://x".into(), ApiVersion(0, 0, 40));
        let desc = JobDescription {
            working_directory: "/home/x".into(),
            script: Some("echo".into()),
            ..Default::default()
        };
        let payload = client.job_submit_payload(&desc);
        assert_eq!(payload["script"], json!("echo"));
        assert!(payload["job"].get("script").is_none());
    }

    #[test]
    fn script_is_embedded_at_or_above_0_0_41() {
        let client = SlurmRestClient::new("http://x".into(), ApiVersion(0, 0, 41));
        let desc = JobDescription {
            working_directory: "/home/x".into(),
            script: Some("echo".into()),
            ..Default::default()
        };
        let payload = client.job_submit_payload(&desc);
        assert_eq!(payload["job"]["script"], json!("echo"));
        assert!(payload.get("script").is_none());
    }
}
