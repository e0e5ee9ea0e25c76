//! PBS backend stub. The glossary names PBS as planned; nothing in spec.md
//! describes its command shapes or payloads, so this only shows the seam —
//! every call fails with `NotImplemented` rather than inventing semantics.

use async_trait::async_trait;
use model::{ErrorKind, Job, JobDescription, JobMetadata, Username};

use crate::{Node, Partition, Reservation, SchedulerAdapter};

pub struct PbsClient;

fn not_implemented() -> ErrorKind {
    ErrorKind::NotImplemented("PBS scheduler support is not implemented".into())
}

#[async_trait]
impl SchedulerAdapter for PbsClient {
    async fn submit_job(
        &self,
        _description: &JobDescription,
        _user: &Username,
        _token: &str,
    ) -> Result<String, ErrorKind> {
        Err(not_implemented())
    }

    async fn attach_command(
        &self,
        _command: &str,
        _job_id: &str,
        _user: &Username,
        _token: &str,
    ) -> Result<(), ErrorKind> {
        Err(not_implemented())
    }

    async fn get_job(&self, _job_id: &str, _user: &Username, _token: &str) -> Result<Vec<Job>, ErrorKind> {
        Err(not_implemented())
    }

    async fn get_jobs(
        &self,
        _user: &Username,
        _token: &str,
        _all_users: bool,
    ) -> Result<Vec<Job>, ErrorKind> {
        Err(not_implemented())
    }

    async fn get_job_metadata(
        &self,
        _job_id: &str,
        _user: &Username,
        _token: &str,
    ) -> Result<Vec<JobMetadata>, ErrorKind> {
        Err(not_implemented())
    }

    async fn cancel_job(&self, _job_id: &str, _user: &Username, _token: &str) -> Result<bool, ErrorKind> {
        Err(not_implemented())
    }

    async fn get_nodes(&self, _user: &Username, _token: &str) -> Result<Vec<Node>, ErrorKind> {
        Err(not_implemented())
    }

    async fn get_partitions(&self, _user: &Username, _token: &str) -> Result<Vec<Partition>, ErrorKind> {
        Err(not_implemented())
    }

    async fn get_reservations(
        &self,
        _user: &Username,
        _token: &str,
    ) -> Result<Vec<Reservation>, ErrorKind> {
        Err(not_implemented())
    }

    async fn ping(&self, _user: &Username, _token: &str) -> Result<bool, ErrorKind> {
        Err(not_implemented())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_is_not_implemented() {
        let client = PbsClient;
        let err = client.ping(&Username::from("alice"), "t").await.unwrap_err();
        assert!(matches!(err, ErrorKind::NotImplemented(_)));
    }
}
