//! Composite routing client: one REST client (if configured) plus always a
//! shell client, routed per call per the rules in the component contract.

use async_trait::async_trait;
use model::{ErrorKind, Job, JobDescription, JobMetadata, Username};

use crate::{Node, Partition, Reservation, SchedulerAdapter};

pub struct CompositeSchedulerClient {
    rest: Option<Box<dyn SchedulerAdapter>>,
    shell: Box<dyn SchedulerAdapter>,
}

impl CompositeSchedulerClient {
    pub fn new(rest: Option<Box<dyn SchedulerAdapter>>, shell: Box<dyn SchedulerAdapter>) -> Self {
        Self { rest, shell }
    }

    fn default_client(&self) -> &dyn SchedulerAdapter {
        match &self.rest {
            Some(rest) => rest.as_ref(),
            None => self.shell.as_ref(),
        }
    }
}

#[async_trait]
impl SchedulerAdapter for CompositeSchedulerClient {
    async fn submit_job(
        &self,
        description: &JobDescription,
        user: &Username,
        token: &str,
    ) -> Result<String, ErrorKind> {
        // REST cannot reference a pre-existing remote file: scriptPath
        // always forces the shell path regardless of what's configured.
        if description.script_path.is_some() {
            self.shell.submit_job(description, user, token).await
        } else {
            self.default_client().submit_job(description, user, token).await
        }
    }

    async fn attach_command(
        &self,
        command: &str,
        job_id: &str,
        user: &Username,
        token: &str,
    ) -> Result<(), ErrorKind> {
        self.default_client().attach_command(command, job_id, user, token).await
    }

    async fn get_job(&self, job_id: &str, user: &Username, token: &str) -> Result<Vec<Job>, ErrorKind> {
        self.default_client().get_job(job_id, user, token).await
    }

    async fn get_jobs(
        &self,
        user: &Username,
        token: &str,
        all_users: bool,
    ) -> Result<Vec<Job>, ErrorKind> {
        self.default_client().get_jobs(user, token, all_users).await
    }

    async fn get_job_metadata(
        &self,
        job_id: &str,
        user: &Username,
        token: &str,
    ) -> Result<Vec<JobMetadata>, ErrorKind> {
        // REST never exposes stdout/stderr/script paths: always shell.
        self.shell.get_job_metadata(job_id, user, token).await
    }

    async fn cancel_job(&self, job_id: &str, user: &Username, token: &str) -> Result<bool, ErrorKind> {
        self.default_client().cancel_job(job_id, user, token).await
    }

    async fn get_nodes(&self, user: &Username, token: &str) -> Result<Vec<Node>, ErrorKind> {
        self.default_client().get_nodes(user, token).await
    }

    async fn get_partitions(&self, user: &Username, token: &str) -> Result<Vec<Partition>, ErrorKind> {
        self.default_client().get_partitions(user, token).await
    }

    async fn get_reservations(
        &self,
        user: &Username,
        token: &str,
    ) -> Result<Vec<Reservation>, ErrorKind> {
        self.default_client().get_reservations(user, token).await
    }

    async fn ping(&self, user: &Username, token: &str) -> Result<bool, ErrorKind> {
        self.default_client().ping(user, token).await
    }
}
