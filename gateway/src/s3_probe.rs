//! Wires the health checker's object-store probe (`health::ObjectStoreProbe`)
//! to a real `aws_sdk_s3::Client` against the private endpoint.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use health::ObjectStoreProbe;

pub struct S3LivenessProbe {
    client: Client,
}

impl S3LivenessProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStoreProbe for S3LivenessProbe {
    async fn list_buckets_probe(&self) -> Result<(), String> {
        self.client
            .list_buckets()
            .max_buckets(1)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
