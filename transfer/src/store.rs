//! Object store seam: presigned URL minting abstracted behind a trait so the
//! orchestrator is testable without a live S3-compatible endpoint. Grounded
//! on `libs/remote_storage/src/lib.rs`'s `RemoteStorage` trait shape
//! (`S3Bucket`, one implementation per backend, config-driven).

use std::time::Duration;

use async_trait::async_trait;
use model::ErrorKind;

/// One multipart-capable object store, reachable through two distinct
/// endpoints: `public` (presigned URLs handed to the caller to push/pull
/// bytes from outside the cluster network) and `private` (bucket
/// management and URLs consumed only by the transfer script running on a
/// cluster node).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn ensure_bucket(&self, bucket: &str, lifecycle_days: u32) -> Result<(), ErrorKind>;

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, ErrorKind>;

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires: Duration,
        public: bool,
    ) -> Result<String, ErrorKind>;

    async fn presign_complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        expires: Duration,
        public: bool,
    ) -> Result<String, ErrorKind>;

    async fn presign_get_object(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
        public: bool,
    ) -> Result<String, ErrorKind>;

    async fn presign_head_object(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
        public: bool,
    ) -> Result<String, ErrorKind>;
}

/// Rewrites a bucket name to the Ceph-style tenant-qualified form
/// (`tenant:bucket`) when a tenant is configured. Applied uniformly before
/// every bucket-name use so the tenant/non-tenant code paths never diverge.
pub fn rewrite_bucket_name(tenant: Option<&str>, bucket: &str) -> String {
    match tenant {
        Some(tenant) => format!("{tenant}:{bucket}"),
        None => bucket.to_string(),
    }
}

pub mod live {
    use super::*;
    use aws_sdk_s3::presigning::PresigningConfig;
    use aws_sdk_s3::types::{
        BucketLifecycleConfiguration, ExpirationStatus, LifecycleExpiration, LifecycleRule,
        LifecycleRuleFilter,
    };
    use aws_sdk_s3::Client;

    /// Tenant bucket names contain a `:` that the client's default
    /// validation rejects; construction of `public`/`private` must disable
    /// bucket-name validation (via path-style addressing) when a tenant is
    /// configured. Left to the caller assembling the `aws_config::SdkConfig`
    /// at startup.
    pub struct S3ObjectStore {
        pub public: Client,
        pub private: Client,
    }

    impl S3ObjectStore {
        fn client(&self, public: bool) -> &Client {
            if public {
                &self.public
            } else {
                &self.private
            }
        }
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn ensure_bucket(&self, bucket: &str, lifecycle_days: u32) -> Result<(), ErrorKind> {
            let create = self.private.create_bucket().bucket(bucket).send().await;
            if let Err(err) = create {
                let already_owned = err
                    .as_service_error()
                    .map(|e| e.is_bucket_already_owned_by_you())
                    .unwrap_or(false);
                if !already_owned {
                    return Err(ErrorKind::UpstreamUnavailable(err.to_string()));
                }
            }

            let rule = LifecycleRule::builder()
                .id("ExpireObjects")
                .status(ExpirationStatus::Enabled)
                .filter(LifecycleRuleFilter::Prefix(String::new()))
                .expiration(
                    LifecycleExpiration::builder()
                        .days(lifecycle_days as i32)
                        .build(),
                )
                .build()
                .map_err(|e| ErrorKind::Internal(e.to_string()))?;
            let config = BucketLifecycleConfiguration::builder().rules(rule).build();

            self.private
                .put_bucket_lifecycle_configuration()
                .bucket(bucket)
                .lifecycle_configuration(config)
                .send()
                .await
                .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
            Ok(())
        }

        async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, ErrorKind> {
            let resp = self
                .private
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
            resp.upload_id()
                .map(String::from)
                .ok_or_else(|| ErrorKind::Internal("create_multipart_upload returned no upload_id".into()))
        }

        async fn presign_upload_part(
            &self,
            bucket: &str,
            key: &str,
            upload_id: &str,
            part_number: i32,
            expires: Duration,
            public: bool,
        ) -> Result<String, ErrorKind> {
            let cfg = PresigningConfig::expires_in(expires)
                .map_err(|e| ErrorKind::Internal(e.to_string()))?;
            let presigned = self
                .client(public)
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .presigned(cfg)
                .await
                .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
            Ok(presigned.uri().to_string())
        }

        async fn presign_complete_multipart_upload(
            &self,
            bucket: &str,
            key: &str,
            upload_id: &str,
            expires: Duration,
            public: bool,
        ) -> Result<String, ErrorKind> {
            let cfg = PresigningConfig::expires_in(expires)
                .map_err(|e| ErrorKind::Internal(e.to_string()))?;
            let presigned = self
                .client(public)
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .presigned(cfg)
                .await
                .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
            Ok(presigned.uri().to_string())
        }

        async fn presign_get_object(
            &self,
            bucket: &str,
            key: &str,
            expires: Duration,
            public: bool,
        ) -> Result<String, ErrorKind> {
            let cfg = PresigningConfig::expires_in(expires)
                .map_err(|e| ErrorKind::Internal(e.to_string()))?;
            let presigned = self
                .client(public)
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(cfg)
                .await
                .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
            Ok(presigned.uri().to_string())
        }

        async fn presign_head_object(
            &self,
            bucket: &str,
            key: &str,
            expires: Duration,
            public: bool,
        ) -> Result<String, ErrorKind> {
            let cfg = PresigningConfig::expires_in(expires)
                .map_err(|e| ErrorKind::Internal(e.to_string()))?;
            let presigned = self
                .client(public)
                .head_object()
                .bucket(bucket)
                .key(key)
                .presigned(cfg)
                .await
                .map_err(|e| ErrorKind::UpstreamUnavailable(e.to_string()))?;
            Ok(presigned.uri().to_string())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_bucket_name_prefixes_tenant_when_configured() {
        assert_eq!(rewrite_bucket_name(Some("acct"), "alice"), "acct:alice");
    }

    #[test]
    fn rewrite_bucket_name_is_identity_without_tenant() {
        assert_eq!(rewrite_bucket_name(None, "alice"), "alice");
    }
}
