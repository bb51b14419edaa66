use crate::config::S3Config;
use crate::object_key::encode_key;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

/// An object listed from the bucket
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Object key
    pub key: String,
    /// Public URL of the object
    pub url: String,
    /// Last modification time reported by the store
    pub last_modified: Option<DateTime<Utc>>,
    /// Object size in bytes
    pub size_bytes: Option<i64>,
}

/// Binary storage for image payloads
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` and return the public URL of the object
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String>;

    /// Delete the object stored under `key`
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every object in the bucket
    async fn list(&self) -> Result<Vec<StoredObject>>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Public URL of an object
    pub fn public_url(&self, key: &str) -> String {
        public_url(&self.config, key)
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .metadata("upload-date", Utc::now().to_rfc3339())
            .send()
            .await
            .context("Failed to upload image to S3")?;

        Ok(())
    }

    /// Multipart upload for large files
    async fn multipart_upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .metadata("upload-date", Utc::now().to_rfc3339())
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        match self.upload_parts(key, upload_id, &body).await {
            Ok(completed_parts) => {
                let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .context("Failed to complete multipart upload")?;

                Ok(())
            }
            Err(e) => {
                // Discard the parts uploaded so far
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    debug!(error = %abort_err, key = %key, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        body: &[u8],
    ) -> Result<Vec<aws_sdk_s3::types::CompletedPart>> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in body.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .context("Failed to upload part")?;

            completed_parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        if body.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, body, content_type).await?;
        } else {
            self.simple_upload(key, body, content_type).await?;
        }

        debug!(key = %key, "Image uploaded to S3");
        Ok(self.public_url(key))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete image from S3")?;

        debug!(key = %key, "Image deleted from S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .context("Failed to list images in S3")?;

            for object in response.contents() {
                let Some(key) = object.key() else {
                    continue;
                };

                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));

                objects.push(StoredObject {
                    key: key.to_string(),
                    url: self.public_url(key),
                    last_modified,
                    size_bytes: object.size(),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }
}

/// Public URL for `key` under the configured bucket.
///
/// Custom endpoints (MinIO, LocalStack) use path-style URLs:
/// `{endpoint}/{bucket}/{key}`. AWS uses virtual-hosted URLs:
/// `https://{bucket}.s3.{region}.amazonaws.com/{key}`.
pub fn public_url(config: &S3Config, key: &str) -> String {
    let key = encode_key(key);

    match config.endpoint_url {
        Some(ref endpoint) => format!(
            "{}/{}/{}",
            endpoint.trim_end_matches('/'),
            config.bucket,
            key
        ),
        None if config.force_path_style => format!(
            "https://s3.{}.amazonaws.com/{}/{}",
            config.region, config.bucket, key
        ),
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, key
        ),
    }
}

/// Content type for an image file extension
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_key::object_key_from_url;

    fn test_config() -> S3Config {
        S3Config {
            bucket: "photo-gallery".to_string(),
            region: "eu-west-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            serving_region: None,
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 5 * 1024 * 1024,
        }
    }

    #[test]
    fn test_public_url_virtual_hosted() {
        let url = public_url(&test_config(), "cat-2024-01-15T10:30:45.123Z.png");
        assert_eq!(
            url,
            "https://photo-gallery.s3.eu-west-1.amazonaws.com/cat-2024-01-15T10%3A30%3A45.123Z.png"
        );
    }

    #[test]
    fn test_public_url_custom_endpoint() {
        let mut config = test_config();
        config.endpoint_url = Some("http://localhost:9000/".to_string());
        config.force_path_style = true;

        let url = public_url(&config, "cat.png");
        assert_eq!(url, "http://localhost:9000/photo-gallery/cat.png");
    }

    #[test]
    fn test_public_url_path_style() {
        let mut config = test_config();
        config.force_path_style = true;

        let url = public_url(&config, "cat.png");
        assert_eq!(url, "https://s3.eu-west-1.amazonaws.com/photo-gallery/cat.png");
    }

    #[test]
    fn test_public_url_recovers_key() {
        let key = "my photo-2024-01-15T10:30:45.123Z.png";

        let mut path_style = test_config();
        path_style.endpoint_url = Some("http://minio:9000".to_string());

        for config in [test_config(), path_style] {
            let url = public_url(&config, key);
            assert_eq!(
                object_key_from_url(&url, &config.bucket).as_deref(),
                Some(key)
            );
        }
    }

    #[test]
    fn test_content_type_for_extension() {
        assert_eq!(content_type_for_extension("jpeg"), "image/jpeg");
        assert_eq!(content_type_for_extension("JPG"), "image/jpeg");
        assert_eq!(content_type_for_extension("png"), "image/png");
        assert_eq!(content_type_for_extension("unknown"), "application/octet-stream");
    }
}
