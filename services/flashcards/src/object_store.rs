use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// Object storage for uploaded source files and CSV exports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `bucket/key`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    /// Fetch the full contents of `bucket/key`
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Publicly addressable location of `bucket/key`
    fn public_url(&self, bucket: &str, key: &str) -> String;
}

/// S3 object store
pub struct S3ObjectStore {
    client: S3Client,
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
            upload_bucket = %config.upload_bucket,
            export_bucket = %config.export_bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small files
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    /// Multipart upload for large files
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let mut completed_parts = Vec::new();

        for (index, chunk) in body.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
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

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let size_bytes = body.len();

        if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_upload(bucket, key, &body, content_type).await?;
        } else {
            self.simple_upload(bucket, key, body, content_type).await?;
        }

        info!(bucket, key, size_bytes, "Object uploaded successfully");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download {bucket}/{key} from S3"))?;

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read S3 object body")?
            .into_bytes();

        debug!(size_bytes = bytes.len(), "Object downloaded");
        Ok(bytes.to_vec())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        public_url(&self.config, bucket, key)
    }
}

/// Address of an object as reported to callers
fn public_url(config: &S3Config, bucket: &str, key: &str) -> String {
    if let Some(ref base) = config.public_url_base {
        return format!("{}/{}", base.trim_end_matches('/'), key);
    }

    match config.endpoint_url {
        Some(ref endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!("https://{bucket}.s3.amazonaws.com/{key}"),
    }
}

/// Content type for a file extension
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "txt" => "text/plain",
        "csv" => "text/csv",
        "pdf" => "application/pdf",
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Content type for a file name, judged by its extension
pub fn content_type_for_filename(filename: &str) -> &'static str {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| content_type_for_extension(extension))
        .unwrap_or("text/plain")
}
