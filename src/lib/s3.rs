use async_trait::async_trait;
use rusoto_core::credential::{ChainProvider, ProfileProvider, ProvideAwsCredentials};
use rusoto_core::{HttpClient, Region};
use rusoto_s3::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompletedMultipartUpload,
    CompletedPart, CreateMultipartUploadRequest, PutObjectRequest, S3Client, StreamingBody,
    UploadPartRequest, S3,
};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::config::StoreConfig;

/// Files larger than this are sent as a multipart upload.
pub const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;
const MIN_PART_SIZE: u64 = 8 * 1024 * 1024;
const MAX_PARTS: u64 = 10_000;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unable to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to create S3 client: {0}")]
    ClientError(String),
    #[error("Invalid region: {0}")]
    RegionError(String),
    #[error("Upload to s3://{bucket}/{key} failed: {message}")]
    RequestError {
        bucket: String,
        key: String,
        message: String,
    },
}

fn request_error(bucket: &str, key: &str, err: impl Display) -> UploadError {
    UploadError::RequestError {
        bucket: bucket.to_string(),
        key: key.to_string(),
        message: err.to_string(),
    }
}

/// Part size for a multipart upload of `len` bytes, keeping under the
/// 10,000 part limit.
pub fn part_size(len: u64) -> u64 {
    let spread = (len + MAX_PARTS - 1) / MAX_PARTS;
    spread.max(MIN_PART_SIZE)
}

/// Destination for uploaded archives. `S3Store` talks to S3, tests plug in
/// an in-memory store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `file` to `bucket` under `key`, returning the
    /// number of bytes sent.
    async fn put_object(&self, bucket: &str, key: &str, file: &Path) -> Result<u64, UploadError>;
}

pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Client backed by the default credential chain (environment, profile
    /// file, container/instance role).
    pub fn new(config: &StoreConfig) -> Result<Self, UploadError> {
        let provider = match &config.profile {
            Some(profile) => {
                let mut profile_provider =
                    ProfileProvider::new().map_err(|e| UploadError::ClientError(e.to_string()))?;
                profile_provider.set_profile(profile.as_str());
                ChainProvider::with_profile_provider(profile_provider)
            }
            None => ChainProvider::new(),
        };

        Self::with_credentials(provider, config)
    }

    /// Client using a caller supplied credentials provider.
    pub fn with_credentials<P>(provider: P, config: &StoreConfig) -> Result<Self, UploadError>
    where
        P: ProvideAwsCredentials + Send + Sync + 'static,
    {
        let region = config.region()?;
        log::debug!("using region: {:?}", region);

        let dispatcher = HttpClient::new().map_err(|e| UploadError::ClientError(e.to_string()))?;
        Ok(Self {
            client: S3Client::new_with(dispatcher, provider, region),
        })
    }

    /// Streams the file straight from disk in a single request.
    async fn single_upload(
        &self,
        bucket: &str,
        key: &str,
        handle: File,
        len: u64,
    ) -> Result<(), UploadError> {
        let body = StreamingBody::new_with_size(ReaderStream::new(handle), len as usize);
        let _ = self
            .client
            .put_object(PutObjectRequest {
                bucket: bucket.into(),
                key: key.to_string(),
                content_length: Some(len as i64),
                body: Some(body),
                ..Default::default()
            })
            .await
            .map_err(|e| request_error(bucket, key, e))?;

        Ok(())
    }

    /// Multipart upload; the upload is aborted if any part or the final
    /// completion fails so no orphaned parts are left in the bucket.
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        file: &Path,
        mut handle: File,
        len: u64,
    ) -> Result<(), UploadError> {
        let created = self
            .client
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: bucket.into(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| request_error(bucket, key, e))?;
        let upload_id = created
            .upload_id
            .ok_or_else(|| request_error(bucket, key, "no upload id returned"))?;

        let res = self
            .upload_parts(bucket, key, &upload_id, file, &mut handle, len)
            .await;
        if res.is_err() {
            log::warn!("aborting multipart upload {}", upload_id);
            if let Err(err) = self
                .client
                .abort_multipart_upload(AbortMultipartUploadRequest {
                    bucket: bucket.into(),
                    key: key.to_string(),
                    upload_id: upload_id.clone(),
                    ..Default::default()
                })
                .await
            {
                log::error!("unable to abort multipart upload {}: {}", upload_id, err);
            }
        }

        res
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        file: &Path,
        handle: &mut File,
        len: u64,
    ) -> Result<(), UploadError> {
        let part_size = part_size(len);
        let mut parts = Vec::new();
        let mut part_number: i64 = 1;

        loop {
            let mut buffer = Vec::with_capacity(part_size as usize);
            (&mut *handle)
                .take(part_size)
                .read_to_end(&mut buffer)
                .await
                .map_err(|source| UploadError::ReadError {
                    path: file.to_path_buf(),
                    source,
                })?;
            if buffer.is_empty() {
                break;
            }

            log::debug!("uploading part {} ({} bytes)", part_number, buffer.len());
            let output = self
                .client
                .upload_part(UploadPartRequest {
                    bucket: bucket.into(),
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                    part_number,
                    content_length: Some(buffer.len() as i64),
                    body: Some(StreamingBody::from(buffer)),
                    ..Default::default()
                })
                .await
                .map_err(|e| request_error(bucket, key, e))?;

            parts.push(CompletedPart {
                e_tag: output.e_tag,
                part_number: Some(part_number),
                ..Default::default()
            });
            part_number += 1;
        }

        let _ = self
            .client
            .complete_multipart_upload(CompleteMultipartUploadRequest {
                bucket: bucket.into(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                multipart_upload: Some(CompletedMultipartUpload {
                    parts: Some(parts),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .map_err(|e| request_error(bucket, key, e))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, bucket: &str, key: &str, file: &Path) -> Result<u64, UploadError> {
        let read_err = |source| UploadError::ReadError {
            path: file.to_path_buf(),
            source,
        };
        let handle = File::open(file).await.map_err(read_err)?;
        let len = handle.metadata().await.map_err(read_err)?.len();

        if len > MULTIPART_THRESHOLD {
            log::debug!("using multipart upload, {} byte parts", part_size(len));
            self.multipart_upload(bucket, key, file, handle, len).await?;
        } else {
            self.single_upload(bucket, key, handle, len).await?;
        }

        Ok(len)
    }
}

/// Upload the file at `file` to `s3_bucket` under `key`. Returns the number
/// of bytes sent.
pub async fn upload_to_bucket(
    store: &dyn ObjectStore,
    file: &Path,
    s3_bucket: &str,
    key: &str,
) -> Result<u64, UploadError> {
    let metadata = tokio::fs::metadata(file)
        .await
        .map_err(|source| UploadError::ReadError {
            path: file.to_path_buf(),
            source,
        })?;
    log::info!(
        "uploading archive to bucket: {}, key: {} ({} bytes)",
        s3_bucket,
        key,
        metadata.len()
    );

    store.put_object(s3_bucket, key, file).await
}
