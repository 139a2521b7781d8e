//! Real object store backed by S3 server-side copy.
use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::copy_object::CopyObjectError;
use aws_sdk_s3::types::ServerSideEncryption;
use aws_sdk_s3::Client;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::replicate::{CopyError, CopyResult, ObjectStore};

// CopySource wants the key percent-encoded with '/' left intact.
const COPY_SOURCE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    /// Server-side copy: the bytes move inside the backend, never through
    /// this process. The destination object is encrypted at rest, matching
    /// what the backup bucket expects.
    async fn copy_object(
        &self,
        source_bucket: &str,
        object_key: &str,
        destination_bucket: &str,
    ) -> Result<CopyResult, CopyError> {
        let output = self
            .client
            .copy_object()
            .copy_source(copy_source(source_bucket, object_key))
            .bucket(destination_bucket)
            .key(object_key)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .send()
            .await
            .map_err(classify_copy_error)?;

        Ok(CopyResult {
            etag: output
                .copy_object_result()
                .and_then(|result| result.e_tag())
                .map(str::to_owned),
        })
    }
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE_SET))
}

fn classify_copy_error(err: SdkError<CopyObjectError>) -> CopyError {
    match err {
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            let code = ctx.err().meta().code().map(str::to_owned);
            let message = ctx.err().to_string();
            classify_service_error(code.as_deref(), status, message)
        }
        SdkError::TimeoutError(_) => CopyError::Timeout("storage request timed out".into()),
        SdkError::DispatchFailure(failure) => {
            CopyError::Transport(format!("dispatch failure: {failure:?}"))
        }
        SdkError::ResponseError(_) => {
            CopyError::Transport("malformed response from storage backend".into())
        }
        other => CopyError::Other(other.to_string()),
    }
}

fn classify_service_error(code: Option<&str>, status: u16, message: String) -> CopyError {
    match code {
        Some("NoSuchKey") | Some("NoSuchBucket") | Some("NotFound") => CopyError::NotFound(message),
        Some("AccessDenied") | Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => {
            CopyError::AccessDenied(message)
        }
        Some("SlowDown")
        | Some("Throttling")
        | Some("ThrottlingException")
        | Some("RequestLimitExceeded")
        | Some("TooManyRequests") => CopyError::Throttled(message),
        Some("RequestTimeout") => CopyError::Timeout(message),
        _ => match status {
            404 => CopyError::NotFound(message),
            403 => CopyError::AccessDenied(message),
            429 | 503 => CopyError::Throttled(message),
            _ => CopyError::Other(message),
        },
    }
}
