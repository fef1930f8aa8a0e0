//! Uploading a local model into remote object storage.
//!
//! The target bucket is ensured first (an existing bucket is not an error),
//! then the three-step signed-URL protocol runs: request presigned URLs, PUT
//! the bytes to the first URL, then finalize with the upload key. The
//! finalized object id is encoded into the canonical resource name (URN)
//! used by the derivative and job endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::auth::AccessToken;
use crate::error::UploadError;
use crate::service::{AutomationService, FinalizedObject};

/// An uploaded asset: where it came from, what it is remotely, and the URN
/// downstream endpoints reference it by. Immutable once created.
#[derive(Debug, Clone)]
pub struct Asset {
    pub local_path: PathBuf,
    pub object_key: String,
    pub object: FinalizedObject,
    pub urn: String,
}

/// Encode an object id into its canonical resource name:
/// base64url without padding.
pub fn encode_urn(object_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(object_id.as_bytes())
}

/// Decode a canonical resource name back into the original object id.
pub fn decode_urn(urn: &str) -> Result<String, UploadError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(urn.as_bytes())
        .map_err(|e| UploadError::InvalidResponse {
            operation: "urn decode",
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| UploadError::InvalidResponse {
        operation: "urn decode",
        reason: e.to_string(),
    })
}

/// Drives the signed-URL upload protocol.
pub struct AssetUploader {
    service: Arc<dyn AutomationService>,
    signed_url_expiry_minutes: u32,
}

impl AssetUploader {
    pub fn new(service: Arc<dyn AutomationService>, signed_url_expiry_minutes: u32) -> Self {
        Self {
            service,
            signed_url_expiry_minutes,
        }
    }

    /// Upload a local file into `bucket_key`, returning the finalized asset.
    ///
    /// Empty or missing files are rejected before any network call.
    pub async fn upload(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        local_path: &Path,
    ) -> Result<Asset, UploadError> {
        let metadata = tokio::fs::metadata(local_path)
            .await
            .map_err(|_| UploadError::FileNotFound(local_path.to_path_buf()))?;
        if metadata.len() == 0 {
            return Err(UploadError::EmptyFile(local_path.to_path_buf()));
        }

        let object_key = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::FileNotFound(local_path.to_path_buf()))?
            .to_string();

        // An already-existing bucket is tolerated, so a fresh tenant and a
        // reused one take the same path.
        self.service.ensure_bucket(token, bucket_key).await?;

        let target = self
            .service
            .request_signed_upload(
                token,
                bucket_key,
                &object_key,
                self.signed_url_expiry_minutes,
                None,
            )
            .await?;
        let signed_url = target
            .urls
            .first()
            .ok_or(UploadError::InvalidResponse {
                operation: "signed upload request",
                reason: "response contained no signed URLs".to_string(),
            })?
            .clone();

        let bytes = tokio::fs::read(local_path).await?;
        tracing::info!(object_key = %object_key, size = bytes.len(), "uploading asset");
        self.service.upload_to_signed_url(&signed_url, bytes).await?;

        let object = self
            .service
            .finalize_upload(token, bucket_key, &object_key, &target.upload_key)
            .await?;
        let urn = encode_urn(&object.object_id);
        tracing::info!(object_id = %object.object_id, urn = %urn, "asset finalized");

        Ok(Asset {
            local_path: local_path.to_path_buf(),
            object_key,
            object,
            urn,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::service::mock::MockService;

    fn token() -> AccessToken {
        AccessToken::new(secrecy::SecretString::from("t"))
    }

    #[test]
    fn urn_round_trips_exactly() {
        let object_id = "urn:adsk.objects:os.object:my-bucket/part.f3d";
        let urn = encode_urn(object_id);
        assert!(!urn.contains('='));
        assert!(!urn.contains('+'));
        assert!(!urn.contains('/'));
        assert_eq!(decode_urn(&urn).unwrap(), object_id);
    }

    #[tokio::test]
    async fn missing_file_is_rejected_before_any_network_call() {
        let service = Arc::new(MockService::new());
        let uploader = AssetUploader::new(service, 2);

        let err = uploader
            .upload(&token(), "bucket", Path::new("/nonexistent/part.f3d"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let service = Arc::new(MockService::new());
        let uploader = AssetUploader::new(service, 2);

        let err = uploader
            .upload(&token(), "bucket", file.path())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptyFile(_)));
    }

    #[tokio::test]
    async fn upload_ensures_bucket_and_tolerates_existing_one() {
        use std::sync::atomic::Ordering;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"model bytes").unwrap();

        let service = Arc::new(MockService::new());
        let uploader = AssetUploader::new(service.clone(), 2);

        uploader.upload(&token(), "bucket", file.path()).await.unwrap();
        assert_eq!(service.bucket_calls.load(Ordering::SeqCst), 1);
        assert!(service.bucket_exists.load(Ordering::SeqCst));

        // Second upload hits the already-existing bucket and still succeeds.
        uploader.upload(&token(), "bucket", file.path()).await.unwrap();
        assert_eq!(service.bucket_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upload_finalizes_and_derives_urn() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"model bytes").unwrap();

        let service = Arc::new(MockService::new());
        let uploader = AssetUploader::new(service, 2);

        let asset = uploader.upload(&token(), "bucket", file.path()).await.unwrap();
        assert_eq!(decode_urn(&asset.urn).unwrap(), asset.object.object_id);
        assert!(asset.object.object_id.contains("bucket"));
    }
}
