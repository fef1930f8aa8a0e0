//! The remote automation service boundary.
//!
//! Every network interaction of the pipeline goes through the
//! [`AutomationService`] trait, so tests can script the remote side without
//! sockets and the HTTP implementation stays in one place.

mod http;
mod types;

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::auth::AccessToken;
use crate::error::{
    AuthError, MetadataError, PollError, ProvisioningError, SubmissionError, UploadError,
};

pub use http::HttpAutomationService;
pub use types::{
    ActivityRegistration, ActivitySpec, AliasOwner, BundleRegistration, FinalizedObject,
    HierarchyNode, ManifestStatus, ObjectProperties, PropertyQuery, SignedUploadTarget,
    TokenGrant, UploadParameters, Viewable, WorkItemStatus,
};

/// The cloud engineering service, as one collaborator.
///
/// Methods map 1:1 onto remote endpoints. Multi-step protocols (signed
/// uploads, conflict fallback, polling) are composed on top of this trait by
/// the pipeline stages, never inside an implementation.
#[async_trait]
pub trait AutomationService: Send + Sync {
    /// Exchange client credentials for a bearer token.
    async fn authenticate(
        &self,
        client_id: &str,
        client_secret: &SecretString,
    ) -> Result<TokenGrant, AuthError>;

    /// Create the object storage bucket if it does not exist yet. A bucket
    /// that already exists is not an error.
    async fn ensure_bucket(
        &self,
        token: &AccessToken,
        bucket_key: &str,
    ) -> Result<(), UploadError>;

    /// Request presigned upload URLs for an object in a bucket.
    async fn request_signed_upload(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_key: &str,
        minutes_expiration: u32,
        upload_key: Option<&str>,
    ) -> Result<SignedUploadTarget, UploadError>;

    /// PUT raw bytes to a presigned URL.
    async fn upload_to_signed_url(
        &self,
        signed_url: &str,
        bytes: Vec<u8>,
    ) -> Result<(), UploadError>;

    /// Complete a signed upload, yielding the stored object record.
    async fn finalize_upload(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
    ) -> Result<FinalizedObject, UploadError>;

    /// Register a new bundle id. Fails with `ProvisioningError::Conflict`
    /// when the id already exists.
    async fn register_bundle(
        &self,
        token: &AccessToken,
        bundle_id: &str,
        engine: &str,
        description: &str,
    ) -> Result<BundleRegistration, ProvisioningError>;

    /// Create a new version under an existing bundle id.
    async fn create_bundle_version(
        &self,
        token: &AccessToken,
        bundle_id: &str,
        engine: &str,
        description: &str,
    ) -> Result<BundleRegistration, ProvisioningError>;

    /// Multi-field form upload of the package archive to the endpoint
    /// returned by bundle registration.
    async fn upload_package(
        &self,
        endpoint_url: &str,
        form_data: &BTreeMap<String, String>,
        package: Vec<u8>,
        file_name: &str,
    ) -> Result<(), ProvisioningError>;

    /// Register a new activity id. Fails with `ProvisioningError::Conflict`
    /// when the id already exists.
    async fn create_activity(
        &self,
        token: &AccessToken,
        spec: &ActivitySpec,
    ) -> Result<ActivityRegistration, ProvisioningError>;

    /// Create a new version under an existing activity id.
    async fn create_activity_version(
        &self,
        token: &AccessToken,
        spec: &ActivitySpec,
    ) -> Result<ActivityRegistration, ProvisioningError>;

    /// Bind an alias to a specific bundle or activity version.
    async fn create_alias(
        &self,
        token: &AccessToken,
        owner: AliasOwner,
        owner_id: &str,
        alias_id: &str,
        version: u32,
    ) -> Result<(), ProvisioningError>;

    /// Submit a work item; returns the job id.
    async fn submit_job(
        &self,
        token: &AccessToken,
        activity_id: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String, SubmissionError>;

    /// Fetch the current status of a work item.
    async fn job_status(
        &self,
        token: &AccessToken,
        job_id: &str,
    ) -> Result<WorkItemStatus, PollError>;

    /// Download a report artifact as text. Report URLs are presigned, so no
    /// bearer token is attached.
    async fn fetch_report(&self, report_url: &str) -> Result<String, MetadataError>;

    /// Kick off derivative translation for an uploaded model.
    async fn start_translation(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<(), MetadataError>;

    /// Current derivative manifest status for a model.
    async fn manifest_status(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<ManifestStatus, MetadataError>;

    /// List the viewables derived for a model.
    async fn list_viewables(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<Vec<Viewable>, MetadataError>;

    /// Fetch the object hierarchy of a viewable, optionally scoped to one
    /// object id. `Ok(None)` means the derivation is not ready yet.
    async fn object_hierarchy(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
        object_id: Option<i64>,
    ) -> Result<Option<Vec<HierarchyNode>>, MetadataError>;

    /// Fetch all object properties of a viewable. `Ok(None)` means the
    /// property set is still being computed.
    async fn object_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
    ) -> Result<Option<Vec<ObjectProperties>>, MetadataError>;

    /// Query object properties with prefix filtering and pagination.
    async fn query_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
        query: &PropertyQuery,
    ) -> Result<Vec<ObjectProperties>, MetadataError>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scriptable in-memory service for unit tests.

    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};

    use secrecy::SecretString;
    use tokio::sync::Mutex;

    use super::*;

    /// Mock service whose responses are pushed in ahead of time.
    ///
    /// Counters record how often each endpoint was hit so tests can assert
    /// on call patterns (single refresh, exact poll counts, and so on).
    #[derive(Default)]
    pub struct MockService {
        pub auth_calls: AtomicU32,
        pub bucket_calls: AtomicU32,
        pub status_calls: AtomicU32,
        pub hierarchy_calls: AtomicU32,
        pub register_bundle_calls: AtomicU32,
        pub bundle_version_calls: AtomicU32,
        pub create_activity_calls: AtomicU32,
        pub activity_version_calls: AtomicU32,
        pub alias_calls: AtomicU32,
        pub manifest_calls: AtomicU32,

        /// `expires_in` granted by the next authenticate calls (last kept).
        pub token_lifetimes: Mutex<VecDeque<u64>>,
        /// Scripted work item statuses, popped per poll (last repeats).
        pub statuses: Mutex<VecDeque<WorkItemStatus>>,
        /// Scripted hierarchy responses, popped per fetch (last repeats).
        pub hierarchies: Mutex<VecDeque<Option<Vec<HierarchyNode>>>>,
        /// Scripted manifest statuses, popped per fetch (last repeats).
        pub manifests: Mutex<VecDeque<ManifestStatus>>,
        /// Whether bundle/activity registration reports a conflict.
        pub bundle_exists: std::sync::atomic::AtomicBool,
        pub activity_exists: std::sync::atomic::AtomicBool,
        /// Set once `ensure_bucket` has been called.
        pub bucket_exists: std::sync::atomic::AtomicBool,
        /// Body served by `fetch_report`.
        pub report_body: Mutex<String>,
        /// Arguments of the last submitted work item.
        pub submitted_arguments: Mutex<Option<BTreeMap<String, String>>>,
    }

    impl MockService {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn push_status(&self, status: &str, report_url: Option<&str>) {
            self.statuses.lock().await.push_back(WorkItemStatus {
                status: status.to_string(),
                report_url: report_url.map(str::to_string),
            });
        }

        fn registration(&self, id: &str, version: u32) -> BundleRegistration {
            BundleRegistration {
                id: format!("owner.{}", id),
                version,
                upload_parameters: UploadParameters {
                    endpoint_url: "https://storage.invalid/package".to_string(),
                    form_data: BTreeMap::new(),
                },
            }
        }
    }

    #[async_trait]
    impl AutomationService for MockService {
        async fn authenticate(
            &self,
            _client_id: &str,
            _client_secret: &SecretString,
        ) -> Result<TokenGrant, AuthError> {
            let calls = self.auth_calls.fetch_add(1, Ordering::SeqCst);
            let mut lifetimes = self.token_lifetimes.lock().await;
            let expires_in = if lifetimes.len() > 1 {
                lifetimes.pop_front().unwrap()
            } else {
                lifetimes.front().copied().unwrap_or(3600)
            };
            Ok(TokenGrant {
                access_token: SecretString::from(format!("token-{}", calls)),
                expires_in,
            })
        }

        async fn ensure_bucket(
            &self,
            _token: &AccessToken,
            _bucket_key: &str,
        ) -> Result<(), UploadError> {
            self.bucket_calls.fetch_add(1, Ordering::SeqCst);
            // An existing bucket is tolerated, so repeat calls stay Ok.
            self.bucket_exists.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn request_signed_upload(
            &self,
            _token: &AccessToken,
            _bucket_key: &str,
            object_key: &str,
            _minutes_expiration: u32,
            _upload_key: Option<&str>,
        ) -> Result<SignedUploadTarget, UploadError> {
            Ok(SignedUploadTarget {
                urls: vec![format!("https://storage.invalid/{}", object_key)],
                upload_key: "upload-key-1".to_string(),
            })
        }

        async fn upload_to_signed_url(
            &self,
            _signed_url: &str,
            _bytes: Vec<u8>,
        ) -> Result<(), UploadError> {
            Ok(())
        }

        async fn finalize_upload(
            &self,
            _token: &AccessToken,
            bucket_key: &str,
            object_key: &str,
            _upload_key: &str,
        ) -> Result<FinalizedObject, UploadError> {
            Ok(FinalizedObject {
                object_id: format!("urn:adsk.objects:os.object:{}/{}", bucket_key, object_key),
                bucket_key: bucket_key.to_string(),
                object_key: object_key.to_string(),
                location: String::new(),
                size: 0,
                content_type: "application/octet-stream".to_string(),
            })
        }

        async fn register_bundle(
            &self,
            _token: &AccessToken,
            bundle_id: &str,
            _engine: &str,
            _description: &str,
        ) -> Result<BundleRegistration, ProvisioningError> {
            self.register_bundle_calls.fetch_add(1, Ordering::SeqCst);
            if self.bundle_exists.load(Ordering::SeqCst) {
                return Err(ProvisioningError::Conflict {
                    id: bundle_id.to_string(),
                });
            }
            self.bundle_exists.store(true, Ordering::SeqCst);
            Ok(self.registration(bundle_id, 1))
        }

        async fn create_bundle_version(
            &self,
            _token: &AccessToken,
            bundle_id: &str,
            _engine: &str,
            _description: &str,
        ) -> Result<BundleRegistration, ProvisioningError> {
            let calls = self.bundle_version_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.registration(bundle_id, 2 + calls))
        }

        async fn upload_package(
            &self,
            _endpoint_url: &str,
            _form_data: &BTreeMap<String, String>,
            _package: Vec<u8>,
            _file_name: &str,
        ) -> Result<(), ProvisioningError> {
            Ok(())
        }

        async fn create_activity(
            &self,
            _token: &AccessToken,
            spec: &ActivitySpec,
        ) -> Result<ActivityRegistration, ProvisioningError> {
            self.create_activity_calls.fetch_add(1, Ordering::SeqCst);
            if self.activity_exists.load(Ordering::SeqCst) {
                return Err(ProvisioningError::Conflict {
                    id: spec.id.clone(),
                });
            }
            self.activity_exists.store(true, Ordering::SeqCst);
            Ok(ActivityRegistration {
                id: format!("owner.{}", spec.id),
                version: 1,
            })
        }

        async fn create_activity_version(
            &self,
            _token: &AccessToken,
            spec: &ActivitySpec,
        ) -> Result<ActivityRegistration, ProvisioningError> {
            let calls = self.activity_version_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ActivityRegistration {
                id: format!("owner.{}", spec.id),
                version: 2 + calls,
            })
        }

        async fn create_alias(
            &self,
            _token: &AccessToken,
            _owner: AliasOwner,
            _owner_id: &str,
            _alias_id: &str,
            _version: u32,
        ) -> Result<(), ProvisioningError> {
            self.alias_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn submit_job(
            &self,
            _token: &AccessToken,
            _activity_id: &str,
            arguments: &BTreeMap<String, String>,
        ) -> Result<String, SubmissionError> {
            *self.submitted_arguments.lock().await = Some(arguments.clone());
            Ok("job-1".to_string())
        }

        async fn job_status(
            &self,
            _token: &AccessToken,
            _job_id: &str,
        ) -> Result<WorkItemStatus, PollError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().await;
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap())
            } else {
                statuses
                    .front()
                    .cloned()
                    .ok_or_else(|| PollError::InvalidResponse {
                        reason: "mock has no scripted statuses".to_string(),
                    })
            }
        }

        async fn fetch_report(&self, _report_url: &str) -> Result<String, MetadataError> {
            Ok(self.report_body.lock().await.clone())
        }

        async fn start_translation(
            &self,
            _token: &AccessToken,
            _urn: &str,
        ) -> Result<(), MetadataError> {
            Ok(())
        }

        async fn manifest_status(
            &self,
            _token: &AccessToken,
            _urn: &str,
        ) -> Result<ManifestStatus, MetadataError> {
            self.manifest_calls.fetch_add(1, Ordering::SeqCst);
            let mut manifests = self.manifests.lock().await;
            if manifests.len() > 1 {
                Ok(manifests.pop_front().unwrap())
            } else {
                manifests
                    .front()
                    .cloned()
                    .ok_or_else(|| MetadataError::InvalidResponse {
                        operation: "manifest",
                        reason: "mock has no scripted manifests".to_string(),
                    })
            }
        }

        async fn list_viewables(
            &self,
            _token: &AccessToken,
            _urn: &str,
        ) -> Result<Vec<Viewable>, MetadataError> {
            Ok(vec![Viewable {
                name: Some("Model".to_string()),
                role: Some("3d".to_string()),
                guid: "guid-1".to_string(),
            }])
        }

        async fn object_hierarchy(
            &self,
            _token: &AccessToken,
            _urn: &str,
            _guid: &str,
            _object_id: Option<i64>,
        ) -> Result<Option<Vec<HierarchyNode>>, MetadataError> {
            self.hierarchy_calls.fetch_add(1, Ordering::SeqCst);
            let mut hierarchies = self.hierarchies.lock().await;
            if hierarchies.len() > 1 {
                Ok(hierarchies.pop_front().unwrap())
            } else {
                Ok(hierarchies.front().cloned().unwrap_or(None))
            }
        }

        async fn object_properties(
            &self,
            _token: &AccessToken,
            _urn: &str,
            _guid: &str,
        ) -> Result<Option<Vec<ObjectProperties>>, MetadataError> {
            Ok(Some(Vec::new()))
        }

        async fn query_properties(
            &self,
            _token: &AccessToken,
            _urn: &str,
            _guid: &str,
            _query: &PropertyQuery,
        ) -> Result<Vec<ObjectProperties>, MetadataError> {
            Ok(Vec::new())
        }
    }
}
