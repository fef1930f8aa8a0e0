//! Wire types for the remote automation service.
//!
//! Field names mirror the remote JSON exactly (via serde renames), so these
//! types double as documentation of the protocol. Parsing is tolerant of
//! extra fields; only what the pipeline consumes is modeled.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Response of the client-credentials token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Token lifetime in seconds.
    pub expires_in: u64,
}

/// Response of a signed-upload request: one or more presigned URLs plus the
/// key needed to finalize the upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUploadTarget {
    #[serde(default)]
    pub urls: Vec<String>,
    pub upload_key: String,
}

/// Object record returned when a signed upload is finalized.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedObject {
    pub object_id: String,
    #[serde(default)]
    pub bucket_key: String,
    #[serde(default)]
    pub object_key: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: String,
}

/// Upload parameters returned when a bundle (version) is registered.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadParameters {
    #[serde(rename = "endpointURL")]
    pub endpoint_url: String,
    #[serde(rename = "formData", default)]
    pub form_data: BTreeMap<String, String>,
}

/// Response of bundle registration or bundle version creation.
///
/// `id` comes back fully qualified (`owner.BundleId`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRegistration {
    pub id: String,
    pub version: u32,
    pub upload_parameters: UploadParameters,
}

/// Response of activity registration or activity version creation.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityRegistration {
    pub id: String,
    pub version: u32,
}

/// What kind of resource an alias points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOwner {
    Bundle,
    Activity,
}

impl AliasOwner {
    /// Path segment under the design automation API.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Bundle => "appbundles",
            Self::Activity => "activities",
        }
    }
}

/// Request side of activity registration.
#[derive(Debug, Clone)]
pub struct ActivitySpec {
    pub id: String,
    pub engine: String,
    pub command_line: Vec<String>,
    /// Fully qualified bundle reference (`owner.Bundle+alias`).
    pub bundle_qualified_id: String,
    pub description: String,
}

/// Current state of a submitted work item.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemStatus {
    pub status: String,
    #[serde(default)]
    pub report_url: Option<String>,
}

/// Derivative manifest status snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestStatus {
    pub status: String,
    #[serde(default)]
    pub progress: Option<String>,
}

/// One viewable entry of a derivative metadata listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Viewable {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub guid: String,
}

/// One node of the remote object hierarchy. Children live under `objects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyNode {
    #[serde(default)]
    pub objectid: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub objects: Vec<HierarchyNode>,
}

/// One entry of a property collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectProperties {
    #[serde(default)]
    pub objectid: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "externalId", default)]
    pub external_id: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Property query options: optional name-prefix and object-id filters plus
/// pagination.
#[derive(Debug, Clone)]
pub struct PropertyQuery {
    pub name_prefix: Option<String>,
    /// Restrict results to these object ids. Empty means no restriction.
    pub object_ids: Vec<i64>,
    pub offset: u32,
    pub limit: u32,
}

impl Default for PropertyQuery {
    fn default() -> Self {
        Self {
            name_prefix: None,
            object_ids: Vec::new(),
            offset: 0,
            limit: 100,
        }
    }
}
