//! Reqwest-backed implementation of [`AutomationService`].
//!
//! Every method follows the same shape: build the request, send, read the
//! body as text, then branch on status. Non-success responses carry the
//! operation name, status code, and a truncated body so the caller's error
//! message is actionable without extra logging.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::auth::AccessToken;
use crate::config::Config;
use crate::error::{
    AuthError, MetadataError, PollError, ProvisioningError, SubmissionError, UploadError,
    truncate_body,
};

use super::types::*;
use super::AutomationService;

const BODY_PREVIEW_LIMIT: usize = 512;

/// Scopes requested with the client-credentials grant.
const TOKEN_SCOPE: &str = "code:all bucket:create bucket:read data:create data:write data:read";

/// HTTP client for the Autodesk Platform Services endpoints.
pub struct HttpAutomationService {
    client: Client,
    base_url: String,
    region: String,
}

impl HttpAutomationService {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            region: config.region.clone(),
        })
    }

    fn da_url(&self, path: &str) -> String {
        format!("{}/da/{}/v3/{}", self.base_url, self.region, path)
    }

    fn oss_url(&self, path: &str) -> String {
        format!("{}/oss/v2/{}", self.base_url, path)
    }

    fn derivative_url(&self, path: &str) -> String {
        format!("{}/modelderivative/v2/designdata/{}", self.base_url, path)
    }

    fn signed_upload_url(
        &self,
        bucket_key: &str,
        object_key: &str,
        minutes_expiration: Option<u32>,
        upload_key: Option<&str>,
    ) -> String {
        let mut url = self.oss_url(&format!(
            "buckets/{}/objects/{}/signeds3upload",
            bucket_key, object_key
        ));
        let mut sep = '?';
        if let Some(minutes) = minutes_expiration {
            url.push_str(&format!("{}minutesExpiration={}", sep, minutes));
            sep = '&';
        }
        if let Some(key) = upload_key {
            url.push_str(&format!("{}uploadKey={}", sep, urlencoding::encode(key)));
        }
        url
    }
}

/// Read the response body, logging it at debug level.
async fn read_body(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<(StatusCode, String), reqwest::Error> {
    let status = response.status();
    let body = response.text().await?;
    tracing::debug!(operation, %status, body = %truncate_body(&body, BODY_PREVIEW_LIMIT));
    Ok((status, body))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    body: &str,
) -> Result<T, String> {
    serde_json::from_str(body).map_err(|e| {
        format!(
            "{}: {}. Raw: {}",
            operation,
            e,
            truncate_body(body, BODY_PREVIEW_LIMIT)
        )
    })
}

#[async_trait]
impl AutomationService for HttpAutomationService {
    async fn authenticate(
        &self,
        client_id: &str,
        client_secret: &SecretString,
    ) -> Result<TokenGrant, AuthError> {
        let url = format!("{}/authentication/v2/token", self.base_url);
        let basic = STANDARD.encode(format!("{}:{}", client_id, client_secret.expose_secret()));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Basic {}", basic))
            .header("Accept", "application/json")
            .form(&[("grant_type", "client_credentials"), ("scope", TOKEN_SCOPE)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }

        let grant: TokenGrant = parse_json("token exchange", &body)
            .map_err(|_| AuthError::MissingToken)?;
        if grant.access_token.expose_secret().is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(grant)
    }

    async fn ensure_bucket(
        &self,
        token: &AccessToken,
        bucket_key: &str,
    ) -> Result<(), UploadError> {
        let url = self.oss_url("buckets");
        // Bucket keys are lowercase on the remote side.
        let payload = json!({
            "bucketKey": bucket_key.to_lowercase(),
            "policyKey": "transient",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("bucket creation", response).await?;

        if status == StatusCode::CONFLICT {
            tracing::debug!(bucket_key, "bucket already exists");
            return Ok(());
        }
        if !status.is_success() {
            return Err(UploadError::RequestFailed {
                operation: "bucket creation",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        Ok(())
    }

    async fn request_signed_upload(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_key: &str,
        minutes_expiration: u32,
        upload_key: Option<&str>,
    ) -> Result<SignedUploadTarget, UploadError> {
        let url =
            self.signed_upload_url(bucket_key, object_key, Some(minutes_expiration), upload_key);
        let response = self.client.get(&url).bearer_auth(token.bearer()).send().await?;
        let (status, body) = read_body("signed upload request", response).await?;

        if !status.is_success() {
            return Err(UploadError::RequestFailed {
                operation: "signed upload request",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        parse_json("signed upload request", &body).map_err(|reason| UploadError::InvalidResponse {
            operation: "signed upload request",
            reason,
        })
    }

    async fn upload_to_signed_url(
        &self,
        signed_url: &str,
        bytes: Vec<u8>,
    ) -> Result<(), UploadError> {
        // Presigned URLs carry their own auth; never attach the bearer token.
        let response = self
            .client
            .put(signed_url)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        let (status, body) = read_body("signed upload", response).await?;

        if !status.is_success() {
            return Err(UploadError::RequestFailed {
                operation: "signed upload",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        Ok(())
    }

    async fn finalize_upload(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
    ) -> Result<FinalizedObject, UploadError> {
        let url = self.signed_upload_url(bucket_key, object_key, None, None);
        let payload = json!({
            "ossbucketKey": bucket_key,
            "ossSourceFileObjectKey": object_key,
            "access": "full",
            "uploadKey": upload_key,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("finalize upload", response).await?;

        if !status.is_success() {
            return Err(UploadError::RequestFailed {
                operation: "finalize upload",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        parse_json("finalize upload", &body).map_err(|reason| UploadError::InvalidResponse {
            operation: "finalize upload",
            reason,
        })
    }

    async fn register_bundle(
        &self,
        token: &AccessToken,
        bundle_id: &str,
        engine: &str,
        description: &str,
    ) -> Result<BundleRegistration, ProvisioningError> {
        let url = self.da_url("appbundles");
        let payload = json!({ "id": bundle_id, "engine": engine, "description": description });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("bundle registration", response).await?;

        if status == StatusCode::CONFLICT {
            return Err(ProvisioningError::Conflict {
                id: bundle_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProvisioningError::RequestFailed {
                operation: "bundle registration",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        parse_json("bundle registration", &body).map_err(|reason| {
            ProvisioningError::InvalidResponse {
                operation: "bundle registration",
                reason,
            }
        })
    }

    async fn create_bundle_version(
        &self,
        token: &AccessToken,
        bundle_id: &str,
        engine: &str,
        description: &str,
    ) -> Result<BundleRegistration, ProvisioningError> {
        let url = self.da_url(&format!("appbundles/{}/versions", bundle_id));
        let payload = json!({ "engine": engine, "description": description });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("bundle version", response).await?;

        if !status.is_success() {
            return Err(ProvisioningError::RequestFailed {
                operation: "bundle version",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        parse_json("bundle version", &body).map_err(|reason| ProvisioningError::InvalidResponse {
            operation: "bundle version",
            reason,
        })
    }

    async fn upload_package(
        &self,
        endpoint_url: &str,
        form_data: &BTreeMap<String, String>,
        package: Vec<u8>,
        file_name: &str,
    ) -> Result<(), ProvisioningError> {
        let mut form = multipart::Form::new();
        for (key, value) in form_data {
            form = form.text(key.clone(), value.clone());
        }
        let part = multipart::Part::bytes(package)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ProvisioningError::InvalidResponse {
                operation: "package upload",
                reason: e.to_string(),
            })?;
        form = form.part("file", part);

        // The endpoint is presigned storage, not the service API.
        let response = self.client.post(endpoint_url).multipart(form).send().await?;
        let (status, body) = read_body("package upload", response).await?;

        if !status.is_success() {
            return Err(ProvisioningError::RequestFailed {
                operation: "package upload",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        Ok(())
    }

    async fn create_activity(
        &self,
        token: &AccessToken,
        spec: &ActivitySpec,
    ) -> Result<ActivityRegistration, ProvisioningError> {
        let url = self.da_url("activities");
        let payload = activity_payload(spec, true);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("activity registration", response).await?;

        if status == StatusCode::CONFLICT {
            return Err(ProvisioningError::Conflict {
                id: spec.id.clone(),
            });
        }
        if !status.is_success() {
            return Err(ProvisioningError::RequestFailed {
                operation: "activity registration",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        parse_json("activity registration", &body).map_err(|reason| {
            ProvisioningError::InvalidResponse {
                operation: "activity registration",
                reason,
            }
        })
    }

    async fn create_activity_version(
        &self,
        token: &AccessToken,
        spec: &ActivitySpec,
    ) -> Result<ActivityRegistration, ProvisioningError> {
        let url = self.da_url(&format!("activities/{}/versions", spec.id));
        let payload = activity_payload(spec, false);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("activity version", response).await?;

        if !status.is_success() {
            return Err(ProvisioningError::RequestFailed {
                operation: "activity version",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        parse_json("activity version", &body).map_err(|reason| {
            ProvisioningError::InvalidResponse {
                operation: "activity version",
                reason,
            }
        })
    }

    async fn create_alias(
        &self,
        token: &AccessToken,
        owner: AliasOwner,
        owner_id: &str,
        alias_id: &str,
        version: u32,
    ) -> Result<(), ProvisioningError> {
        let url = self.da_url(&format!("{}/{}/aliases", owner.path_segment(), owner_id));
        let payload = json!({ "id": alias_id, "version": version });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("alias creation", response).await?;

        if !status.is_success() {
            return Err(ProvisioningError::RequestFailed {
                operation: "alias creation",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        Ok(())
    }

    async fn submit_job(
        &self,
        token: &AccessToken,
        activity_id: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String, SubmissionError> {
        let url = self.da_url("workitems");
        let payload = json!({ "activityId": activity_id, "arguments": arguments });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(operation = "work item submission", %status,
            body = %truncate_body(&body, BODY_PREVIEW_LIMIT));

        if !status.is_success() {
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| SubmissionError::InvalidResponse {
                reason: format!("{}. Raw: {}", e, truncate_body(&body, BODY_PREVIEW_LIMIT)),
            })?;
        value
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or(SubmissionError::MissingId)
    }

    async fn job_status(
        &self,
        token: &AccessToken,
        job_id: &str,
    ) -> Result<WorkItemStatus, PollError> {
        let url = self.da_url(&format!("workitems/{}", job_id));
        let response = self
            .client
            .get(&url)
            .bearer_auth(token.bearer())
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(PollError::RequestFailed {
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        serde_json::from_str(&body).map_err(|e| PollError::InvalidResponse {
            reason: format!("{}. Raw: {}", e, truncate_body(&body, BODY_PREVIEW_LIMIT)),
        })
    }

    async fn fetch_report(&self, report_url: &str) -> Result<String, MetadataError> {
        let response = self.client.get(report_url).send().await?;
        let (status, body) = read_body("report fetch", response).await?;

        if !status.is_success() {
            return Err(MetadataError::RequestFailed {
                operation: "report fetch",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        Ok(body)
    }

    async fn start_translation(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<(), MetadataError> {
        let url = self.derivative_url("job");
        let payload = json!({
            "input": { "urn": urn },
            "output": {
                "formats": [ { "type": "svf2", "views": ["2d", "3d"] } ]
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .header("x-ads-force", "true")
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("translation job", response).await?;

        if !status.is_success() {
            return Err(MetadataError::RequestFailed {
                operation: "translation job",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        Ok(())
    }

    async fn manifest_status(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<ManifestStatus, MetadataError> {
        let url = self.derivative_url(&format!("{}/manifest", urlencoding::encode(urn)));
        let response = self.client.get(&url).bearer_auth(token.bearer()).send().await?;
        let (status, body) = read_body("manifest fetch", response).await?;

        if !status.is_success() {
            return Err(MetadataError::RequestFailed {
                operation: "manifest fetch",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }
        parse_json("manifest fetch", &body).map_err(|reason| MetadataError::InvalidResponse {
            operation: "manifest fetch",
            reason,
        })
    }

    async fn list_viewables(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<Vec<Viewable>, MetadataError> {
        let url = self.derivative_url(&format!("{}/metadata", urlencoding::encode(urn)));
        let response = self.client.get(&url).bearer_auth(token.bearer()).send().await?;
        let (status, body) = read_body("viewable listing", response).await?;

        if !status.is_success() {
            return Err(MetadataError::RequestFailed {
                operation: "viewable listing",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }

        #[derive(serde::Deserialize)]
        struct MetadataEnvelope {
            #[serde(default)]
            data: Option<MetadataData>,
        }
        #[derive(serde::Deserialize)]
        struct MetadataData {
            #[serde(default)]
            metadata: Vec<Viewable>,
        }

        let envelope: MetadataEnvelope = parse_json("viewable listing", &body).map_err(|reason| {
            MetadataError::InvalidResponse {
                operation: "viewable listing",
                reason,
            }
        })?;
        Ok(envelope.data.map(|d| d.metadata).unwrap_or_default())
    }

    async fn object_hierarchy(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
        object_id: Option<i64>,
    ) -> Result<Option<Vec<HierarchyNode>>, MetadataError> {
        let mut url =
            self.derivative_url(&format!("{}/metadata/{}", urlencoding::encode(urn), guid));
        if let Some(id) = object_id {
            url.push_str(&format!("?objectid={}", id));
        }

        let response = self.client.get(&url).bearer_auth(token.bearer()).send().await?;
        let (status, body) = read_body("hierarchy fetch", response).await?;

        if !status.is_success() {
            return Err(MetadataError::RequestFailed {
                operation: "hierarchy fetch",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }

        let value: serde_json::Value =
            parse_json("hierarchy fetch", &body).map_err(|reason| {
                MetadataError::InvalidResponse {
                    operation: "hierarchy fetch",
                    reason,
                }
            })?;

        // An accepted-but-still-deriving response has no `data` field.
        let Some(data) = value.get("data") else {
            return Ok(None);
        };
        let roots: Vec<HierarchyNode> = data
            .get("objects")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| MetadataError::InvalidResponse {
                operation: "hierarchy fetch",
                reason: e.to_string(),
            })?
            .unwrap_or_default();
        Ok(Some(roots))
    }

    async fn object_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
    ) -> Result<Option<Vec<ObjectProperties>>, MetadataError> {
        let url = self.derivative_url(&format!(
            "{}/metadata/{}/properties",
            urlencoding::encode(urn),
            guid
        ));
        let response = self.client.get(&url).bearer_auth(token.bearer()).send().await?;
        let (status, body) = read_body("property fetch", response).await?;

        if status == StatusCode::ACCEPTED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(MetadataError::RequestFailed {
                operation: "property fetch",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }

        let value: serde_json::Value =
            parse_json("property fetch", &body).map_err(|reason| {
                MetadataError::InvalidResponse {
                    operation: "property fetch",
                    reason,
                }
            })?;

        // A bare `{"result": "success"}` body means the extraction job was
        // accepted and the properties are not available yet.
        if value.get("result").and_then(|r| r.as_str()) == Some("success") {
            return Ok(None);
        }
        Ok(Some(extract_collection("property fetch", &value)?))
    }

    async fn query_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
        query: &PropertyQuery,
    ) -> Result<Vec<ObjectProperties>, MetadataError> {
        let url = self.derivative_url(&format!(
            "{}/metadata/{}/properties:query",
            urlencoding::encode(urn),
            guid
        ));

        let payload = property_query_payload(query);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.bearer())
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_body("property query", response).await?;

        if !status.is_success() {
            return Err(MetadataError::RequestFailed {
                operation: "property query",
                status: status.as_u16(),
                body: truncate_body(&body, BODY_PREVIEW_LIMIT),
            });
        }

        let value: serde_json::Value =
            parse_json("property query", &body).map_err(|reason| {
                MetadataError::InvalidResponse {
                    operation: "property query",
                    reason,
                }
            })?;
        extract_collection("property query", &value)
    }
}

fn activity_payload(spec: &ActivitySpec, include_id: bool) -> serde_json::Value {
    let mut payload = json!({
        "engine": spec.engine,
        "commandLine": spec.command_line,
        "parameters": {
            "TaskParameters": {
                "verb": "read",
                "description": "the parameters for the script",
                "required": false,
            },
            "PersonalAccessToken": {
                "verb": "read",
                "description": "the personal access token to use",
                "required": true,
            },
        },
        "appbundles": [spec.bundle_qualified_id],
        "description": spec.description,
    });
    if include_id {
        payload["id"] = json!(spec.id);
    }
    payload
}

fn property_query_payload(query: &PropertyQuery) -> serde_json::Value {
    let mut payload = json!({
        "fields": ["objectid", "name", "externalId", "properties.Dimensions"],
        "pagination": { "offset": query.offset, "limit": query.limit },
        "payload": "text",
    });

    let mut clauses = Vec::new();
    if let Some(prefix) = &query.name_prefix {
        clauses.push(json!({ "$prefix": ["name", prefix] }));
    }
    if !query.object_ids.is_empty() {
        let mut terms = vec![json!("objectid")];
        terms.extend(query.object_ids.iter().map(|id| json!(id)));
        clauses.push(json!({ "$in": terms }));
    }
    match clauses.len() {
        0 => {}
        1 => payload["query"] = clauses.pop().unwrap_or_default(),
        _ => payload["query"] = json!({ "$and": clauses }),
    }
    payload
}

/// Pull the `data.collection` array out of a properties response.
fn extract_collection(
    operation: &'static str,
    value: &serde_json::Value,
) -> Result<Vec<ObjectProperties>, MetadataError> {
    let Some(collection) = value.pointer("/data/collection") else {
        return Ok(Vec::new());
    };
    serde_json::from_value(collection.clone()).map_err(|e| MetadataError::InvalidResponse {
        operation,
        reason: e.to_string(),
    })
}
