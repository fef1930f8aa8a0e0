//! Idempotent provisioning of bundles, activities, and aliases.
//!
//! Registering an id that already exists is not a failure: the service
//! reports a conflict and the provisioner falls back to creating a new
//! version under the existing id, so repeated runs keep working and the
//! version number grows monotonically. Aliases pin a stable name to the
//! version just provisioned, so nothing downstream embeds raw version
//! numbers.

use std::path::Path;
use std::sync::Arc;

use crate::auth::AccessToken;
use crate::error::ProvisioningError;
use crate::service::{ActivitySpec, AliasOwner, AutomationService};

/// A provisioned bundle, ready to be referenced by an activity.
#[derive(Debug, Clone)]
pub struct ProvisionedBundle {
    /// Fully qualified id as reported by the service (`owner.BundleId`).
    pub qualified_id: String,
    pub version: u32,
}

/// A provisioned activity, ready to be referenced by work items.
#[derive(Debug, Clone)]
pub struct ProvisionedActivity {
    pub qualified_id: String,
    pub version: u32,
}

pub struct BundleProvisioner {
    service: Arc<dyn AutomationService>,
    engine: String,
    description: String,
}

impl BundleProvisioner {
    pub fn new(
        service: Arc<dyn AutomationService>,
        engine: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            service,
            engine: engine.into(),
            description: description.into(),
        }
    }

    /// Register `bundle_id` (or a new version of it) and upload the package
    /// archive to the storage endpoint the registration returns.
    pub async fn ensure_bundle(
        &self,
        token: &AccessToken,
        bundle_id: &str,
        package_path: &Path,
    ) -> Result<ProvisionedBundle, ProvisioningError> {
        let registration = match self
            .service
            .register_bundle(token, bundle_id, &self.engine, &self.description)
            .await
        {
            Ok(registration) => registration,
            Err(ProvisioningError::Conflict { id }) => {
                tracing::warn!(bundle_id = %id, "bundle exists, creating new version");
                self.service
                    .create_bundle_version(token, bundle_id, &self.engine, &self.description)
                    .await?
            }
            Err(e) => return Err(e),
        };
        tracing::info!(
            id = %registration.id,
            version = registration.version,
            "bundle registered"
        );

        let package = tokio::fs::read(package_path).await?;
        let file_name = package_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("package.zip");
        self.service
            .upload_package(
                &registration.upload_parameters.endpoint_url,
                &registration.upload_parameters.form_data,
                package,
                file_name,
            )
            .await?;

        Ok(ProvisionedBundle {
            qualified_id: registration.id,
            version: registration.version,
        })
    }

    /// Register `activity_id` (or a new version of it) bound to a bundle.
    ///
    /// `bundle_qualified_id` must already include the alias qualifier
    /// (`owner.Bundle+alias`).
    pub async fn ensure_activity(
        &self,
        token: &AccessToken,
        activity_id: &str,
        bundle_qualified_id: &str,
        command_line: &[String],
    ) -> Result<ProvisionedActivity, ProvisioningError> {
        let spec = ActivitySpec {
            id: activity_id.to_string(),
            engine: self.engine.clone(),
            command_line: command_line.to_vec(),
            bundle_qualified_id: bundle_qualified_id.to_string(),
            description: self.description.clone(),
        };

        let registration = match self.service.create_activity(token, &spec).await {
            Ok(registration) => registration,
            Err(ProvisioningError::Conflict { id }) => {
                tracing::warn!(activity_id = %id, "activity exists, creating new version");
                self.service.create_activity_version(token, &spec).await?
            }
            Err(e) => return Err(e),
        };
        tracing::info!(
            id = %registration.id,
            version = registration.version,
            "activity registered"
        );

        Ok(ProvisionedActivity {
            qualified_id: registration.id,
            version: registration.version,
        })
    }

    /// Bind `alias_id` to a specific version of a bundle or activity.
    pub async fn ensure_alias(
        &self,
        token: &AccessToken,
        owner: AliasOwner,
        owner_id: &str,
        alias_id: &str,
        version: u32,
    ) -> Result<(), ProvisioningError> {
        self.service
            .create_alias(token, owner, owner_id, alias_id, version)
            .await?;
        tracing::info!(owner_id, alias_id, version, "alias bound");
        Ok(())
    }
}
