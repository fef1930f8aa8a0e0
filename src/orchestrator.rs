//! End-to-end pipeline: upload, provision, submit, poll, reconcile.
//!
//! The orchestrator owns one instance of each stage and a shared credential
//! cache; every run borrows a fresh token from the cache and threads it
//! through the stages. Jobs are independent, so one orchestrator can serve
//! many runs concurrently.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialCache, CredentialSource};
use crate::config::Config;
use crate::error::OrchestratorError;
use crate::job::{JobPoller, JobStatus, JobSubmitter};
use crate::metadata::{ArtifactFetcher, MetadataWalker};
use crate::params::{self, ParameterSet, ReconcilePlan};
use crate::provision::BundleProvisioner;
use crate::service::{AliasOwner, AutomationService, ObjectProperties, Viewable};
use crate::upload::AssetUploader;

/// The model a job operates on: a local file still to be uploaded, or a
/// resource name of something already in object storage.
#[derive(Debug, Clone)]
pub enum JobInput {
    LocalFile(PathBuf),
    Urn(String),
}

/// What a finished run produced.
///
/// `remote_parameters` and `plan` are only present when the job succeeded
/// and its report parsed cleanly.
#[derive(Debug)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub report_url: Option<String>,
    /// Parameters the remote run reported back.
    pub remote_parameters: Option<ParameterSet>,
    /// Changes to apply locally to converge on the remote state.
    pub plan: Option<ReconcilePlan>,
}

/// Snapshot of a translated model's structure.
#[derive(Debug)]
pub struct ModelInspection {
    pub manifest_status: String,
    pub viewables: Vec<Viewable>,
    /// Every object id reachable in the primary viewable's hierarchy.
    pub object_ids: BTreeSet<i64>,
    pub properties: Vec<ObjectProperties>,
}

/// Drives the whole pipeline against one automation service.
pub struct Orchestrator {
    credentials: CredentialCache,
    config: Config,
    uploader: AssetUploader,
    provisioner: BundleProvisioner,
    submitter: JobSubmitter,
    poller: JobPoller,
    fetcher: ArtifactFetcher,
    walker: MetadataWalker,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn AutomationService>,
        source: Arc<dyn CredentialSource>,
        config: Config,
    ) -> Self {
        let credentials =
            CredentialCache::new(service.clone(), source, config.token_expiry_buffer);
        let uploader = AssetUploader::new(service.clone(), config.signed_url_expiry_minutes);
        let provisioner = BundleProvisioner::new(
            service.clone(),
            config.engine.clone(),
            config.description.clone(),
        );
        let submitter = JobSubmitter::new(service.clone());
        let poller = JobPoller::new(service.clone(), config.poll_interval, config.job_timeout);
        let fetcher = ArtifactFetcher::new(service.clone());
        let walker = MetadataWalker::new(
            service,
            config.metadata_max_attempts,
            config.metadata_retry_delay,
            config.hierarchy_node_limit,
        );
        Self {
            credentials,
            config,
            uploader,
            provisioner,
            submitter,
            poller,
            fetcher,
            walker,
        }
    }

    /// Run one job: resolve the input to a URN, make sure the bundle and
    /// activity exist, submit with the desired parameters, and poll to a
    /// terminal state. On success the report is fetched, parsed, and diffed
    /// against `parameters` so the caller knows what the run changed.
    pub async fn run_job(
        &self,
        input: &JobInput,
        parameters: &ParameterSet,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, OrchestratorError> {
        let token = self.credentials.get().await?;

        let urn = match input {
            JobInput::Urn(urn) => urn.clone(),
            JobInput::LocalFile(path) => {
                let asset = self
                    .uploader
                    .upload(&token, &self.config.bucket_key, path)
                    .await?;
                asset.urn
            }
        };

        let bundle = self
            .provisioner
            .ensure_bundle(&token, &self.config.bundle_id, &self.config.package_path)
            .await?;
        self.provisioner
            .ensure_alias(
                &token,
                AliasOwner::Bundle,
                &self.config.bundle_id,
                &self.config.alias_id,
                bundle.version,
            )
            .await?;

        let bundle_reference = format!("{}+{}", bundle.qualified_id, self.config.alias_id);
        let activity = self
            .provisioner
            .ensure_activity(
                &token,
                &self.config.activity_id,
                &bundle_reference,
                &self.config.command_line,
            )
            .await?;
        self.provisioner
            .ensure_alias(
                &token,
                AliasOwner::Activity,
                &self.config.activity_id,
                &self.config.alias_id,
                activity.version,
            )
            .await?;

        let activity_reference = format!("{}+{}", activity.qualified_id, self.config.alias_id);
        let access = SecretString::from(token.bearer().to_string());
        let job_id = self
            .submitter
            .submit(&token, &activity_reference, &access, &urn, parameters)
            .await?;

        let polled = self.poller.poll(&token, &job_id, cancel).await?;
        if polled.status != JobStatus::Success {
            tracing::warn!(job_id = %job_id, status = %polled.status, "job did not succeed");
            return Ok(JobOutcome {
                status: polled.status,
                report_url: polled.report_url,
                remote_parameters: None,
                plan: None,
            });
        }

        let (remote_parameters, plan) = match &polled.report_url {
            Some(report_url) => {
                let report = self.fetcher.fetch_report(report_url).await?;
                let remote = ParameterSet::from_report(&report)?;
                let plan = params::reconcile(parameters, &remote, self.config.parameter_epsilon);
                tracing::info!(
                    job_id = %job_id,
                    adds = plan.to_add.len(),
                    removes = plan.to_remove.len(),
                    updates = plan.to_update.len(),
                    "run reconciled"
                );
                (Some(remote), Some(plan))
            }
            None => {
                tracing::warn!(job_id = %job_id, "successful job returned no report");
                (None, None)
            }
        };

        Ok(JobOutcome {
            status: polled.status,
            report_url: polled.report_url,
            remote_parameters,
            plan,
        })
    }

    /// Translate a model and walk its derived structure: viewables, the full
    /// hierarchy of the primary viewable, and its object properties.
    pub async fn inspect_model(&self, urn: &str) -> Result<ModelInspection, OrchestratorError> {
        let token = self.credentials.get().await?;

        self.walker.start_translation(&token, urn).await?;
        let manifest = self.walker.await_translation(&token, urn).await?;

        let viewables = self.walker.viewables(&token, urn).await?;
        // Prefer the 3d viewable; models always have one, 2d sheets are extra.
        let primary = viewables
            .iter()
            .find(|v| v.role.as_deref() == Some("3d"))
            .or_else(|| viewables.first());

        let (object_ids, properties) = match primary {
            Some(viewable) => {
                let ids = self.walker.walk_hierarchy(&token, urn, &viewable.guid).await?;
                let props = self
                    .walker
                    .object_properties(&token, urn, &viewable.guid)
                    .await?;
                (ids, props)
            }
            None => (BTreeSet::new(), Vec::new()),
        };

        Ok(ModelInspection {
            manifest_status: manifest.status,
            viewables,
            object_ids,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::service::{mock::MockService, ManifestStatus};

    fn test_config(package_path: PathBuf) -> Config {
        Config {
            package_path,
            poll_interval: Duration::from_millis(10),
            job_timeout: Duration::from_secs(60),
            metadata_retry_delay: Duration::from_millis(10),
            ..Config::default()
        }
    }

    struct TestSource;

    impl CredentialSource for TestSource {
        fn client_credentials(&self) -> (String, SecretString) {
            ("client".to_string(), SecretString::from("secret"))
        }
    }

    fn orchestrator(service: Arc<MockService>, config: Config) -> Orchestrator {
        Orchestrator::new(service, Arc::new(TestSource), config)
    }

    fn package() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"zip bytes").unwrap();
        file
    }

    #[tokio::test(start_paused = true)]
    async fn run_job_reconciles_on_success() {
        let service = Arc::new(MockService::new());
        service.push_status("inprogress", None).await;
        service.push_status("success", Some("https://x/report")).await;
        *service.report_body.lock().await = r#"{"Width": "42", "Depth": "3"}"#.to_string();

        let package = package();
        let orchestrator = orchestrator(
            service.clone(),
            test_config(package.path().to_path_buf()),
        );

        let mut parameters = ParameterSet::new();
        parameters.insert("Width", 10.0);
        parameters.insert("Depth", 3.0);

        let outcome = orchestrator
            .run_job(
                &JobInput::Urn("dXJu".to_string()),
                &parameters,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Success);
        let remote = outcome.remote_parameters.unwrap();
        assert_eq!(remote.get("Width"), Some(42.0));

        let plan = outcome.plan.unwrap();
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].name, "Width");
        assert!(plan.to_add.is_empty());
        assert!(plan.to_remove.is_empty());

        // One token exchange serves the whole run.
        assert_eq!(service.auth_calls.load(Ordering::SeqCst), 1);
        // Bundle alias and activity alias were both bound.
        assert_eq!(service.alias_calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_skips_report_and_reconciliation() {
        let service = Arc::new(MockService::new());
        service.push_status("failedInstructions", None).await;

        let package = package();
        let orchestrator = orchestrator(
            service.clone(),
            test_config(package.path().to_path_buf()),
        );

        let outcome = orchestrator
            .run_job(
                &JobInput::Urn("dXJu".to_string()),
                &ParameterSet::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.remote_parameters.is_none());
        assert!(outcome.plan.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn local_file_input_is_uploaded_first() {
        let service = Arc::new(MockService::new());
        service.push_status("success", Some("https://x/report")).await;
        *service.report_body.lock().await = "{}".to_string();

        let mut model = tempfile::NamedTempFile::new().unwrap();
        model.write_all(b"model bytes").unwrap();
        let package = package();
        let orchestrator = orchestrator(
            service.clone(),
            test_config(package.path().to_path_buf()),
        );

        let outcome = orchestrator
            .run_job(
                &JobInput::LocalFile(model.path().to_path_buf()),
                &ParameterSet::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Success);
        // The submitted URN must decode back to the finalized object id.
        let arguments = service.submitted_arguments.lock().await.clone().unwrap();
        let task: serde_json::Value =
            serde_json::from_str(&arguments["TaskParameters"]).unwrap();
        let urn = task["fileURN"].as_str().unwrap();
        assert!(crate::upload::decode_urn(urn).unwrap().contains("os.object"));
    }

    #[tokio::test(start_paused = true)]
    async fn inspect_model_walks_the_primary_viewable() {
        let service = Arc::new(MockService::new());
        service.manifests.lock().await.push_back(ManifestStatus {
            status: "success".to_string(),
            progress: Some("complete".to_string()),
        });
        service.hierarchies.lock().await.push_back(Some(vec![
            crate::service::HierarchyNode {
                objectid: Some(1),
                name: Some("Root".to_string()),
                objects: vec![crate::service::HierarchyNode {
                    objectid: Some(2),
                    name: None,
                    objects: vec![],
                }],
            },
        ]));

        let package = package();
        let orchestrator = orchestrator(
            service.clone(),
            test_config(package.path().to_path_buf()),
        );

        let inspection = orchestrator.inspect_model("dXJu").await.unwrap();
        assert_eq!(inspection.manifest_status, "success");
        assert_eq!(inspection.object_ids, BTreeSet::from([1, 2]));
        assert_eq!(inspection.viewables.len(), 1);
    }
}
