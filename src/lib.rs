//! Client pipeline for running parametric design jobs on a cloud
//! design-automation service.
//!
//! The flow is linear: exchange credentials for a bearer token, upload the
//! local model into object storage, provision the app bundle and activity
//! (idempotently), submit a work item carrying the desired parameter values,
//! poll it to a terminal state, then parse the result report and reconcile
//! the remote parameter set against the local one.
//!
//! [`Orchestrator`] wires the stages together; each stage is also usable on
//! its own against anything implementing [`service::AutomationService`].

pub mod auth;
pub mod config;
pub mod error;
pub mod job;
pub mod metadata;
pub mod orchestrator;
pub mod params;
pub mod provision;
pub mod service;
pub mod upload;

pub use auth::{AccessToken, CredentialCache, CredentialSource};
pub use config::{Config, StaticCredentials};
pub use error::OrchestratorError;
pub use job::{JobPoller, JobStatus, JobSubmitter, PolledJob};
pub use metadata::{ArtifactFetcher, MetadataWalker};
pub use orchestrator::{JobInput, JobOutcome, ModelInspection, Orchestrator};
pub use params::{Parameter, ParameterSet, ReconcilePlan, reconcile};
pub use provision::{BundleProvisioner, ProvisionedActivity, ProvisionedBundle};
pub use service::{AutomationService, HttpAutomationService};
pub use upload::{Asset, AssetUploader, decode_urn, encode_urn};
