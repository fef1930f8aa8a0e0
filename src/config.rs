//! Configuration for the design automation pipeline.
//!
//! Everything has a sensible default for the public Autodesk endpoints;
//! env vars override individual knobs. Only the client credentials are
//! required (`FORGEFLOW_CLIENT_ID` / `FORGEFLOW_CLIENT_SECRET`).

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::auth::CredentialSource;
use crate::error::ConfigError;

/// Default host for all Autodesk Platform Services endpoints.
pub const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";

/// Read an optional env var, treating empty strings as unset.
fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an optional env var.
fn parse_optional_env<T: std::str::FromStr>(
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match optional_env(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar {
                name,
                reason: format!("could not parse '{}'", raw),
            }),
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    optional_env(name).ok_or(ConfigError::MissingVar { name })
}

/// Pipeline configuration: endpoints, provisioning identity, and timing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for all service endpoints (override for tests/proxies).
    pub base_url: String,
    /// Design automation region segment, e.g. `us-east`.
    pub region: String,
    /// Object storage bucket receiving input models.
    pub bucket_key: String,
    /// Engine the bundle and activity run on.
    pub engine: String,
    /// Bundle id registered for this pipeline.
    pub bundle_id: String,
    /// Activity id registered for this pipeline.
    pub activity_id: String,
    /// Alias bound to the provisioned bundle/activity versions.
    pub alias_id: String,
    /// Description attached to registered bundles and activities.
    pub description: String,
    /// Command line the activity executes.
    pub command_line: Vec<String>,
    /// Local path of the bundle package archive to upload when provisioning.
    pub package_path: PathBuf,
    /// Expiry requested for signed upload URLs.
    pub signed_url_expiry_minutes: u32,
    /// Wait between job status polls.
    pub poll_interval: Duration,
    /// Wall-clock budget for a job to reach a terminal state.
    pub job_timeout: Duration,
    /// Attempts before giving up on a still-deriving metadata document.
    pub metadata_max_attempts: u32,
    /// Fixed delay between metadata attempts.
    pub metadata_retry_delay: Duration,
    /// Upper bound on hierarchy nodes visited in one walk.
    pub hierarchy_node_limit: usize,
    /// Numeric tolerance below which a parameter change is ignored.
    pub parameter_epsilon: f64,
    /// Refresh tokens this long before their actual expiry.
    pub token_expiry_buffer: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            region: "us-east".to_string(),
            bucket_key: "forgeflow-models".to_string(),
            engine: "Autodesk.Fusion+Latest".to_string(),
            bundle_id: "ConfigureDesignBundle".to_string(),
            activity_id: "ConfigureDesignActivity".to_string(),
            alias_id: "prod".to_string(),
            description: "Parametric model update via design automation".to_string(),
            command_line: vec![
                r"$(engine.path)\Fusion360Core.exe --headless /Contents/main.ts".to_string(),
            ],
            package_path: PathBuf::from("bundle.zip"),
            signed_url_expiry_minutes: 2,
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(600),
            metadata_max_attempts: 10,
            metadata_retry_delay: Duration::from_secs(5),
            hierarchy_node_limit: 100_000,
            parameter_epsilon: 1e-4,
            token_expiry_buffer: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from env vars, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = optional_env("FORGEFLOW_BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = optional_env("FORGEFLOW_REGION") {
            config.region = v;
        }
        if let Some(v) = optional_env("FORGEFLOW_BUCKET_KEY") {
            config.bucket_key = v;
        }
        if let Some(v) = optional_env("FORGEFLOW_ENGINE") {
            config.engine = v;
        }
        if let Some(v) = optional_env("FORGEFLOW_BUNDLE_ID") {
            config.bundle_id = v;
        }
        if let Some(v) = optional_env("FORGEFLOW_ACTIVITY_ID") {
            config.activity_id = v;
        }
        if let Some(v) = optional_env("FORGEFLOW_ALIAS_ID") {
            config.alias_id = v;
        }
        if let Some(v) = optional_env("FORGEFLOW_PACKAGE_PATH") {
            config.package_path = PathBuf::from(v);
        }
        if let Some(v) = parse_optional_env::<u64>("FORGEFLOW_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_optional_env::<u64>("FORGEFLOW_JOB_TIMEOUT_SECS")? {
            config.job_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_optional_env::<u32>("FORGEFLOW_METADATA_MAX_ATTEMPTS")? {
            config.metadata_max_attempts = v;
        }
        if let Some(v) = parse_optional_env::<u64>("FORGEFLOW_METADATA_RETRY_DELAY_SECS")? {
            config.metadata_retry_delay = Duration::from_secs(v);
        }
        if let Some(v) = parse_optional_env::<usize>("FORGEFLOW_HIERARCHY_NODE_LIMIT")? {
            config.hierarchy_node_limit = v;
        }
        if let Some(v) = parse_optional_env::<f64>("FORGEFLOW_PARAMETER_EPSILON")? {
            config.parameter_epsilon = v;
        }
        if let Some(v) = parse_optional_env::<u64>("FORGEFLOW_TOKEN_BUFFER_SECS")? {
            // The credential invariant assumes at least a minute of slack.
            config.token_expiry_buffer = Duration::from_secs(v.max(60));
        }

        Ok(config)
    }
}

/// Client credentials held in memory, never logged.
#[derive(Clone)]
pub struct StaticCredentials {
    client_id: String,
    client_secret: SecretString,
}

impl StaticCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Load from `FORGEFLOW_CLIENT_ID` / `FORGEFLOW_CLIENT_SECRET`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = required_env("FORGEFLOW_CLIENT_ID")?;
        let client_secret = required_env("FORGEFLOW_CLIENT_SECRET")?;
        Ok(Self::new(client_id, SecretString::from(client_secret)))
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

impl CredentialSource for StaticCredentials {
    fn client_credentials(&self) -> (String, SecretString) {
        (self.client_id.clone(), self.client_secret.clone())
    }
}
