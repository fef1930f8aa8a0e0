//! Work item submission and polling.
//!
//! Submission nests the numeric parameters and the input URN inside a single
//! stringified JSON argument; the remote activity unpacks it. Polling is a
//! small state machine over the remote status with a local wall-clock
//! deadline that synthesizes a `timeout` terminal state, and a cancellation
//! token that turns the wait into a `cancelled` outcome instead of hanging.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::auth::AccessToken;
use crate::error::{PollError, SubmissionError};
use crate::params::ParameterSet;
use crate::service::AutomationService;

/// Lifecycle state of a job. `Timeout` and `Cancelled` (when produced by the
/// local cancellation token) are synthesized locally; the rest mirror the
/// remote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    /// Map a remote status string. The service reports failure as a family
    /// of `failed*` statuses; anything unrecognized counts as still running.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "pending" => Self::Pending,
            "success" => Self::Success,
            "cancelled" => Self::Cancelled,
            s if s.starts_with("failed") => Self::Failed,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "inprogress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal result of polling: the final status plus the report location,
/// which is only meaningful on `Success`.
#[derive(Debug, Clone)]
pub struct PolledJob {
    pub status: JobStatus,
    pub report_url: Option<String>,
}

/// Builds and submits work items.
pub struct JobSubmitter {
    service: Arc<dyn AutomationService>,
}

impl JobSubmitter {
    pub fn new(service: Arc<dyn AutomationService>) -> Self {
        Self { service }
    }

    /// Submit a job against a fully qualified activity id; returns the job id.
    pub async fn submit(
        &self,
        token: &AccessToken,
        qualified_activity_id: &str,
        personal_access_token: &SecretString,
        file_urn: &str,
        parameters: &ParameterSet,
    ) -> Result<String, SubmissionError> {
        let values: BTreeMap<&str, f64> = parameters
            .iter()
            .map(|p| (p.name.as_str(), p.value))
            .collect();
        let task_parameters = json!({
            "fileURN": file_urn,
            "parameters": values,
        });

        let mut arguments = BTreeMap::new();
        arguments.insert(
            "PersonalAccessToken".to_string(),
            personal_access_token.expose_secret().to_string(),
        );
        // The activity expects the task payload as a stringified JSON value.
        arguments.insert("TaskParameters".to_string(), task_parameters.to_string());

        let job_id = self
            .service
            .submit_job(token, qualified_activity_id, &arguments)
            .await?;
        tracing::info!(job_id = %job_id, activity = %qualified_activity_id, "work item submitted");
        Ok(job_id)
    }
}

/// Polls a job until it reaches a terminal state, the deadline expires, or
/// the cancellation token fires.
pub struct JobPoller {
    service: Arc<dyn AutomationService>,
    poll_interval: Duration,
    timeout: Duration,
}

impl JobPoller {
    pub fn new(
        service: Arc<dyn AutomationService>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            poll_interval,
            timeout,
        }
    }

    /// Poll until terminal. Transport errors abort the loop as [`PollError`];
    /// deadline expiry and cancellation are outcomes, not errors.
    pub async fn poll(
        &self,
        token: &AccessToken,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PolledJob, PollError> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let snapshot = self.service.job_status(token, job_id).await?;
            let status = JobStatus::from_remote(&snapshot.status);
            tracing::debug!(job_id, status = %status, "poll");

            if status.is_terminal() {
                tracing::info!(job_id, status = %status, "job reached terminal state");
                return Ok(PolledJob {
                    status,
                    report_url: snapshot.report_url,
                });
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(job_id, "deadline exceeded, synthesizing timeout");
                return Ok(PolledJob {
                    status: JobStatus::Timeout,
                    report_url: None,
                });
            }

            let wake_at = std::cmp::min(now + self.poll_interval, deadline);
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(job_id, "polling cancelled");
                    return Ok(PolledJob {
                        status: JobStatus::Cancelled,
                        report_url: None,
                    });
                }
                _ = tokio::time::sleep_until(wake_at) => {}
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(job_id, "deadline exceeded, synthesizing timeout");
                return Ok(PolledJob {
                    status: JobStatus::Timeout,
                    report_url: None,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::service::mock::MockService;

    fn token() -> AccessToken {
        AccessToken::new(SecretString::from("t"))
    }

    #[test]
    fn remote_statuses_map_onto_the_state_machine() {
        assert_eq!(JobStatus::from_remote("pending"), JobStatus::Pending);
        assert_eq!(JobStatus::from_remote("inprogress"), JobStatus::InProgress);
        assert_eq!(JobStatus::from_remote("success"), JobStatus::Success);
        assert_eq!(JobStatus::from_remote("cancelled"), JobStatus::Cancelled);
        assert_eq!(
            JobStatus::from_remote("failedInstructions"),
            JobStatus::Failed
        );
        assert_eq!(JobStatus::from_remote("somethingNew"), JobStatus::InProgress);
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
    }

    #[tokio::test]
    async fn submit_nests_parameters_inside_task_arguments() {
        let service = Arc::new(MockService::new());
        let submitter = JobSubmitter::new(service.clone());
        let mut parameters = ParameterSet::new();
        parameters.insert("Width", 12.5);

        let job_id = submitter
            .submit(
                &token(),
                "owner.Activity+prod",
                &SecretString::from("pat-value"),
                "dXJu",
                &parameters,
            )
            .await
            .unwrap();
        assert_eq!(job_id, "job-1");

        let arguments = service.submitted_arguments.lock().await.clone().unwrap();
        assert_eq!(arguments["PersonalAccessToken"], "pat-value");
        let task: serde_json::Value =
            serde_json::from_str(&arguments["TaskParameters"]).unwrap();
        assert_eq!(task["fileURN"], "dXJu");
        assert_eq!(task["parameters"]["Width"], 12.5);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_terminates_after_exactly_three_polls_on_success() {
        let service = Arc::new(MockService::new());
        service.push_status("inprogress", None).await;
        service.push_status("inprogress", None).await;
        service.push_status("success", Some("https://x/report")).await;

        let poller = JobPoller::new(
            service.clone(),
            Duration::from_secs(5),
            Duration::from_secs(600),
        );
        let outcome = poller
            .poll(&token(), "job-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.report_url.as_deref(), Some("https://x/report"));
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_synthesizes_timeout_and_stops() {
        let service = Arc::new(MockService::new());
        service.push_status("inprogress", None).await;

        let poller = JobPoller::new(
            service.clone(),
            Duration::from_secs(5),
            Duration::from_secs(12),
        );
        let outcome = poller
            .poll(&token(), "job-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Timeout);
        assert!(outcome.report_url.is_none());
        // Polls at t=0, 5, 10; the deadline lands before a fourth poll.
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_wait_promptly() {
        let service = Arc::new(MockService::new());
        service.push_status("inprogress", None).await;

        let cancel = CancellationToken::new();
        let poller = JobPoller::new(
            service.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(7200),
        );

        let handle = {
            let cancel = cancel.clone();
            let token = token();
            tokio::spawn(async move { poller.poll(&token, "job-1", &cancel).await })
        };
        // Let the first poll happen, then cancel during the long wait.
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_aborts_the_loop() {
        let service = Arc::new(MockService::new());
        // No scripted statuses: the mock reports an invalid response.
        let poller = JobPoller::new(
            service,
            Duration::from_millis(1),
            Duration::from_secs(10),
        );
        let err = poller
            .poll(&token(), "job-1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::InvalidResponse { .. }));
    }
}
