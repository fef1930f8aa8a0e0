//! Bearer credential acquisition and caching.
//!
//! One [`CredentialCache`] instance serves all jobs of an orchestrator. The
//! cache holds a single token and refreshes it through the service before it
//! reaches the expiry buffer. Refreshes are serialized by the cache lock:
//! concurrent callers that observe an expiring token wait for the one
//! in-flight exchange instead of issuing their own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::service::AutomationService;

/// Anything that can produce client credentials on demand.
///
/// The host plugin implements this over whatever it stores credentials in;
/// the pipeline never inspects that object beyond this one method.
pub trait CredentialSource: Send + Sync {
    fn client_credentials(&self) -> (String, SecretString);
}

/// A bearer token, redacted in Debug output.
#[derive(Clone)]
pub struct AccessToken {
    bearer: SecretString,
}

impl AccessToken {
    pub(crate) fn new(bearer: SecretString) -> Self {
        Self { bearer }
    }

    /// The raw bearer string, for Authorization headers.
    pub fn bearer(&self) -> &str {
        self.bearer.expose_secret()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("bearer", &"[REDACTED]")
            .finish()
    }
}

struct CachedToken {
    token: AccessToken,
    acquired_at: Instant,
    expires_in: Duration,
}

impl CachedToken {
    /// Valid only while `now - acquired_at < expires_in - buffer`.
    fn is_fresh(&self, buffer: Duration) -> bool {
        let usable = self.expires_in.saturating_sub(buffer);
        self.acquired_at.elapsed() < usable
    }
}

/// Caches one bearer token per orchestrator instance.
pub struct CredentialCache {
    service: Arc<dyn AutomationService>,
    source: Arc<dyn CredentialSource>,
    buffer: Duration,
    state: Mutex<Option<CachedToken>>,
}

impl CredentialCache {
    /// `buffer` is clamped to at least 60 seconds.
    pub fn new(
        service: Arc<dyn AutomationService>,
        source: Arc<dyn CredentialSource>,
        buffer: Duration,
    ) -> Self {
        Self {
            service,
            source,
            buffer: buffer.max(Duration::from_secs(60)),
            state: Mutex::new(None),
        }
    }

    /// Return a valid token, exchanging credentials only when the cached one
    /// is missing or inside the expiry buffer.
    ///
    /// Holding the state lock across the exchange is what guarantees a single
    /// in-flight refresh per cache.
    pub async fn get(&self) -> Result<AccessToken, AuthError> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if cached.is_fresh(self.buffer) {
                return Ok(cached.token.clone());
            }
            tracing::debug!("cached token inside expiry buffer, refreshing");
        }

        let (client_id, client_secret) = self.source.client_credentials();
        let grant = self
            .service
            .authenticate(&client_id, &client_secret)
            .await?;
        tracing::info!(expires_in = grant.expires_in, "acquired access token");

        let token = AccessToken::new(grant.access_token);
        *state = Some(CachedToken {
            token: token.clone(),
            acquired_at: Instant::now(),
            expires_in: Duration::from_secs(grant.expires_in),
        });
        Ok(token)
    }
}
