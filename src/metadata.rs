//! Report retrieval and model metadata inspection.
//!
//! The derivative pipeline is asynchronous on the remote side: hierarchy and
//! property documents can come back "not ready yet". Those responses are
//! retried a bounded number of times with a fixed delay, then surfaced as
//! `MetadataError::RetriesExhausted`. The hierarchy walk itself is iterative
//! with a node-count guard so a malformed or enormous tree cannot pin memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AccessToken;
use crate::error::MetadataError;
use crate::params;
use crate::service::{
    AutomationService, HierarchyNode, ManifestStatus, ObjectProperties, PropertyQuery, Viewable,
};

/// Downloads and parses job report artifacts.
pub struct ArtifactFetcher {
    service: Arc<dyn AutomationService>,
}

impl ArtifactFetcher {
    pub fn new(service: Arc<dyn AutomationService>) -> Self {
        Self { service }
    }

    /// Fetch a report and parse it into a flat name→value mapping.
    pub async fn fetch_report(
        &self,
        report_url: &str,
    ) -> Result<BTreeMap<String, String>, MetadataError> {
        let body = self.service.fetch_report(report_url).await?;
        params::parse_report(&body)
    }
}

/// Walks remote model metadata: translation, viewables, hierarchy, properties.
pub struct MetadataWalker {
    service: Arc<dyn AutomationService>,
    max_attempts: u32,
    retry_delay: Duration,
    node_limit: usize,
}

impl MetadataWalker {
    pub fn new(
        service: Arc<dyn AutomationService>,
        max_attempts: u32,
        retry_delay: Duration,
        node_limit: usize,
    ) -> Self {
        Self {
            service,
            max_attempts: max_attempts.max(1),
            retry_delay,
            node_limit,
        }
    }

    /// Kick off derivative translation for a model.
    pub async fn start_translation(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<(), MetadataError> {
        self.service.start_translation(token, urn).await
    }

    /// Poll the manifest until translation reaches a terminal status.
    pub async fn await_translation(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<ManifestStatus, MetadataError> {
        for attempt in 1..=self.max_attempts {
            let manifest = self.service.manifest_status(token, urn).await?;
            match manifest.status.as_str() {
                "success" | "failed" | "timeout" => {
                    tracing::info!(status = %manifest.status, "translation finished");
                    return Ok(manifest);
                }
                status => {
                    tracing::debug!(
                        attempt,
                        status,
                        progress = manifest.progress.as_deref().unwrap_or("-"),
                        "translation in progress"
                    );
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(MetadataError::TranslationTimedOut {
            attempts: self.max_attempts,
        })
    }

    /// List the viewables derived for a model.
    pub async fn viewables(
        &self,
        token: &AccessToken,
        urn: &str,
    ) -> Result<Vec<Viewable>, MetadataError> {
        self.service.list_viewables(token, urn).await
    }

    /// Fetch the hierarchy of a viewable and collect every object id.
    pub async fn walk_hierarchy(
        &self,
        token: &AccessToken,
        urn: &str,
        viewable_id: &str,
    ) -> Result<BTreeSet<i64>, MetadataError> {
        let roots = self.hierarchy_with_retry(token, urn, viewable_id, None).await?;
        collect_object_ids(&roots, self.node_limit)
    }

    /// Fetch the hierarchy scoped to a single object id.
    pub async fn filtered_hierarchy(
        &self,
        token: &AccessToken,
        urn: &str,
        viewable_id: &str,
        object_id: i64,
    ) -> Result<Vec<HierarchyNode>, MetadataError> {
        self.hierarchy_with_retry(token, urn, viewable_id, Some(object_id))
            .await
    }

    async fn hierarchy_with_retry(
        &self,
        token: &AccessToken,
        urn: &str,
        viewable_id: &str,
        object_id: Option<i64>,
    ) -> Result<Vec<HierarchyNode>, MetadataError> {
        for attempt in 1..=self.max_attempts {
            match self
                .service
                .object_hierarchy(token, urn, viewable_id, object_id)
                .await?
            {
                Some(roots) => return Ok(roots),
                None => {
                    tracing::warn!(attempt, "hierarchy still deriving, retrying");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(MetadataError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Fetch all object properties of a viewable, waiting out the remote
    /// extraction job if necessary.
    pub async fn object_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        viewable_id: &str,
    ) -> Result<Vec<ObjectProperties>, MetadataError> {
        for attempt in 1..=self.max_attempts {
            match self.service.object_properties(token, urn, viewable_id).await? {
                Some(properties) => return Ok(properties),
                None => {
                    tracing::warn!(attempt, "properties still extracting, retrying");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(MetadataError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Query properties with an optional name prefix and pagination.
    pub async fn query_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        viewable_id: &str,
        query: &PropertyQuery,
    ) -> Result<Vec<ObjectProperties>, MetadataError> {
        self.service
            .query_properties(token, urn, viewable_id, query)
            .await
    }
}

/// Collect every `objectid` in the tree, iteratively, refusing to visit more
/// than `node_limit` nodes.
pub fn collect_object_ids(
    roots: &[HierarchyNode],
    node_limit: usize,
) -> Result<BTreeSet<i64>, MetadataError> {
    let mut ids = BTreeSet::new();
    let mut stack: Vec<&HierarchyNode> = roots.iter().collect();
    let mut visited = 0usize;

    while let Some(node) = stack.pop() {
        visited += 1;
        if visited > node_limit {
            return Err(MetadataError::HierarchyTooLarge { limit: node_limit });
        }
        if let Some(id) = node.objectid {
            ids.insert(id);
        }
        stack.extend(node.objects.iter());
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use secrecy::SecretString;

    use super::*;
    use crate::service::mock::MockService;

    fn token() -> AccessToken {
        AccessToken::new(SecretString::from("t"))
    }

    fn node(id: i64, children: Vec<HierarchyNode>) -> HierarchyNode {
        HierarchyNode {
            objectid: Some(id),
            name: None,
            objects: children,
        }
    }

    fn walker(service: Arc<MockService>) -> MetadataWalker {
        MetadataWalker::new(service, 3, Duration::from_millis(1), 10_000)
    }

    #[test]
    fn collect_gathers_every_object_id() {
        let roots = vec![node(1, vec![node(2, vec![]), node(3, vec![node(4, vec![])])])];
        let ids = collect_object_ids(&roots, 100).unwrap();
        assert_eq!(ids, BTreeSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn collect_ignores_nodes_without_ids() {
        let anonymous = HierarchyNode {
            objectid: None,
            name: Some("group".to_string()),
            objects: vec![node(7, vec![])],
        };
        let ids = collect_object_ids(&[anonymous], 100).unwrap();
        assert_eq!(ids, BTreeSet::from([7]));
    }

    #[test]
    fn collect_refuses_oversized_trees() {
        let roots = vec![node(1, (0..50).map(|i| node(i + 10, vec![])).collect())];
        let err = collect_object_ids(&roots, 10).unwrap_err();
        assert!(matches!(err, MetadataError::HierarchyTooLarge { limit: 10 }));
    }

    #[tokio::test(start_paused = true)]
    async fn walk_retries_until_hierarchy_is_ready() {
        let service = Arc::new(MockService::new());
        {
            let mut hierarchies = service.hierarchies.lock().await;
            hierarchies.push_back(None);
            hierarchies.push_back(Some(vec![node(1, vec![node(2, vec![])])]));
        }
        let walker = walker(service.clone());

        let ids = walker.walk_hierarchy(&token(), "urn", "guid").await.unwrap();
        assert_eq!(ids, BTreeSet::from([1, 2]));
        assert_eq!(service.hierarchy_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn walk_gives_up_after_bounded_attempts() {
        let service = Arc::new(MockService::new());
        service.hierarchies.lock().await.push_back(None);
        let walker = walker(service.clone());

        let err = walker
            .walk_hierarchy(&token(), "urn", "guid")
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::RetriesExhausted { attempts: 3 }));
        assert_eq!(service.hierarchy_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn translation_polls_to_terminal_status() {
        let service = Arc::new(MockService::new());
        {
            let mut manifests = service.manifests.lock().await;
            manifests.push_back(ManifestStatus {
                status: "inprogress".to_string(),
                progress: Some("40%".to_string()),
            });
            manifests.push_back(ManifestStatus {
                status: "success".to_string(),
                progress: Some("complete".to_string()),
            });
        }
        let walker = walker(service.clone());

        let manifest = walker.await_translation(&token(), "urn").await.unwrap();
        assert_eq!(manifest.status, "success");
        assert_eq!(service.manifest_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn translation_errors_when_attempts_are_exhausted() {
        let service = Arc::new(MockService::new());
        service.manifests.lock().await.push_back(ManifestStatus {
            status: "inprogress".to_string(),
            progress: None,
        });
        let walker = walker(service);

        let err = walker.await_translation(&token(), "urn").await.unwrap_err();
        assert!(matches!(
            err,
            MetadataError::TranslationTimedOut { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn report_fetch_parses_flat_documents() {
        let service = Arc::new(MockService::new());
        *service.report_body.lock().await = r#"{"Width": "10", "Depth": "2.5"}"#.to_string();
        let fetcher = ArtifactFetcher::new(service);

        let report = fetcher.fetch_report("https://x/report").await.unwrap();
        assert_eq!(report["Width"], "10");
        assert_eq!(report["Depth"], "2.5");
    }
}
