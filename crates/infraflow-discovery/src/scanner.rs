//! Concurrent scan over the configured resource types

use crate::error::{DiscoveryError, Result};
use crate::lister::{DiscoveredResource, LiveResourceLister};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A resource type whose listing failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    /// `None` when the all-types listing failed
    pub resource_type: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub resources: Vec<DiscoveredResource>,
    pub failures: Vec<ScanFailure>,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Types whose listing failed; resources of these types may be missing
    /// from `resources` without having been deleted.
    pub fn failed_types(&self) -> Vec<Option<&str>> {
        self.failures
            .iter()
            .map(|f| f.resource_type.as_deref())
            .collect()
    }
}

pub struct Scanner {
    lister: Arc<dyn LiveResourceLister>,
    resource_types: Vec<String>,
}

impl Scanner {
    pub fn new(lister: Arc<dyn LiveResourceLister>) -> Self {
        Self {
            lister,
            resource_types: Vec::new(),
        }
    }

    /// Restrict the scan to these types; empty means one all-types listing
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// List every configured type concurrently. A failing type is recorded
    /// in the outcome and the rest of the scan proceeds.
    #[tracing::instrument(skip_all, fields(lister = self.lister.name()))]
    pub async fn scan(&self, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let types: Vec<Option<&str>> = if self.resource_types.is_empty() {
            vec![None]
        } else {
            self.resource_types.iter().map(|t| Some(t.as_str())).collect()
        };

        let listings = join_all(types.iter().map(|&t| async move {
            (t, self.lister.list(t).await)
        }));

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            results = listings => results,
        };

        let mut outcome = ScanOutcome::default();
        let mut seen = HashSet::new();
        for (resource_type, result) in results {
            match result {
                Ok(resources) => {
                    for resource in resources {
                        if seen.insert(resource.id.clone()) {
                            outcome.resources.push(resource);
                        } else {
                            warn!(resource_id = %resource.id, "Resource listed twice, keeping first");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        resource_type = resource_type.unwrap_or("*"),
                        error = %e,
                        "Live resource listing failed"
                    );
                    outcome.failures.push(ScanFailure {
                        resource_type: resource_type.map(String::from),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            discovered = outcome.resources.len(),
            failures = outcome.failures.len(),
            "Scan completed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lister::StaticLister;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FlakyLister;

    #[async_trait]
    impl LiveResourceLister for FlakyLister {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn list(&self, resource_type: Option<&str>) -> Result<Vec<DiscoveredResource>> {
            match resource_type {
                Some("vpc") => Ok(vec![DiscoveredResource::new("vpc-1", "vpc")]),
                _ => Err(DiscoveryError::lister("flaky", "throttled")),
            }
        }
    }

    struct SlowLister;

    #[async_trait]
    impl LiveResourceLister for SlowLister {
        fn name(&self) -> &str {
            "slow"
        }

        async fn list(&self, _resource_type: Option<&str>) -> Result<Vec<DiscoveredResource>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failures_are_recorded_not_fatal() {
        let scanner = Scanner::new(Arc::new(FlakyLister)).with_resource_types(["vpc", "subnet"]);
        let outcome = scanner.scan(&CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.resources.len(), 1);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.failed_types(), vec![Some("subnet")]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_collapsed() {
        let lister = StaticLister::new(vec![
            DiscoveredResource::new("vpc-1", "vpc"),
            DiscoveredResource::new("vpc-1", "vpc").with_name("dup"),
        ]);
        let outcome = Scanner::new(Arc::new(lister))
            .scan(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.resources.len(), 1);
        assert_eq!(outcome.resources[0].name, "");
    }

    #[tokio::test]
    async fn test_cancellation_abandons_scan() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Scanner::new(Arc::new(SlowLister)).scan(&cancel).await;
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    }
}
