use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use catalog_core::{CatalogError, InvalidationConfig, PageInvalidator, Result};

use crate::paths::{AffectedPages, CategoryTable};

#[derive(Serialize)]
struct RevalidateRequest {
    paths: String,
}

/// Posts comma-joined page paths to the site's revalidation endpoint.
pub struct HttpPageInvalidator {
    client: Client,
    endpoint: String,
    secret: SecretString,
    timeout: Duration,
}

impl HttpPageInvalidator {
    pub fn new(endpoint: impl Into<String>, secret: SecretString, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            secret,
            timeout,
        }
    }

    /// `None` when invalidation is disabled.
    pub fn from_settings(config: &InvalidationConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            CatalogError::Config("invalidation.endpoint is required when enabled".to_string())
        })?;
        let secret = config.secret.clone().ok_or_else(|| {
            CatalogError::Config("invalidation.secret is required when enabled".to_string())
        })?;
        Ok(Some(Self::new(endpoint, secret, config.timeout())))
    }
}

#[async_trait]
impl PageInvalidator for HttpPageInvalidator {
    async fn invalidate(&self, paths: &[String]) -> Result<()> {
        let request = RevalidateRequest {
            paths: paths.join(","),
        };
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(self.endpoint.as_str())
                .bearer_auth(self.secret.expose_secret())
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| CatalogError::Notification("invalidation request timed out".to_string()))?
        .map_err(|e| CatalogError::Notification(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CatalogError::Notification(format!(
                "invalidation endpoint returned HTTP {}",
                status
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// Nothing to send, or no endpoint configured.
    Skipped,
    Delivered { attempts: usize },
    Failed { attempts: usize, last_error: String },
}

impl NotificationOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, NotificationOutcome::Delivered { .. })
    }
}

/// Requests static-page invalidation after a commit. Failures are reported as
/// an outcome and logged, never returned as errors.
pub struct InvalidationNotifier {
    invalidator: Option<Arc<dyn PageInvalidator>>,
    categories: CategoryTable,
    max_attempts: usize,
}

impl InvalidationNotifier {
    pub fn new(
        invalidator: Arc<dyn PageInvalidator>,
        categories: CategoryTable,
        max_attempts: usize,
    ) -> Self {
        Self {
            invalidator: Some(invalidator),
            categories,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn disabled(categories: CategoryTable) -> Self {
        Self {
            invalidator: None,
            categories,
            max_attempts: 1,
        }
    }

    pub fn from_settings(config: &InvalidationConfig) -> Result<Self> {
        let categories = CategoryTable::from_settings(config);
        Ok(match HttpPageInvalidator::from_settings(config)? {
            Some(http) => Self::new(Arc::new(http), categories, config.max_attempts),
            None => Self::disabled(categories),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.invalidator.is_some()
    }

    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    pub fn paths_for(&self, pages: &AffectedPages) -> Vec<String> {
        pages.page_paths(&self.categories)
    }

    /// Attempts delivery up to `max_attempts` times, retrying immediately.
    pub async fn notify(&self, paths: &[String]) -> NotificationOutcome {
        let Some(invalidator) = &self.invalidator else {
            debug!("Invalidation disabled, skipping {} paths", paths.len());
            return NotificationOutcome::Skipped;
        };
        if paths.is_empty() {
            return NotificationOutcome::Skipped;
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match invalidator.invalidate(paths).await {
                Ok(()) => {
                    info!(
                        "Invalidated {} pages (attempt {}/{})",
                        paths.len(),
                        attempt,
                        self.max_attempts
                    );
                    return NotificationOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        warn!(
                            "Page invalidation failed (attempt {}/{}), retrying: {}",
                            attempt, self.max_attempts, last_error
                        );
                    }
                }
            }
        }

        warn!(
            paths = %paths.join(","),
            "Page invalidation gave up after {} attempts, data is committed but pages may be stale: {}",
            self.max_attempts,
            last_error
        );
        NotificationOutcome::Failed {
            attempts: self.max_attempts,
            last_error,
        }
    }

    /// Run [`InvalidationNotifier::notify`] on the runtime without blocking
    /// the caller.
    pub fn spawn(self: &Arc<Self>, paths: Vec<String>) -> JoinHandle<NotificationOutcome> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.notify(&paths).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyInvalidator {
        failures: usize,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FlakyInvalidator {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PageInvalidator for FlakyInvalidator {
        async fn invalidate(&self, paths: &[String]) -> Result<()> {
            let mut calls = self.calls.lock();
            calls.push(paths.to_vec());
            if calls.len() <= self.failures {
                Err(CatalogError::Notification("HTTP 503".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn paths() -> Vec<String> {
        vec!["/games/g".to_string(), "/games".to_string()]
    }

    #[tokio::test]
    async fn retries_until_delivered() {
        let invalidator = FlakyInvalidator::new(2);
        let notifier = InvalidationNotifier::new(invalidator.clone(), CategoryTable::default(), 3);

        let outcome = notifier.notify(&paths()).await;
        assert_eq!(outcome, NotificationOutcome::Delivered { attempts: 3 });
        assert_eq!(invalidator.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let invalidator = FlakyInvalidator::new(10);
        let notifier = Arc::new(InvalidationNotifier::new(
            invalidator.clone(),
            CategoryTable::default(),
            3,
        ));

        let outcome = notifier.spawn(paths()).await.unwrap();
        assert!(matches!(
            outcome,
            NotificationOutcome::Failed { attempts: 3, ref last_error } if last_error.contains("503")
        ));
        assert_eq!(invalidator.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn disabled_notifier_skips() {
        let notifier = InvalidationNotifier::disabled(CategoryTable::default());
        assert_eq!(notifier.notify(&paths()).await, NotificationOutcome::Skipped);
    }

    #[test]
    fn enabled_without_endpoint_is_a_config_error() {
        let config = InvalidationConfig {
            enabled: true,
            ..InvalidationConfig::default()
        };
        assert!(matches!(
            InvalidationNotifier::from_settings(&config),
            Err(CatalogError::Config(_))
        ));
    }
}
