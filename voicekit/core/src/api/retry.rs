//! Token Invalidation Retry
//!
//! Every backend call goes through [`TokenRetry::run`]. When the call fails
//! because the access token is missing or rejected, the host is asked to
//! re-authenticate; on success the call is replayed exactly once and its
//! result is returned as is, even if it fails again.

use std::future::Future;
use std::sync::Arc;

use super::error::ApiError;
use super::traits::{NoRefresh, TokenRefresher};

/// One-shot re-authentication wrapper
#[derive(Clone)]
pub struct TokenRetry {
    refresher: Arc<dyn TokenRefresher>,
}

impl std::fmt::Debug for TokenRetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRetry").finish_non_exhaustive()
    }
}

impl TokenRetry {
    /// Retry through `refresher`
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { refresher }
    }

    /// Never retry; token errors surface immediately
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoRefresh))
    }

    /// Run `op`, replaying it once after a successful token refresh
    ///
    /// `label` names the operation in logs.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt, or the original token error
    /// when the refresh failed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match op().await {
            Err(err) if err.is_token_error() => {
                tracing::info!(operation = label, error = %err, "Token rejected, asking host to refresh");
                if self.refresher.refresh_token().await {
                    tracing::debug!(operation = label, "Token refreshed, replaying request once");
                    op().await
                } else {
                    tracing::warn!(operation = label, "Token refresh failed");
                    Err(err)
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    struct CountingRefresher {
        succeed: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh_token(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }
    }

    fn refresher(succeed: bool) -> Arc<CountingRefresher> {
        Arc::new(CountingRefresher {
            succeed,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_replays_once_after_refresh() {
        let refresher = refresher(true);
        let retry = TokenRetry::new(refresher.clone());
        let attempts = AtomicUsize::new(0);

        let result = retry
            .run("test", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::InvalidToken)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_token_failure_is_not_retried() {
        let refresher = refresher(true);
        let retry = TokenRetry::new(refresher.clone());
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = retry
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::InvalidToken)
            })
            .await;

        assert_eq!(result, Err(ApiError::InvalidToken));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_original_error() {
        let refresher = refresher(false);
        let retry = TokenRetry::new(refresher.clone());
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = retry
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::MissingToken)
            })
            .await;

        assert_eq!(result, Err(ApiError::MissingToken));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let refresher = refresher(true);
        let retry = TokenRetry::new(refresher.clone());

        let result: Result<(), _> = retry
            .run("test", || async { Err(ApiError::NotFound) })
            .await;

        assert_eq!(result, Err(ApiError::NotFound));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }
}
