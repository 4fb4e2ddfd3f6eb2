//! Ordered failover across decision backends.

use crate::backend::{build_backend, BackendSettings, DecisionBackend, DecisionRequest};
use crate::{Result, RouterError};
use async_trait::async_trait;
use deskpilot_core::{CoreConfig, Decision, DecisionRouter, HistoryEntry, ScreenContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff before retry `attempt` (0-based): 1s, 2s, 4s, ... capped at `max`.
pub fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(max)
}

/// Tries each backend in order, each up to `max_attempts` times.
pub struct FailoverRouter {
    backends: Vec<Arc<dyn DecisionBackend>>,
    max_attempts: u32,
    max_backoff: Duration,
}

impl FailoverRouter {
    pub fn new(
        backends: Vec<Arc<dyn DecisionBackend>>,
        max_attempts: u32,
        max_backoff: Duration,
    ) -> Self {
        Self {
            backends,
            max_attempts: max_attempts.max(1),
            max_backoff,
        }
    }

    /// Build every configured backend. Backends that fail to build are
    /// skipped with a warning; having none left is an error.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let settings = BackendSettings {
            projection: config.projection.clone(),
            capture: config.capture.clone(),
            history_window: config.router.history_window,
        };

        let mut backends = Vec::new();
        for backend in &config.router.backends {
            match build_backend(backend, settings.clone()) {
                Ok(built) => {
                    info!("Decision backend ready: {}", built.name());
                    backends.push(built);
                }
                Err(e) => warn!("Skipping {:?} backend {}: {}", backend.kind, backend.model, e),
            }
        }

        if backends.is_empty() {
            return Err(RouterError::ConfigError(
                "no usable decision backend configured".into(),
            ));
        }

        Ok(Self::new(
            backends,
            config.router.max_attempts,
            Duration::from_secs(config.router.max_backoff_secs),
        ))
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

/// Errors no retry can fix.
fn is_permanent(err: &RouterError) -> bool {
    matches!(
        err,
        RouterError::ConfigError(_) | RouterError::EncodingError(_)
    )
}

#[async_trait]
impl DecisionRouter for FailoverRouter {
    async fn predict(
        &self,
        instruction: &str,
        context: &ScreenContext,
        history: &[HistoryEntry],
        step: u32,
    ) -> Decision {
        let request = DecisionRequest {
            instruction,
            context,
            history,
            step,
        };
        let mut last_error = String::from("no backend configured");

        for backend in &self.backends {
            for attempt in 0..self.max_attempts {
                match backend.decide(&request).await {
                    Ok(decision) => return decision,
                    Err(e) => {
                        warn!(
                            "{} attempt {}/{} failed: {}",
                            backend.name(),
                            attempt + 1,
                            self.max_attempts,
                            e
                        );
                        let permanent = is_permanent(&e);
                        last_error = e.to_string();
                        if permanent {
                            break;
                        }
                        if attempt + 1 < self.max_attempts {
                            tokio::time::sleep(backoff_delay(attempt, self.max_backoff)).await;
                        }
                    }
                }
            }
        }

        error!("All decision backends exhausted: {}", last_error);
        Decision::fail(format!("All backends failed: {}", last_error))
    }

    async fn reset(&self) {
        for backend in &self.backends {
            backend.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::context;
    use deskpilot_core::AgentAction;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakeBackend {
        name: String,
        replies: Mutex<VecDeque<Result<Decision>>>,
        calls: AtomicU32,
        resets: AtomicU32,
    }

    impl FakeBackend {
        fn new(name: &str, replies: Vec<Result<Decision>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                resets: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DecisionBackend for FakeBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn decide(&self, _request: &DecisionRequest<'_>) -> Result<Decision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RouterError::InvalidResponse("empty".into())))
        }

        async fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dyn_backend(backend: &Arc<FakeBackend>) -> Arc<dyn DecisionBackend> {
        backend.clone()
    }

    fn unavailable() -> Result<Decision> {
        Err(RouterError::ApiError {
            status: 503,
            message: "unavailable".into(),
        })
    }

    #[test]
    fn test_backoff_delay() {
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(0, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(3, max), Duration::from_secs(8));
        assert_eq!(backoff_delay(5, max), Duration::from_secs(30));
        assert_eq!(backoff_delay(200, max), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let backend = FakeBackend::new(
            "primary",
            vec![unavailable(), unavailable(), Ok(Decision::new(AgentAction::Done))],
        );
        let router = FailoverRouter::new(vec![dyn_backend(&backend)], 5, Duration::from_secs(30));

        let start = tokio::time::Instant::now();
        let decision = router.predict("task", &context(), &[], 1).await;

        assert_eq!(decision.action, AgentAction::Done);
        assert_eq!(backend.calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_over_to_next_backend() {
        let primary = FakeBackend::new("primary", vec![]);
        let secondary = FakeBackend::new("secondary", vec![Ok(Decision::new(AgentAction::Wait))]);
        let router = FailoverRouter::new(
            vec![dyn_backend(&primary), dyn_backend(&secondary)],
            2,
            Duration::from_secs(30),
        );

        let decision = router.predict("task", &context(), &[], 1).await;

        assert_eq!(decision.action, AgentAction::Wait);
        assert_eq!(primary.calls(), 2);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_yields_fail_decision() {
        let backend = FakeBackend::new("primary", vec![unavailable(), unavailable()]);
        let router = FailoverRouter::new(vec![dyn_backend(&backend)], 2, Duration::from_secs(30));

        let decision = router.predict("task", &context(), &[], 1).await;

        assert_eq!(decision.action, AgentAction::Fail);
        let raw = decision.raw_response.unwrap();
        assert!(raw.contains("All backends failed"), "{}", raw);
        assert!(raw.contains("503"), "{}", raw);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_skips_retries() {
        let primary = FakeBackend::new(
            "primary",
            vec![Err(RouterError::ConfigError("bad screen".into()))],
        );
        let secondary = FakeBackend::new("secondary", vec![Ok(Decision::new(AgentAction::Done))]);
        let router = FailoverRouter::new(
            vec![dyn_backend(&primary), dyn_backend(&secondary)],
            5,
            Duration::from_secs(30),
        );

        let decision = router.predict("task", &context(), &[], 1).await;

        assert_eq!(decision.action, AgentAction::Done);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_reset_reaches_every_backend() {
        let a = FakeBackend::new("a", vec![]);
        let b = FakeBackend::new("b", vec![]);
        let router = FailoverRouter::new(vec![dyn_backend(&a), dyn_backend(&b)], 1, Duration::from_secs(1));

        router.reset().await;

        assert_eq!(a.resets.load(Ordering::SeqCst), 1);
        assert_eq!(b.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_config_requires_a_backend() {
        let mut config = CoreConfig::default();
        config.router.backends.clear();
        assert!(matches!(
            FailoverRouter::from_config(&config),
            Err(RouterError::ConfigError(_))
        ));
    }
}
