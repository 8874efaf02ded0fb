//! Instance lifecycle management
//!
//! Owns the single ephemeral instance record and its idle timer. No other
//! component mutates instance status; the orchestrator only ever calls
//! [`InstanceManager::wait_until_ready`]. Callers are serialized on the state
//! lock, so at most one provisioning attempt can be in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::ComputeConfig;
use crate::error::ComputeError;

use super::provider::{ComputeProvider, InstanceHandle};

/// Lifecycle state of the ephemeral instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    NotExist,
    Starting,
    Ready,
    Failed,
}

struct State {
    status: InstanceStatus,
    handle: Option<InstanceHandle>,
    /// Bumped on every idle-timer reset; a pending watchdog only fires if
    /// its generation is still current.
    idle_generation: u64,
}

struct Inner {
    provider: Arc<dyn ComputeProvider>,
    state: Mutex<State>,
    poll_interval: Duration,
    ready_timeout: Duration,
    idle_timeout: Duration,
}

/// Creates, health-checks and destroys the single ephemeral GPU instance.
#[derive(Clone)]
pub struct InstanceManager {
    inner: Arc<Inner>,
}

impl InstanceManager {
    pub fn new(provider: Arc<dyn ComputeProvider>, config: &ComputeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                state: Mutex::new(State {
                    status: InstanceStatus::NotExist,
                    handle: None,
                    idle_generation: 0,
                }),
                poll_interval: config.poll_interval(),
                ready_timeout: config.ready_timeout(),
                idle_timeout: config.idle_timeout(),
            }),
        }
    }

    pub async fn status(&self) -> InstanceStatus {
        self.inner.state.lock().await.status
    }

    /// Block until an instance is reachable, provisioning one if needed.
    ///
    /// Returns the instance address. On provisioning error or readiness
    /// timeout the manager moves to `Failed` and the error propagates; the
    /// next call resets `Failed` to `NotExist` and re-attempts, so one bad
    /// pass does not wedge the loop permanently.
    pub async fn wait_until_ready(&self) -> Result<String, ComputeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if state.status == InstanceStatus::Failed {
            tracing::info!("Instance manager recovering from failed state");
            // A readiness timeout leaves the half-started instance behind;
            // destroy it before provisioning a replacement.
            if let Some(handle) = state.handle.take() {
                if let Err(e) = inner.provider.delete_instance(&handle.id).await {
                    tracing::error!("Failed to delete stale instance {}: {}", handle.id, e);
                }
            }
            state.status = InstanceStatus::NotExist;
        }

        if state.status == InstanceStatus::Ready {
            let handle = state.handle.clone().ok_or_else(|| {
                ComputeError::ApiError("ready state without instance record".to_string())
            })?;
            if inner.provider.probe_ready(&handle).await {
                self.reset_idle_timer(&mut state);
                return Ok(handle.address);
            }
            // The worker tears its own host down after a batch; a Ready
            // record that stops probing is gone, not failed.
            tracing::info!(
                "Instance {} no longer reachable, dropping record",
                handle.id
            );
            let _ = inner.provider.delete_instance(&handle.id).await;
            state.status = InstanceStatus::NotExist;
            state.handle = None;
        }

        if state.status == InstanceStatus::NotExist {
            state.status = InstanceStatus::Starting;
            match inner.provider.create_instance().await {
                Ok(handle) => {
                    tracing::info!("Instance {} starting", handle.id);
                    state.handle = Some(handle);
                }
                Err(e) => {
                    tracing::error!("Instance provisioning failed: {}", e);
                    state.status = InstanceStatus::Failed;
                    state.handle = None;
                    return Err(e);
                }
            }
        }

        // Starting: poll the health endpoint until ready or the bound lapses.
        let deadline = Instant::now() + inner.ready_timeout;
        loop {
            let handle = state.handle.clone().ok_or_else(|| {
                ComputeError::ApiError("starting state without instance record".to_string())
            })?;

            let handle = if handle.has_address() {
                handle
            } else {
                // Address may lag creation; pick it up from the provider.
                match inner.provider.describe_instance(&handle.id).await {
                    Ok(updated) if updated.has_address() => {
                        state.handle = Some(updated.clone());
                        updated
                    }
                    Ok(_) | Err(_) => handle,
                }
            };

            if handle.has_address() && inner.provider.probe_ready(&handle).await {
                tracing::info!("Instance {} ready at {}", handle.id, handle.address);
                state.status = InstanceStatus::Ready;
                self.reset_idle_timer(&mut state);
                return Ok(handle.address);
            }

            if Instant::now() >= deadline {
                tracing::error!(
                    "Instance {} not ready after {}s, giving up",
                    handle.id,
                    inner.ready_timeout.as_secs()
                );
                state.status = InstanceStatus::Failed;
                return Err(ComputeError::ReadinessTimeout(
                    inner.ready_timeout.as_secs(),
                ));
            }

            tokio::time::sleep(inner.poll_interval).await;
        }
    }

    /// Re-arm the idle countdown. A burst of work keeps extending the same
    /// instance's life instead of churning create/destroy cycles.
    fn reset_idle_timer(&self, state: &mut State) {
        state.idle_generation += 1;
        let generation = state.idle_generation;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(inner.idle_timeout).await;
            let mut state = inner.state.lock().await;
            if state.idle_generation != generation || state.status != InstanceStatus::Ready {
                return;
            }
            if let Some(handle) = state.handle.take() {
                tracing::info!("Idle timeout elapsed, deleting instance {}", handle.id);
                if let Err(e) = inner.provider.delete_instance(&handle.id).await {
                    tracing::error!("Failed to delete idle instance {}: {}", handle.id, e);
                }
            }
            state.status = InstanceStatus::NotExist;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    struct MockProvider {
        created: AtomicUsize,
        deleted: AtomicUsize,
        healthy: AtomicBool,
        fail_create: AtomicBool,
    }

    impl MockProvider {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                created: AtomicUsize::new(0),
                deleted: AtomicUsize::new(0),
                healthy: AtomicBool::new(healthy),
                fail_create: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ComputeProvider for MockProvider {
        async fn create_instance(&self) -> Result<InstanceHandle, ComputeError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ComputeError::ProvisioningFailed("quota exceeded".into()));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(InstanceHandle {
                id: format!("i-{}", n),
                address: "203.0.113.9".to_string(),
            })
        }

        async fn describe_instance(&self, id: &str) -> Result<InstanceHandle, ComputeError> {
            Ok(InstanceHandle {
                id: id.to_string(),
                address: "203.0.113.9".to_string(),
            })
        }

        async fn delete_instance(&self, _id: &str) -> Result<(), ComputeError> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn probe_ready(&self, _handle: &InstanceHandle) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn test_config() -> ComputeConfig {
        ComputeConfig {
            poll_interval_secs: 20,
            ready_timeout_secs: 20 * 60,
            idle_timeout_secs: 30 * 60,
            ..crate::config::Config::default().compute
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_the_instance_within_the_idle_window() {
        let provider = MockProvider::new(true);
        let manager = InstanceManager::new(provider.clone(), &test_config());

        let first = manager.wait_until_ready().await.unwrap();
        let second = manager.wait_until_ready().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status().await, InstanceStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_tears_down_and_next_call_reprovisions() {
        let provider = MockProvider::new(true);
        let manager = InstanceManager::new(provider.clone(), &test_config());

        manager.wait_until_ready().await.unwrap();

        // Let the idle watchdog fire.
        tokio::time::sleep(Duration::from_secs(30 * 60 + 1)).await;
        assert_eq!(manager.status().await, InstanceStatus::NotExist);
        assert_eq!(provider.deleted.load(Ordering::SeqCst), 1);

        manager.wait_until_ready().await.unwrap();
        assert_eq!(provider.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn each_ready_call_rearms_the_idle_timer() {
        let provider = MockProvider::new(true);
        let manager = InstanceManager::new(provider.clone(), &test_config());

        manager.wait_until_ready().await.unwrap();
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        manager.wait_until_ready().await.unwrap();
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;

        // 40 minutes since provisioning, but only 20 since the last use.
        assert_eq!(manager.status().await, InstanceStatus::Ready);
        assert_eq!(provider.deleted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provisioning_failure_is_terminal_until_the_next_call() {
        let provider = MockProvider::new(true);
        provider.fail_create.store(true, Ordering::SeqCst);
        let manager = InstanceManager::new(provider.clone(), &test_config());

        let err = manager.wait_until_ready().await.unwrap_err();
        assert!(matches!(err, ComputeError::ProvisioningFailed(_)));
        assert_eq!(manager.status().await, InstanceStatus::Failed);

        // Next pass recovers and provisions fresh.
        provider.fail_create.store(false, Ordering::SeqCst);
        manager.wait_until_ready().await.unwrap();
        assert_eq!(manager.status().await, InstanceStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_marks_failed() {
        let provider = MockProvider::new(false);
        let manager = InstanceManager::new(provider.clone(), &test_config());

        let err = manager.wait_until_ready().await.unwrap_err();
        assert!(matches!(err, ComputeError::ReadinessTimeout(_)));
        assert_eq!(manager.status().await, InstanceStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_after_readiness_timeout_destroys_the_stale_instance() {
        let provider = MockProvider::new(false);
        let manager = InstanceManager::new(provider.clone(), &test_config());

        let err = manager.wait_until_ready().await.unwrap_err();
        assert!(matches!(err, ComputeError::ReadinessTimeout(_)));
        assert_eq!(provider.created.load(Ordering::SeqCst), 1);

        // The next pass must tear down the half-started instance instead of
        // leaving it running alongside its replacement.
        provider.healthy.store(true, Ordering::SeqCst);
        manager.wait_until_ready().await.unwrap();
        assert_eq!(provider.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(provider.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn self_terminated_instance_is_replaced() {
        let provider = MockProvider::new(true);
        let manager = InstanceManager::new(provider.clone(), &test_config());

        manager.wait_until_ready().await.unwrap();

        // Worker killed its own host; the record is stale.
        provider.healthy.store(false, Ordering::SeqCst);
        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.wait_until_ready().await }
        });
        tokio::time::sleep(Duration::from_secs(60)).await;
        provider.healthy.store(true, Ordering::SeqCst);

        pending.await.unwrap().unwrap();
        assert_eq!(provider.created.load(Ordering::SeqCst), 2);
    }
}
