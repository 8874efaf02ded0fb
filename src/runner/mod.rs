//! Orchestration loop
//!
//! One long-lived consumer task drives discovery, instance readiness and
//! dispatch. External events (the periodic timer, the upload-completed hook)
//! only ever nudge a [`Notify`]; because a single task consumes it, two
//! passes can never overlap no matter how often or how concurrently
//! [`RunnerHandle::check`] is called. A pending nudge during a pass collapses
//! into one extra pass, which simply observes "no task" and goes idle.

pub mod dispatch;

pub use dispatch::{Dispatch, JobDispatcher};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::compute::InstanceManager;
use crate::error::Result;
use crate::tasks::TaskDiscovery;

/// Non-blocking trigger for the orchestration loop. Cheap to clone; safe to
/// call from any number of places.
#[derive(Clone)]
pub struct RunnerHandle {
    trigger: Arc<Notify>,
}

impl RunnerHandle {
    pub fn check(&self) {
        self.trigger.notify_one();
    }
}

/// Drives discovery -> instance readiness -> dispatch until no work remains.
pub struct TaskRunner {
    discovery: TaskDiscovery,
    manager: InstanceManager,
    dispatcher: Arc<dyn Dispatch>,
    retry_delay: Duration,
}

impl TaskRunner {
    pub fn new(
        discovery: TaskDiscovery,
        manager: InstanceManager,
        dispatcher: Arc<dyn Dispatch>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            discovery,
            manager,
            dispatcher,
            retry_delay,
        }
    }

    /// Start the consumer task and return the trigger handle.
    pub fn spawn(self) -> RunnerHandle {
        let trigger = Arc::new(Notify::new());
        let handle = RunnerHandle {
            trigger: Arc::clone(&trigger),
        };

        tokio::spawn(async move {
            loop {
                trigger.notified().await;
                self.run_passes().await;
            }
        });

        handle
    }

    /// Run passes until the bucket has no unfinished pages. Failures never
    /// escape: the pass sleeps the fixed delay and re-evaluates, so a broken
    /// task is retried on the next pass rather than crashing the daemon.
    async fn run_passes(&self) {
        loop {
            match self.discovery.has_unfinished_work().await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("No task, loop going idle");
                    return;
                }
                Err(e) => {
                    tracing::error!("Task discovery failed: {}", e);
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                }
            }

            if let Err(e) = self.run_one().await {
                tracing::error!(
                    "Task failed, retrying in {}s: {}",
                    self.retry_delay.as_secs(),
                    e
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }

    async fn run_one(&self) -> Result<()> {
        tracing::info!("Has task, waiting for worker instance");
        let address = self.manager.wait_until_ready().await?;
        tracing::info!("Worker instance ready at {}", address);

        // The bucket may have changed while we waited.
        let Some(task) = self.discovery.next_task().await? else {
            return Ok(());
        };
        self.dispatcher.dispatch(&task, &address).await?;
        tracing::info!("Single task done");
        Ok(())
    }
}
