use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::store::{self, CredentialStore, LinkStatus};
use crate::subscription::{self, JobReport, Orchestrator, SubscriptionJob};

/// Errors from scheduling or awaiting tenant runs.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Linked credentials could not be loaded.
    #[error("Failed to load linked credentials: {0}")]
    Store(#[from] store::Error),
    /// A tenant's job failed.
    #[error(transparent)]
    Run(#[from] subscription::Error),
    /// A tenant's task panicked or was cancelled.
    #[error("Subscription task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Launches one independent subscription run per linked tenant.
///
/// The scheduler never retries. A failed tenant is picked up again on the next call to
/// [`Scheduler::schedule_all`].
pub struct Scheduler {
    store: Arc<dyn CredentialStore>,
    orchestrator: Arc<Orchestrator>,
    topics: BTreeSet<String>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("orchestrator", &self.orchestrator)
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

/// A tenant run started by [`Scheduler::schedule_all`].
#[derive(Debug)]
pub struct ScheduledRun {
    /// Organization ID.
    pub tenant_id: String,
    handle: JoinHandle<Result<JobReport, subscription::Error>>,
}

/// Handles to the runs of one scheduling pass.
#[derive(Debug, Default)]
pub struct ScheduledRuns {
    runs: Vec<ScheduledRun>,
}

impl ScheduledRuns {
    /// Number of tenants scheduled.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no tenant was scheduled.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Tenants scheduled, in scheduling order.
    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.runs.iter().map(|run| run.tenant_id.as_str())
    }

    /// Waits for every run and returns each tenant's result.
    pub async fn join(self) -> Vec<(String, Result<JobReport, Error>)> {
        let mut results = Vec::with_capacity(self.runs.len());
        for run in self.runs {
            let result = match run.handle.await {
                Ok(result) => result.map_err(Error::from),
                Err(e) => Err(Error::from(e)),
            };
            results.push((run.tenant_id, result));
        }
        results
    }
}

impl Scheduler {
    /// Creates a scheduler subscribing every linked tenant to `topics`.
    pub fn new<I, T>(
        store: Arc<dyn CredentialStore>,
        orchestrator: Arc<Orchestrator>,
        topics: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            store,
            orchestrator,
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    /// Starts a subscription run for every linked tenant and returns without waiting for them.
    ///
    /// Each run is its own task: one tenant's failure or slowness does not touch the others.
    /// `shutdown` is shared by every run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if linked credentials cannot be loaded; nothing is started.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn schedule_all(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ScheduledRuns, Error> {
        let credentials = self.store.find_by_status(LinkStatus::Linked).await?;
        info!(
            tenants = credentials.len(),
            topics = self.topics.len(),
            "scheduling subscription runs"
        );

        let runs = credentials
            .into_iter()
            .map(|credential| {
                let tenant_id = credential.tenant_id.clone();
                let job = SubscriptionJob::new(credential, self.topics.iter().cloned());
                let orchestrator = self.orchestrator.clone();
                let shutdown = shutdown.clone();
                let handle = tokio::spawn(async move {
                    let tenant_id = job.tenant_id.clone();
                    let result = orchestrator.run(job, shutdown).await;
                    match &result {
                        Ok(report) => {
                            info!(tenant_id = %tenant_id, %report, "subscription run finished")
                        }
                        Err(e) => {
                            error!(tenant_id = %tenant_id, error = %e, "subscription run failed")
                        }
                    }
                    result
                });
                ScheduledRun { tenant_id, handle }
            })
            .collect();

        Ok(ScheduledRuns { runs })
    }
}
