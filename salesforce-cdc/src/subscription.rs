use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::client::{self, CredentialProvider};
use crate::config::Config;
use crate::pubsub::{
    self, Auth, Connector, EventBus, EventSink, Replay, ReplayCursor, SchemaCache, Session,
    SessionConfig, SessionError, SessionSummary,
};
use crate::store::{self, Credential, CredentialStore};

/// Errors that abort a whole subscription job.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The refresh token was not accepted. The tenant likely needs to be relinked.
    #[error("Credential refresh failed for tenant {tenant_id}: {source}")]
    CredentialRefreshFailed {
        /// Tenant whose credential was refreshed.
        tenant_id: String,
        #[source]
        source: client::Error,
    },
    /// The refreshed credential could not be stored.
    #[error("Failed to persist refreshed credential for tenant {tenant_id}: {source}")]
    CredentialPersistFailed {
        /// Tenant whose credential was refreshed.
        tenant_id: String,
        #[source]
        source: store::Error,
    },
    /// No event bus handle could be built for the tenant.
    #[error("Failed to connect to Pub/Sub for tenant {tenant_id}: {source}")]
    Connect {
        /// Tenant being connected.
        tenant_id: String,
        #[source]
        source: pubsub::Error,
    },
    /// At least one topic failed and the orchestrator is configured to report it.
    #[error("Subscription job failed: {0}")]
    TopicsFailed(JobReport),
}

/// One tenant's subscription work for a scheduling pass.
#[derive(Debug, Clone)]
pub struct SubscriptionJob {
    /// Organization ID.
    pub tenant_id: String,
    /// Credential as loaded from the store.
    pub credential: Credential,
    /// Topics to subscribe to.
    pub topics: BTreeSet<String>,
    /// Stored cursors to resume from, by topic.
    pub cursors: HashMap<String, ReplayCursor>,
}

impl SubscriptionJob {
    /// Creates a job for the credential's tenant.
    pub fn new<I, T>(credential: Credential, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            tenant_id: credential.tenant_id.clone(),
            credential,
            topics: topics.into_iter().map(Into::into).collect(),
            cursors: HashMap::new(),
        }
    }

    /// Resumes `topic` after `cursor` instead of the configured start.
    pub fn with_cursor(mut self, topic: impl Into<String>, cursor: ReplayCursor) -> Self {
        self.cursors.insert(topic.into(), cursor);
        self
    }
}

/// How one topic of a job ended.
#[derive(Debug)]
pub enum TopicOutcome {
    /// The session closed cleanly.
    Completed(SessionSummary),
    /// The topic was missing or not subscribable; no session ran.
    Skipped(pubsub::Error),
    /// The session ended with an error.
    Failed(SessionError),
    /// The topic task panicked or was cancelled.
    Aborted(String),
}

/// Outcome of one topic.
#[derive(Debug)]
pub struct TopicReport {
    /// Topic name.
    pub topic: String,
    /// How it ended.
    pub outcome: TopicOutcome,
}

/// Per-topic outcomes of a job, ordered by topic.
#[derive(Debug)]
pub struct JobReport {
    /// Organization ID.
    pub tenant_id: String,
    /// One entry per topic of the job.
    pub topics: Vec<TopicReport>,
}

impl JobReport {
    /// Topics whose session closed cleanly.
    pub fn succeeded(&self) -> impl Iterator<Item = &TopicReport> {
        self.topics
            .iter()
            .filter(|report| matches!(report.outcome, TopicOutcome::Completed(_)))
    }

    /// Topics whose session failed or whose task aborted.
    pub fn failed(&self) -> impl Iterator<Item = &TopicReport> {
        self.topics.iter().filter(|report| {
            matches!(
                report.outcome,
                TopicOutcome::Failed(_) | TopicOutcome::Aborted(_)
            )
        })
    }

    /// Topics that were skipped.
    pub fn skipped(&self) -> impl Iterator<Item = &TopicReport> {
        self.topics
            .iter()
            .filter(|report| matches!(report.outcome, TopicOutcome::Skipped(_)))
    }

    /// Returns the report for `topic`.
    pub fn topic(&self, topic: &str) -> Option<&TopicReport> {
        self.topics.iter().find(|report| report.topic == topic)
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<&str> = self.failed().map(|report| report.topic.as_str()).collect();
        write!(
            f,
            "tenant {}: {} of {} topics failed",
            self.tenant_id,
            failed.len(),
            self.topics.len()
        )?;
        if !failed.is_empty() {
            write!(f, " ({})", failed.join(", "))?;
        }
        Ok(())
    }
}

/// Runs subscription jobs: refreshes the tenant's credential, then fans out one
/// [`Session`] per topic and collects their outcomes.
///
/// All runs share one [`SchemaCache`].
pub struct Orchestrator {
    provider: Arc<dyn CredentialProvider>,
    store: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EventSink>,
    schemas: SchemaCache,
    session: SessionConfig,
    replay: Replay,
    fail_on_topic_error: bool,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("schemas", &self.schemas)
            .field("session", &self.session)
            .field("replay", &self.replay)
            .field("fail_on_topic_error", &self.fail_on_topic_error)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
        config: &Config,
    ) -> Self {
        Self {
            provider,
            store,
            connector,
            sink,
            schemas: SchemaCache::new(),
            session: SessionConfig::from(config),
            replay: config.replay(),
            fail_on_topic_error: config.fail_on_topic_error,
        }
    }

    /// Schema cache shared by every session.
    pub fn schemas(&self) -> &SchemaCache {
        &self.schemas
    }

    /// Runs a job until every topic session has closed.
    ///
    /// Cancelling `shutdown` drains every session of the job.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The refresh token is rejected ([`Error::CredentialRefreshFailed`])
    /// - The refreshed credential cannot be stored ([`Error::CredentialPersistFailed`])
    /// - No event bus handle can be built ([`Error::Connect`])
    /// - A topic failed and `fail_on_topic_error` is set ([`Error::TopicsFailed`])
    ///
    /// Topic-level failures are otherwise reported in the returned [`JobReport`].
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn run(
        &self,
        job: SubscriptionJob,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JobReport, Error> {
        let SubscriptionJob {
            tenant_id,
            credential,
            topics,
            mut cursors,
        } = job;

        let credential = self.refresh(&tenant_id, credential).await?;
        let bus = self
            .connector
            .connect(&Auth::from(&credential))
            .await
            .map_err(|source| Error::Connect {
                tenant_id: tenant_id.clone(),
                source,
            })?;

        info!(tenant_id = %tenant_id, topics = topics.len(), "starting topic sessions");
        let mut tasks = JoinSet::new();
        for topic in &topics {
            let start = cursors
                .remove(topic)
                .map(Replay::Custom)
                .unwrap_or_else(|| self.replay.clone());
            let session = Session::new(
                &tenant_id,
                topic,
                bus.clone(),
                self.schemas.clone(),
                self.sink.clone(),
                self.session.clone(),
            )
            .start_from(start);
            tasks.spawn(run_topic(
                tenant_id.clone(),
                bus.clone(),
                session,
                shutdown.clone(),
            ));
        }

        let mut reports = Vec::with_capacity(topics.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(tenant_id = %tenant_id, error = %e, "topic task aborted"),
            }
        }
        for topic in &topics {
            if !reports.iter().any(|report| &report.topic == topic) {
                reports.push(TopicReport {
                    topic: topic.clone(),
                    outcome: TopicOutcome::Aborted("topic task did not finish".to_string()),
                });
            }
        }
        reports.sort_by(|a, b| a.topic.cmp(&b.topic));

        let report = JobReport {
            tenant_id,
            topics: reports,
        };
        info!(
            tenant_id = %report.tenant_id,
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            skipped = report.skipped().count(),
            "subscription job finished"
        );

        if self.fail_on_topic_error && report.failed().next().is_some() {
            return Err(Error::TopicsFailed(report));
        }
        Ok(report)
    }

    /// Exchanges the refresh token and stores the result before anything uses it.
    async fn refresh(&self, tenant_id: &str, credential: Credential) -> Result<Credential, Error> {
        let grant = self
            .provider
            .refresh(
                &credential.refresh_token,
                &credential.client_id,
                &credential.client_secret,
            )
            .await
            .map_err(|source| {
                error!(tenant_id, error = %source, "credential refresh failed, relink required");
                Error::CredentialRefreshFailed {
                    tenant_id: tenant_id.to_string(),
                    source,
                }
            })?;

        let mut refreshed = credential;
        refreshed.access_token = grant.access_token;
        if let Some(refresh_token) = grant.refresh_token {
            refreshed.refresh_token = refresh_token;
        }
        if let Some(instance_url) = grant.instance_url {
            refreshed.instance_url = instance_url;
        }

        self.store
            .update(&refreshed)
            .await
            .map_err(|source| Error::CredentialPersistFailed {
                tenant_id: tenant_id.to_string(),
                source,
            })?;
        Ok(refreshed)
    }
}

async fn run_topic(
    tenant_id: String,
    bus: Arc<dyn EventBus>,
    session: Session,
    mut shutdown: watch::Receiver<bool>,
) -> TopicReport {
    let topic = session.topic().to_string();

    let lookup = tokio::select! {
        biased;
        _ = pubsub::cancelled(&mut shutdown) => None,
        lookup = bus.get_topic(&topic) => Some(lookup),
    };

    let outcome = match lookup {
        // A cancelled session closes at once and reports its starting cursor.
        None => run_session(session, shutdown).await,
        Some(Ok(info)) if info.can_subscribe => run_session(session, shutdown).await,
        Some(Ok(_)) => {
            warn!(tenant_id = %tenant_id, topic = %topic, "topic not subscribable, skipping");
            TopicOutcome::Skipped(pubsub::Error::TopicNotSubscribable(topic.clone()))
        }
        Some(Err(error)) => {
            warn!(
                tenant_id = %tenant_id,
                topic = %topic,
                kind = %error.kind(),
                error = %error,
                "topic lookup failed, skipping"
            );
            TopicOutcome::Skipped(error)
        }
    };

    TopicReport { topic, outcome }
}

async fn run_session(session: Session, shutdown: watch::Receiver<bool>) -> TopicOutcome {
    match session.run(shutdown).await {
        Ok(summary) => TopicOutcome::Completed(summary),
        Err(failure) => TopicOutcome::Failed(failure),
    }
}
