//! Change data capture subscriptions over the Salesforce Pub/Sub API.
//!
//! The crate keeps long-lived, pull-based subscriptions to Salesforce change event topics
//! for any number of tenants. Events are decoded from Avro against schemas fetched on demand
//! and handed to an [`EventSink`](pubsub::EventSink) together with their replay cursor.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use salesforce_cdc::config::Config;
//! use salesforce_cdc::pubsub::{ChannelConnector, LogSink};
//! use salesforce_cdc::scheduler::Scheduler;
//! use salesforce_cdc::store::MemoryStore;
//! use salesforce_cdc::subscription::Orchestrator;
//! use salesforce_cdc::client;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default().apply_env();
//! let provider = client::Builder::new().login_url(&config.login_url).build()?;
//! let store = Arc::new(MemoryStore::new());
//! let connector = ChannelConnector::new(&config.endpoint, config.connect_timeout())?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(provider),
//!     store.clone(),
//!     Arc::new(connector),
//!     Arc::new(LogSink),
//!     &config,
//! );
//! let scheduler = Scheduler::new(store, Arc::new(orchestrator), config.topics.clone());
//!
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let runs = scheduler.schedule_all(shutdown).await?;
//! runs.join().await;
//! # Ok(())
//! # }
//! ```

/// Default number of events requested per flow-control refill.
pub const DEFAULT_APPETITE: i32 = 5;

/// Largest number of events a single fetch request may ask for.
pub const MAX_APPETITE: i32 = 100;

/// Default topic subscribed for every linked tenant.
pub const DEFAULT_TOPIC: &str = "/data/AccountChangeEvent";

/// Default Salesforce login host used for OAuth2.
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

/// Default connection timeout for the Pub/Sub gRPC channel (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default time a draining session waits for the server to end the stream (10 seconds).
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Default connection timeout for OAuth2 authentication requests (15 seconds).
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default request timeout for OAuth2 authentication requests (30 seconds).
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;

/// OAuth2 credential provider for Salesforce connected apps.
pub mod client;

/// Engine configuration.
pub mod config;

/// Tenant onboarding: login URLs and authorization-code linking.
pub mod link;

/// Salesforce Pub/Sub API streaming sessions, schemas and flow control.
pub mod pubsub;

/// Launches one subscription run per linked tenant.
pub mod scheduler;

/// Per-tenant credential records and their persistence interface.
pub mod store;

/// Fans out one stream session per topic for a tenant.
pub mod subscription;
