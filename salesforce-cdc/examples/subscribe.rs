//! Subscribes one linked org to its change event topics and logs every event.
//!
//! ```sh
//! SALESFORCE_CLIENT_ID=... SALESFORCE_CLIENT_SECRET=... SALESFORCE_REFRESH_TOKEN=... \
//! SALESFORCE_ORG_ID=00D... RUST_LOG=salesforce_cdc=debug \
//! cargo run --example subscribe -- config.json
//! ```

use std::sync::Arc;

use salesforce_cdc::client;
use salesforce_cdc::config::{Config, ConfigFrom};
use salesforce_cdc::pubsub::{ChannelConnector, LogSink};
use salesforce_cdc::scheduler::Scheduler;
use salesforce_cdc::store::{Credential, CredentialStore, LinkStatus, MemoryStore};
use salesforce_cdc::subscription::Orchestrator;
use tracing_subscriber::EnvFilter;

fn required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(name).map_err(|_| format!("{name} must be set").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(ConfigFrom::Path(path.into()))?,
        None => Config::load(ConfigFrom::Value(Config::default()))?,
    }
    .apply_env();

    let store = Arc::new(MemoryStore::new());
    store
        .insert(Credential {
            refresh_token: required("SALESFORCE_REFRESH_TOKEN")?,
            tenant_id: required("SALESFORCE_ORG_ID")?,
            status: LinkStatus::Linked,
            ..Credential::pending(
                "example",
                required("SALESFORCE_CLIENT_ID")?,
                required("SALESFORCE_CLIENT_SECRET")?,
            )
        })
        .await?;

    let provider = client::Builder::new()
        .login_url(&config.login_url)
        .build()?;
    let connector = ChannelConnector::new(&config.endpoint, config.connect_timeout())?;
    let orchestrator = Orchestrator::new(
        Arc::new(provider),
        store.clone(),
        Arc::new(connector),
        Arc::new(LogSink),
        &config,
    );
    let scheduler = Scheduler::new(store, Arc::new(orchestrator), config.topics.clone());

    let (stop, shutdown) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            let _ = stop.send(true);
        }
    });

    let runs = scheduler.schedule_all(shutdown).await?;
    for (tenant_id, result) in runs.join().await {
        match result {
            Ok(report) => println!("{report}"),
            Err(e) => eprintln!("tenant {tenant_id}: {e}"),
        }
    }
    Ok(())
}
