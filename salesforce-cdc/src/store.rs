//! Per-tenant credential records.
//!
//! A credential moves through [`LinkStatus::Pending`] (registered, waiting for the OAuth2
//! callback), [`LinkStatus::Linked`] (tokens issued, subscriptions run) and
//! [`LinkStatus::Unlinked`] (access withdrawn). The engine never edits a record in place: it
//! builds a replacement and hands it to [`CredentialStore::update`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Errors returned by a [`CredentialStore`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No credential with the given ID exists.
    #[error("Credential {0} not found")]
    NotFound(String),
    /// A credential with the given ID already exists.
    #[error("Credential {0} already exists")]
    AlreadyExists(String),
    /// The underlying storage failed.
    #[error("Credential store backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// Lifecycle status of a tenant credential.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    /// Registered, waiting for the authorization code.
    #[default]
    Pending,
    /// Tokens issued; the tenant is subscribed on every scheduling pass.
    Linked,
    /// Access withdrawn.
    Unlinked,
}

/// Credential record for one tenant (Salesforce org).
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Credential {
    /// Record identifier. Also used as the PKCE code verifier while linking.
    pub id: String,
    /// Consumer key of the connected app.
    pub client_id: String,
    /// Consumer secret of the connected app.
    pub client_secret: String,
    /// Current OAuth2 access token.
    #[serde(default)]
    pub access_token: String,
    /// OAuth2 refresh token.
    #[serde(default)]
    pub refresh_token: String,
    /// Salesforce instance URL returned with the token.
    #[serde(default)]
    pub instance_url: String,
    /// Organization ID (15 or 18 character Salesforce Org ID).
    #[serde(default)]
    pub tenant_id: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: LinkStatus,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .field("tenant_id", &self.tenant_id)
            .field("status", &self.status)
            .finish()
    }
}

impl Credential {
    /// Creates a pending credential for a connected app.
    pub fn pending(
        id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Self::default()
        }
    }
}

/// Persistence interface for credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns every credential in the given status, ordered by ID.
    async fn find_by_status(&self, status: LinkStatus) -> Result<Vec<Credential>, Error>;

    /// Returns the credential registered for a connected app, if any.
    async fn find_by_client(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Option<Credential>, Error>;

    /// Stores a new credential.
    async fn insert(&self, credential: Credential) -> Result<(), Error>;

    /// Replaces an existing credential with the same ID.
    async fn update(&self, credential: &Credential) -> Result<(), Error>;
}

/// In-memory [`CredentialStore`].
///
/// Cloning shares the underlying records.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    credentials: Arc<DashMap<String, Credential>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the credential with the given ID.
    pub fn get(&self, id: &str) -> Option<Credential> {
        self.credentials.get(id).map(|entry| entry.value().clone())
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Returns true if the store holds no credentials.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_status(&self, status: LinkStatus) -> Result<Vec<Credential>, Error> {
        let mut found: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn find_by_client(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Option<Credential>, Error> {
        Ok(self
            .credentials
            .iter()
            .find(|entry| entry.client_id == client_id && entry.client_secret == client_secret)
            .map(|entry| entry.value().clone()))
    }

    async fn insert(&self, credential: Credential) -> Result<(), Error> {
        match self.credentials.entry(credential.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::AlreadyExists(credential.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(credential);
                Ok(())
            }
        }
    }

    async fn update(&self, credential: &Credential) -> Result<(), Error> {
        match self.credentials.get_mut(&credential.id) {
            Some(mut existing) => {
                *existing = credential.clone();
                Ok(())
            }
            None => Err(Error::NotFound(credential.id.clone())),
        }
    }
}
