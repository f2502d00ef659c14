//! Onboarding of tenants through the OAuth2 authorization-code flow.
//!
//! [`register`] records a pending credential for a connected app and returns the login URL
//! the tenant's administrator must visit. The redirect carries an authorization code that
//! [`complete`] exchanges for tokens, after which the credential is [`LinkStatus::Linked`]
//! and picked up by the scheduler.

use tracing::{debug, info, warn};
use url::Url;

use crate::client::{self, CodeExchange, CredentialProvider};
use crate::store::{self, Credential, CredentialStore, LinkStatus};

/// Errors that can occur while linking a tenant.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The credential store failed.
    #[error("Credential store error: {0}")]
    Store(#[from] store::Error),
    /// The login URL could not be built.
    #[error("Failed to build login URL: {0}")]
    LoginUrl(#[source] client::Error),
    /// No pending credential accepted the authorization code.
    #[error("Authorization code was not accepted for any pending credential")]
    CodeRejected,
}

/// Result of [`register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// ID of the pending credential.
    pub credential_id: String,
    /// Login URL to send the administrator to.
    pub login_url: Url,
}

/// Generates a credential ID that doubles as a PKCE code verifier (64 hex characters).
fn new_credential_id() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Registers a connected app and returns its login URL.
///
/// A credential already registered for the same client ID and secret is reused.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub async fn register(
    store: &dyn CredentialStore,
    provider: &dyn CredentialProvider,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
) -> Result<Registration, Error> {
    let credential = match store.find_by_client(client_id, client_secret).await? {
        Some(existing) => existing,
        None => {
            let credential = Credential::pending(new_credential_id(), client_id, client_secret);
            store.insert(credential.clone()).await?;
            info!(credential_id = %credential.id, "registered pending credential");
            credential
        }
    };

    let login_url = provider
        .authorize_url(client_id, redirect_uri, &credential.id)
        .map_err(Error::LoginUrl)?;

    Ok(Registration {
        credential_id: credential.id,
        login_url,
    })
}

/// Exchanges an authorization code and links the credential it belongs to.
///
/// The callback does not say which connected app issued the code, so the exchange is tried
/// against each pending credential in turn.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub async fn complete(
    store: &dyn CredentialStore,
    provider: &dyn CredentialProvider,
    code: &str,
    redirect_uri: &str,
) -> Result<Credential, Error> {
    for credential in store.find_by_status(LinkStatus::Pending).await? {
        let request = CodeExchange {
            code: code.to_string(),
            client_id: credential.client_id.clone(),
            client_secret: credential.client_secret.clone(),
            redirect_uri: redirect_uri.to_string(),
            code_verifier: credential.id.clone(),
        };

        let grant = match provider.exchange_code(&request).await {
            Ok(grant) => grant,
            Err(e) => {
                debug!(credential_id = %credential.id, error = %e, "code not accepted");
                continue;
            }
        };

        let instance_url = grant.instance_url.unwrap_or_default();
        let user_info = match provider.user_info(&instance_url, &grant.access_token).await {
            Ok(user_info) => user_info,
            Err(e) => {
                warn!(credential_id = %credential.id, error = %e, "user info lookup failed");
                continue;
            }
        };

        let linked = Credential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or_default(),
            instance_url,
            tenant_id: user_info.organization_id,
            status: LinkStatus::Linked,
            ..credential
        };
        store.update(&linked).await?;
        info!(tenant_id = %linked.tenant_id, credential_id = %linked.id, "tenant linked");
        return Ok(linked);
    }

    Err(Error::CodeRejected)
}
