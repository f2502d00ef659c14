use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    StandardRevocableToken, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default OAuth2 authorization endpoint path.
const DEFAULT_AUTHORIZE_PATH: &str = "/services/oauth2/authorize";

/// Default OAuth2 token endpoint path.
const DEFAULT_TOKEN_PATH: &str = "/services/oauth2/token";

/// OpenID Connect user info endpoint path, relative to the instance URL.
const USERINFO_PATH: &str = "/services/oauth2/userinfo";

/// Salesforce-specific fields returned alongside the standard token response.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SalesforceTokenFields {
    /// Instance URL of the org that issued the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    /// Identity URL of the authenticated user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Issue time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<String>,
}

impl ExtraTokenFields for SalesforceTokenFields {}

/// Type alias for Salesforce OAuth2 token response including instance URL fields.
pub type SalesforceTokenResponse =
    oauth2::StandardTokenResponse<SalesforceTokenFields, BasicTokenType>;

type BaseClient = oauth2::Client<
    BasicErrorResponse,
    SalesforceTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

type ConfiguredClient = oauth2::Client<
    BasicErrorResponse,
    SalesforceTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Errors that can occur during credential provider operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid URL format.
    #[error("Invalid URL format: {source}")]
    ParseUrl {
        #[source]
        source: url::ParseError,
    },
    /// Failed to build the HTTP client.
    #[error("Failed to build HTTP client: {source}")]
    HttpClient {
        #[source]
        source: reqwest::Error,
    },
    /// OAuth2 token exchange failed.
    #[error("OAuth2 token exchange failed: {0:?}")]
    TokenExchange(Box<dyn std::error::Error + Send + Sync>),
    /// The token response did not include an instance URL.
    #[error("Token response is missing the instance URL")]
    MissingInstanceUrl,
    /// Token refresh is not available (no refresh token present).
    #[error("Token refresh not available: no refresh token stored")]
    NoRefreshToken,
    /// User info request failed.
    #[error("User info request failed: {source}")]
    UserInfo {
        #[source]
        source: reqwest::Error,
    },
}

/// Tokens issued by an exchange or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// New access token.
    pub access_token: String,
    /// New refresh token, when the server rotated it.
    pub refresh_token: Option<String>,
    /// Instance URL, when the server returned one.
    pub instance_url: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("instance_url", &self.instance_url)
            .finish()
    }
}

impl From<SalesforceTokenResponse> for TokenGrant {
    fn from(response: SalesforceTokenResponse) -> Self {
        Self {
            access_token: response.access_token().secret().to_string(),
            refresh_token: response
                .refresh_token()
                .map(|token| token.secret().to_string()),
            instance_url: response.extra_fields().instance_url.clone(),
        }
    }
}

/// Parameters of an authorization-code exchange.
#[derive(Debug, Clone)]
pub struct CodeExchange {
    /// Authorization code received on the redirect URI.
    pub code: String,
    /// Consumer key of the connected app.
    pub client_id: String,
    /// Consumer secret of the connected app.
    pub client_secret: String,
    /// Redirect URI used when the code was issued.
    pub redirect_uri: String,
    /// PKCE code verifier matching the challenge in the login URL.
    pub code_verifier: String,
}

/// Identity of the org a token belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Organization ID.
    pub organization_id: String,
    /// ID of the authenticated user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Exchanges authorization codes and refresh tokens for access tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Builds the login URL for the authorization-code flow with a PKCE S256 challenge.
    fn authorize_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<Url, Error>;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenGrant, Error>;

    /// Exchanges a refresh token for a fresh access token.
    async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenGrant, Error>;

    /// Resolves the org behind an access token.
    async fn user_info(&self, instance_url: &str, access_token: &str) -> Result<UserInfo, Error>;
}

/// OAuth2 client for Salesforce connected apps.
///
/// Use [`Builder`] to construct a client instance.
///
/// # Examples
///
/// ```no_run
/// use salesforce_cdc::client::{self, CredentialProvider};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = client::Builder::new()
///     .login_url("https://login.salesforce.com")
///     .build()?;
///
/// let grant = client
///     .refresh("stored_refresh_token", "your_client_id", "your_client_secret")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    /// Salesforce login host.
    login_url: String,
    /// Shared HTTP client for token and user info requests.
    http_client: reqwest::Client,
}

impl Client {
    /// Returns the login host tokens are requested from.
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    fn oauth2_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<ConfiguredClient, Error> {
        let client = BaseClient::new(ClientId::new(client_id.to_string()));
        let client = match client_secret {
            Some(secret) => client.set_client_secret(ClientSecret::new(secret.to_string())),
            None => client,
        };

        Ok(client
            .set_auth_uri(
                AuthUrl::new(format!("{}{}", self.login_url, DEFAULT_AUTHORIZE_PATH))
                    .map_err(|e| Error::ParseUrl { source: e })?,
            )
            .set_token_uri(
                TokenUrl::new(format!("{}{}", self.login_url, DEFAULT_TOKEN_PATH))
                    .map_err(|e| Error::ParseUrl { source: e })?,
            ))
    }
}

#[async_trait]
impl CredentialProvider for Client {
    fn authorize_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<Url, Error> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| Error::ParseUrl { source: e })?;
        let verifier = PkceCodeVerifier::new(code_verifier.to_string());

        let (url, _csrf) = self
            .oauth2_client(client_id, None)?
            .set_redirect_uri(redirect)
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(PkceCodeChallenge::from_code_verifier_sha256(&verifier))
            .url();

        Ok(url)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenGrant, Error> {
        let redirect = RedirectUrl::new(request.redirect_uri.clone())
            .map_err(|e| Error::ParseUrl { source: e })?;

        let response = self
            .oauth2_client(&request.client_id, Some(&request.client_secret))?
            .set_redirect_uri(redirect)
            .exchange_code(AuthorizationCode::new(request.code.clone()))
            .set_pkce_verifier(PkceCodeVerifier::new(request.code_verifier.clone()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| Error::TokenExchange(Box::new(e)))?;

        let grant = TokenGrant::from(response);
        if grant.instance_url.is_none() {
            return Err(Error::MissingInstanceUrl);
        }
        Ok(grant)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenGrant, Error> {
        if refresh_token.is_empty() {
            return Err(Error::NoRefreshToken);
        }

        let response = self
            .oauth2_client(client_id, Some(client_secret))?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| Error::TokenExchange(Box::new(e)))?;

        Ok(TokenGrant::from(response))
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn user_info(&self, instance_url: &str, access_token: &str) -> Result<UserInfo, Error> {
        let url = Url::parse(instance_url)
            .and_then(|base| base.join(USERINFO_PATH))
            .map_err(|e| Error::ParseUrl { source: e })?;

        self.http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::UserInfo { source: e })?
            .json::<UserInfo>()
            .await
            .map_err(|e| Error::UserInfo { source: e })
    }
}

/// Builder for constructing a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use salesforce_cdc::client;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Sandbox orgs log in through test.salesforce.com
/// let client = client::Builder::new()
///     .login_url("https://test.salesforce.com")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Builder {
    login_url: Option<String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the login host. Defaults to [`crate::DEFAULT_LOGIN_URL`].
    pub fn login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = Some(login_url.into());
        self
    }

    /// Sets the connection timeout for OAuth2 requests.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the overall timeout for OAuth2 requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the login URL is malformed ([`Error::ParseUrl`]) or the
    /// HTTP client cannot be created ([`Error::HttpClient`]).
    pub fn build(self) -> Result<Client, Error> {
        let login_url = self
            .login_url
            .unwrap_or_else(|| crate::DEFAULT_LOGIN_URL.to_string());
        Url::parse(&login_url).map_err(|e| Error::ParseUrl { source: e })?;

        // Redirects are disabled, as recommended by the oauth2 crate to prevent SSRF.
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(self.connect_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_AUTH_CONNECT_TIMEOUT_SECS,
            )))
            .timeout(self.request_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_AUTH_REQUEST_TIMEOUT_SECS,
            )))
            .build()
            .map_err(|e| Error::HttpClient { source: e })?;

        Ok(Client {
            login_url: login_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_client() -> Client {
        // Port 9 (discard) is closed on test machines, so requests fail fast.
        Builder::new()
            .login_url("http://127.0.0.1:9")
            .connect_timeout(Duration::from_millis(200))
            .request_timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let client = Builder::new().build().unwrap();
        assert_eq!(client.login_url(), "https://login.salesforce.com");
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let client = Builder::new()
            .login_url("https://test.salesforce.com/")
            .build()
            .unwrap();
        assert_eq!(client.login_url(), "https://test.salesforce.com");
    }

    #[test]
    fn test_builder_invalid_login_url() {
        let result = Builder::new().login_url("login.salesforce.com").build();
        assert!(matches!(result, Err(Error::ParseUrl { .. })));
    }

    #[test]
    fn test_authorize_url_carries_pkce_challenge() {
        let client = Builder::new().build().unwrap();
        let verifier = "a".repeat(64);
        let url = client
            .authorize_url("my_client", "https://app.example.com/oauth/callback", &verifier)
            .unwrap();

        assert_eq!(url.path(), DEFAULT_AUTHORIZE_PATH);
        let params: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(params.get("client_id").map(String::as_str), Some("my_client"));
        assert_eq!(
            params.get("redirect_uri").map(String::as_str),
            Some("https://app.example.com/oauth/callback")
        );
        assert_eq!(
            params.get("code_challenge_method").map(String::as_str),
            Some("S256")
        );

        let expected = PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(
            verifier.clone(),
        ));
        assert_eq!(
            params.get("code_challenge").map(String::as_str),
            Some(expected.as_str())
        );
    }

    #[test]
    fn test_authorize_url_invalid_redirect() {
        let client = Builder::new().build().unwrap();
        let result = client.authorize_url("my_client", "not a url", "verifier");
        assert!(matches!(result, Err(Error::ParseUrl { .. })));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let client = unreachable_client();
        let result = client.refresh("", "client", "secret").await;
        assert!(matches!(result, Err(Error::NoRefreshToken)));
    }

    #[tokio::test]
    async fn test_refresh_against_unreachable_host() {
        let client = unreachable_client();
        let result = client.refresh("refresh", "client", "secret").await;
        assert!(matches!(result, Err(Error::TokenExchange(_))));
    }

    #[tokio::test]
    async fn test_exchange_code_against_unreachable_host() {
        let client = unreachable_client();
        let request = CodeExchange {
            code: "code".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "https://app.example.com/oauth/callback".to_string(),
            code_verifier: "b".repeat(64),
        };
        let result = client.exchange_code(&request).await;
        assert!(matches!(result, Err(Error::TokenExchange(_))));
    }

    #[tokio::test]
    async fn test_user_info_invalid_instance_url() {
        let client = unreachable_client();
        let result = client.user_info("not a url", "token").await;
        assert!(matches!(result, Err(Error::ParseUrl { .. })));
    }

    #[tokio::test]
    async fn test_user_info_against_unreachable_host() {
        let client = unreachable_client();
        let result = client.user_info("http://127.0.0.1:9", "token").await;
        assert!(matches!(result, Err(Error::UserInfo { .. })));
    }

    #[test]
    fn test_token_grant_from_salesforce_response() {
        let response: SalesforceTokenResponse = serde_json::from_str(
            r#"{
                "access_token": "00Dxx!AQ0AQ",
                "refresh_token": "5Aep861",
                "signature": "c2lnbmF0dXJl",
                "scope": "refresh_token api",
                "instance_url": "https://mydomain.my.salesforce.com",
                "id": "https://login.salesforce.com/id/00Dxx0000001gPL/005xx000001Sv6e",
                "token_type": "Bearer",
                "issued_at": "1700000000000"
            }"#,
        )
        .unwrap();

        let grant = TokenGrant::from(response);
        assert_eq!(grant.access_token, "00Dxx!AQ0AQ");
        assert_eq!(grant.refresh_token.as_deref(), Some("5Aep861"));
        assert_eq!(
            grant.instance_url.as_deref(),
            Some("https://mydomain.my.salesforce.com")
        );
    }

    #[test]
    fn test_token_grant_from_refresh_response_without_rotation() {
        let response: SalesforceTokenResponse = serde_json::from_str(
            r#"{
                "access_token": "00Dxx!fresh",
                "instance_url": "https://mydomain.my.salesforce.com",
                "token_type": "Bearer"
            }"#,
        )
        .unwrap();

        let grant = TokenGrant::from(response);
        assert_eq!(grant.access_token, "00Dxx!fresh");
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn test_token_grant_debug_redacts() {
        let grant = TokenGrant {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            instance_url: None,
        };
        let debug = format!("{grant:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn test_user_info_deserialize() {
        let info: UserInfo = serde_json::from_str(
            r#"{"sub": "https://login.salesforce.com/id/00D/005", "user_id": "005xx", "organization_id": "00Dxx0000001gPL"}"#,
        )
        .unwrap();
        assert_eq!(info.organization_id, "00Dxx0000001gPL");
        assert_eq!(info.user_id.as_deref(), Some("005xx"));
    }

    #[test]
    fn test_error_display_messages() {
        assert_eq!(
            Error::NoRefreshToken.to_string(),
            "Token refresh not available: no refresh token stored"
        );
        assert_eq!(
            Error::MissingInstanceUrl.to_string(),
            "Token response is missing the instance URL"
        );
        let error = Error::TokenExchange(Box::new(std::io::Error::other("boom")));
        assert!(error.to_string().contains("OAuth2 token exchange failed"));
    }

    #[test]
    fn test_default_paths() {
        assert_eq!(DEFAULT_AUTHORIZE_PATH, "/services/oauth2/authorize");
        assert_eq!(DEFAULT_TOKEN_PATH, "/services/oauth2/token");
        assert_eq!(USERINFO_PATH, "/services/oauth2/userinfo");
    }
}
