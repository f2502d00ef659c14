use async_trait::async_trait;
use salesforce_pubsub_v1::eventbus::v1::pub_sub_client::PubSubClient;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use super::{
    Auth, Connector, Error, EventBus, FetchRequest, FetchStream, SchemaInfo, SchemaRequest,
    TopicInfo, TopicRequest,
};

/// Interval of HTTP/2 keepalive pings on the shared channel.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct ContextInterceptor {
    access_token: AsciiMetadataValue,
    instance_url: AsciiMetadataValue,
    tenant_id: AsciiMetadataValue,
}

impl tonic::service::Interceptor for ContextInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> Result<tonic::Request<()>, tonic::Status> {
        request
            .metadata_mut()
            .insert("accesstoken", self.access_token.to_owned());
        request
            .metadata_mut()
            .insert("instanceurl", self.instance_url.to_owned());
        request
            .metadata_mut()
            .insert("tenantid", self.tenant_id.to_owned());
        Ok(request)
    }
}

fn metadata_value(name: &str, value: &str) -> Result<AsciiMetadataValue, Error> {
    if value.is_empty() {
        return Err(Error::MissingRequiredAttribute(name.to_string()));
    }
    value
        .parse()
        .map_err(|e| Error::InvalidMetadataValue { source: e })
}

/// Pub/Sub API context for making gRPC calls on behalf of one tenant.
///
/// Every call carries the tenant's access token, instance URL and org ID as metadata.
/// Cloning is cheap and shares the underlying channel.
///
/// # Examples
///
/// ```no_run
/// use salesforce_cdc::pubsub::{Auth, Context, EventBus};
/// use salesforce_pubsub_v1::eventbus;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = tonic::transport::Channel::from_static(eventbus::ENDPOINT)
///     .connect()
///     .await?;
///
/// let auth = Auth {
///     access_token: "00Dxx!AQ0AQ".to_string(),
///     instance_url: "https://mydomain.my.salesforce.com".to_string(),
///     tenant_id: "00Dxx0000001gPL".to_string(),
/// };
/// let context = Context::new(channel, &auth)?;
/// let topic = context.get_topic("/data/AccountChangeEvent").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Context {
    tenant_id: String,
    pubsub: PubSubClient<InterceptedService<Channel, ContextInterceptor>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Creates a new Pub/Sub context.
    ///
    /// # Errors
    ///
    /// Returns an error if an authentication attribute is empty
    /// ([`Error::MissingRequiredAttribute`]) or not valid header text
    /// ([`Error::InvalidMetadataValue`]).
    pub fn new(channel: Channel, auth: &Auth) -> Result<Self, Error> {
        let interceptor = ContextInterceptor {
            access_token: metadata_value("access_token", &auth.access_token)?,
            instance_url: metadata_value("instance_url", &auth.instance_url)?,
            tenant_id: metadata_value("tenant_id", &auth.tenant_id)?,
        };

        Ok(Context {
            tenant_id: auth.tenant_id.clone(),
            pubsub: PubSubClient::with_interceptor(channel, interceptor),
        })
    }

    /// Organization ID this context authenticates as.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[async_trait]
impl EventBus for Context {
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn get_topic(&self, topic_name: &str) -> Result<TopicInfo, Error> {
        let mut pubsub = self.pubsub.clone();
        pubsub
            .get_topic(tonic::Request::new(TopicRequest {
                topic_name: topic_name.to_string(),
            }))
            .await
            .map(tonic::Response::into_inner)
            .map_err(|status| match status.code() {
                tonic::Code::NotFound => Error::TopicNotFound(topic_name.to_string()),
                _ => Error::Tonic(Box::new(status)),
            })
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn get_schema(&self, schema_id: &str) -> Result<SchemaInfo, Error> {
        let mut pubsub = self.pubsub.clone();
        pubsub
            .get_schema(tonic::Request::new(SchemaRequest {
                schema_id: schema_id.to_string(),
            }))
            .await
            .map(tonic::Response::into_inner)
            .map_err(|e| Error::Tonic(Box::new(e)))
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn subscribe(
        &self,
        requests: mpsc::Receiver<FetchRequest>,
    ) -> Result<FetchStream, Error> {
        let mut pubsub = self.pubsub.clone();
        let response = pubsub
            .subscribe(ReceiverStream::new(requests))
            .await
            .map_err(|e| Error::Tonic(Box::new(e)))?;
        Ok(Box::pin(response.into_inner()))
    }
}

/// [`Connector`] that binds tenants to one shared, lazily connected channel.
///
/// TLS with the platform's native roots is enabled for `https` endpoints.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    channel: Channel,
}

impl ChannelConnector {
    /// Configures a channel to `endpoint` without connecting yet.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Endpoint`] if the endpoint URI or TLS setup is invalid.
    pub fn new(endpoint: &str, connect_timeout: Duration) -> Result<Self, Error> {
        let mut endpoint = Endpoint::new(endpoint.to_string())
            .map_err(|e| Error::Endpoint { source: e })?
            .connect_timeout(connect_timeout)
            .http2_keep_alive_interval(KEEP_ALIVE_INTERVAL)
            .keep_alive_while_idle(true);

        if endpoint.uri().scheme_str() == Some("https") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| Error::Endpoint { source: e })?;
        }

        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    /// Uses an existing channel.
    pub fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, auth: &Auth) -> Result<Arc<dyn EventBus>, Error> {
        let context = Context::new(self.channel.clone(), auth)?;
        Ok(Arc::new(context))
    }
}
