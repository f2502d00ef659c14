//! Salesforce Pub/Sub API change event streaming.
//!
//! This module provides the streaming half of the engine:
//! - [`Context`]: a tenant-bound gRPC client that injects authentication metadata
//! - [`SchemaCache`]: process-wide Avro decoders keyed by schema ID
//! - [`Session`]: one flow-controlled subscription to one topic, with reconnect
//!
//! The [`EventBus`] and [`Connector`] traits are the seams between sessions and the
//! transport, and [`EventSink`] is where decoded events leave the engine.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use salesforce_cdc::config::Config;
//! use salesforce_cdc::pubsub::{Auth, ChannelConnector, Connector, LogSink, SchemaCache, Session};
//! use salesforce_pubsub_v1::eventbus;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = ChannelConnector::new(eventbus::ENDPOINT, std::time::Duration::from_secs(30))?;
//! let auth = Auth {
//!     access_token: "00Dxx!AQ0AQ".to_string(),
//!     instance_url: "https://mydomain.my.salesforce.com".to_string(),
//!     tenant_id: "00Dxx0000001gPL".to_string(),
//! };
//! let bus = connector.connect(&auth).await?;
//!
//! let session = Session::new(
//!     &auth.tenant_id,
//!     "/data/AccountChangeEvent",
//!     bus,
//!     SchemaCache::new(),
//!     Arc::new(LogSink),
//!     (&Config::default()).into(),
//! );
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let summary = session.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

mod context;
mod flow;
mod schema;
mod session;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::store::Credential;

pub use context::{ChannelConnector, Context};
pub use flow::FlowWindow;
pub use schema::{Decoder, SchemaCache};
pub use session::{Session, SessionConfig, SessionError, SessionSummary, State};

pub(crate) use session::cancelled;

/// Re-export commonly used types from the generated gRPC client.
pub use salesforce_pubsub_v1::eventbus::{self, v1::*};

/// Constant for the Pub/Sub API endpoint.
pub use salesforce_pubsub_v1::eventbus::ENDPOINT;

/// Error returned by an [`EventSink`].
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Stream of responses on a subscription.
pub type FetchStream =
    Pin<Box<dyn Stream<Item = Result<FetchResponse, tonic::Status>> + Send + 'static>>;

/// Errors that can occur during Pub/Sub operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Required authentication attribute is missing.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
    /// Failed to create valid gRPC metadata from credentials.
    #[error("Invalid metadata value for gRPC headers: {source}")]
    InvalidMetadataValue {
        #[source]
        source: tonic::metadata::errors::InvalidMetadataValue,
    },
    /// The Pub/Sub endpoint could not be configured.
    #[error("Invalid Pub/Sub endpoint: {source}")]
    Endpoint {
        #[source]
        source: tonic::transport::Error,
    },
    /// gRPC communication error.
    #[error("gRPC transport error: {0}")]
    Tonic(Box<tonic::Status>),
    /// The server ended the subscription stream.
    #[error("Stream closed by server")]
    StreamClosed,
    /// Topic does not exist.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),
    /// Topic exists but the tenant may not subscribe to it.
    #[error("Topic does not allow subscriptions: {0}")]
    TopicNotSubscribable(String),
    /// Schema could not be fetched.
    #[error("Schema {schema_id} unavailable: {source}")]
    SchemaUnavailable {
        /// Schema that was requested.
        schema_id: String,
        #[source]
        source: Arc<Error>,
    },
    /// The server does not know the schema.
    #[error("Schema {schema_id} is unknown to the server: {source}")]
    UnknownSchema {
        /// Schema that was requested.
        schema_id: String,
        #[source]
        source: Arc<Error>,
    },
    /// Schema was fetched but is not a valid Avro schema.
    #[error("Schema {schema_id} is invalid: {reason}")]
    InvalidSchema {
        /// Offending schema.
        schema_id: String,
        /// Parser message.
        reason: String,
    },
    /// Payload does not match its schema.
    #[error("Failed to decode payload with schema {schema_id}: {source}")]
    Decode {
        /// Schema used for decoding.
        schema_id: String,
        #[source]
        source: Box<apache_avro::Error>,
    },
    /// Payload decoded to something other than a record.
    #[error("Payload for schema {schema_id} is not a record")]
    UnexpectedPayload {
        /// Schema used for decoding.
        schema_id: String,
    },
    /// A request named a topic other than the one bound to the stream.
    #[error("Topic mismatch: stream bound to {expected}, request for {found}")]
    TopicMismatch {
        /// Topic bound to the stream.
        expected: String,
        /// Topic named by the request.
        found: String,
    },
    /// Client or server broke the subscribe contract.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    /// The event sink rejected an event.
    #[error("Event sink failed: {0}")]
    Sink(SinkError),
    /// Reconnect attempts were exhausted.
    #[error("Gave up after {attempts} reconnect attempts: {last}")]
    ReconnectsExhausted {
        /// Reconnects made before giving up.
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

/// Operator-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network blip or server-side disconnect.
    TransientTransport,
    /// Remote schema lookup failed.
    SchemaUnavailable,
    /// Payload or schema cannot be decoded.
    DecodeFailure,
    /// Request topic differs from the stream's topic.
    TopicMismatch,
    /// Subscribe contract broken.
    ProtocolViolation,
    /// Topic missing or not subscribable.
    TopicNotFound,
    /// Server refused the call (authentication, permission, invalid argument).
    Rejected,
    /// Event sink failure.
    Sink,
    /// Local configuration or credential data is unusable.
    Configuration,
}

impl ErrorKind {
    /// Returns true if the condition clears without operator action.
    ///
    /// Everything else needs a human: a relink, a schema fix or a configuration change.
    pub fn self_heals(self) -> bool {
        matches!(self, Self::TransientTransport | Self::SchemaUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientTransport => "transient_transport",
            Self::SchemaUnavailable => "schema_unavailable",
            Self::DecodeFailure => "decode_failure",
            Self::TopicMismatch => "topic_mismatch",
            Self::ProtocolViolation => "protocol_violation",
            Self::TopicNotFound => "topic_not_found",
            Self::Rejected => "rejected",
            Self::Sink => "sink",
            Self::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Tonic(status) => match status.code() {
                tonic::Code::Unavailable
                | tonic::Code::DeadlineExceeded
                | tonic::Code::Aborted
                | tonic::Code::Internal
                | tonic::Code::Unknown
                | tonic::Code::Cancelled
                | tonic::Code::ResourceExhausted => ErrorKind::TransientTransport,
                tonic::Code::NotFound => ErrorKind::TopicNotFound,
                _ => ErrorKind::Rejected,
            },
            Error::StreamClosed => ErrorKind::TransientTransport,
            Error::TopicNotFound(_) | Error::TopicNotSubscribable(_) => ErrorKind::TopicNotFound,
            Error::SchemaUnavailable { source, .. } => match source.kind() {
                ErrorKind::TransientTransport | ErrorKind::SchemaUnavailable => {
                    ErrorKind::SchemaUnavailable
                }
                other => other,
            },
            Error::UnknownSchema { .. }
            | Error::InvalidSchema { .. }
            | Error::Decode { .. }
            | Error::UnexpectedPayload { .. } => ErrorKind::DecodeFailure,
            Error::TopicMismatch { .. } => ErrorKind::TopicMismatch,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::Sink(_) => ErrorKind::Sink,
            Error::MissingRequiredAttribute(_)
            | Error::InvalidMetadataValue { .. }
            | Error::Endpoint { .. } => ErrorKind::Configuration,
            Error::ReconnectsExhausted { last, .. } => last.kind(),
        }
    }

    /// Returns true if a session should reconnect after this error.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Error::ReconnectsExhausted { .. })
            && matches!(
                self.kind(),
                ErrorKind::TransientTransport | ErrorKind::SchemaUnavailable
            )
    }
}

/// Authentication metadata attached to every Pub/Sub call.
#[derive(Clone, PartialEq, Eq)]
pub struct Auth {
    /// OAuth2 access token.
    pub access_token: String,
    /// Salesforce instance URL.
    pub instance_url: String,
    /// Organization ID.
    pub tenant_id: String,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("access_token", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl From<&Credential> for Auth {
    fn from(credential: &Credential) -> Self {
        Self {
            access_token: credential.access_token.clone(),
            instance_url: credential.instance_url.clone(),
            tenant_id: credential.tenant_id.clone(),
        }
    }
}

/// Opaque position of an event in a topic's stream.
///
/// Only ever compared and handed back to the server, never interpreted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplayCursor(Vec<u8>);

impl ReplayCursor {
    /// Wraps raw replay ID bytes. Returns `None` for an empty ID.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        (!bytes.is_empty()).then_some(Self(bytes))
    }

    /// Raw replay ID bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the cursor, returning the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for ReplayCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplayCursor({} bytes)", self.0.len())
    }
}

/// Where a new stream starts reading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Replay {
    /// Events published after the stream opens.
    #[default]
    Latest,
    /// Every retained event.
    Earliest,
    /// Events after the given cursor.
    Custom(ReplayCursor),
}

impl Replay {
    /// Writes the directive into a fetch request.
    pub fn apply(&self, request: &mut FetchRequest) {
        match self {
            Replay::Latest => {
                request.replay_preset = ReplayPreset::Latest as i32;
                request.replay_id.clear();
            }
            Replay::Earliest => {
                request.replay_preset = ReplayPreset::Earliest as i32;
                request.replay_id.clear();
            }
            Replay::Custom(cursor) => {
                request.replay_preset = ReplayPreset::Custom as i32;
                request.replay_id = cursor.as_bytes().to_vec();
            }
        }
    }
}

impl From<ReplayCursor> for Replay {
    fn from(cursor: ReplayCursor) -> Self {
        Replay::Custom(cursor)
    }
}

/// A decoded change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Tenant the event belongs to.
    pub tenant_id: String,
    /// Topic the event was received on.
    pub topic: String,
    /// Event ID assigned by the publisher.
    pub event_id: String,
    /// Schema the payload was decoded with.
    pub schema_id: String,
    /// Decoded Avro record.
    pub record: apache_avro::types::Value,
    /// Position of this event, to be checkpointed by the caller.
    pub replay_cursor: ReplayCursor,
}

impl ChangeEvent {
    /// Returns a top-level field of the record.
    pub fn field(&self, name: &str) -> Option<&apache_avro::types::Value> {
        match &self.record {
            apache_avro::types::Value::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

/// Receives decoded events in stream order.
///
/// Returning an error ends the session; the event's cursor is not advanced.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Handles one event.
    async fn on_event(&self, event: ChangeEvent) -> Result<(), SinkError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<ChangeEvent> {
    async fn on_event(&self, event: ChangeEvent) -> Result<(), SinkError> {
        self.send(event)
            .await
            .map_err(|_| "event receiver dropped".into())
    }
}

/// Sink that logs each event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn on_event(&self, event: ChangeEvent) -> Result<(), SinkError> {
        tracing::info!(
            tenant_id = %event.tenant_id,
            topic = %event.topic,
            schema_id = %event.schema_id,
            event_id = %event.event_id,
            cursor = ?event.replay_cursor,
            "change event"
        );
        Ok(())
    }
}

/// The remote Pub/Sub service, bound to one tenant.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Retrieves topic metadata.
    async fn get_topic(&self, topic_name: &str) -> Result<TopicInfo, Error>;

    /// Retrieves an Avro schema definition.
    async fn get_schema(&self, schema_id: &str) -> Result<SchemaInfo, Error>;

    /// Opens a bidirectional subscription fed by `requests`.
    ///
    /// Dropping every sender half-closes the request side of the stream.
    async fn subscribe(&self, requests: mpsc::Receiver<FetchRequest>)
        -> Result<FetchStream, Error>;
}

/// Builds tenant-bound [`EventBus`] handles.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns an event bus authenticated as `auth`.
    async fn connect(&self, auth: &Auth) -> Result<Arc<dyn EventBus>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: tonic::Code) -> Error {
        Error::Tonic(Box::new(tonic::Status::new(code, "test")))
    }

    #[test]
    fn test_transient_status_codes() {
        for code in [
            tonic::Code::Unavailable,
            tonic::Code::DeadlineExceeded,
            tonic::Code::Aborted,
            tonic::Code::Internal,
            tonic::Code::Unknown,
            tonic::Code::Cancelled,
            tonic::Code::ResourceExhausted,
        ] {
            let error = status(code);
            assert_eq!(error.kind(), ErrorKind::TransientTransport, "{code:?}");
            assert!(error.is_transient());
        }
    }

    #[test]
    fn test_fatal_status_codes() {
        for code in [
            tonic::Code::Unauthenticated,
            tonic::Code::PermissionDenied,
            tonic::Code::InvalidArgument,
            tonic::Code::FailedPrecondition,
        ] {
            let error = status(code);
            assert_eq!(error.kind(), ErrorKind::Rejected, "{code:?}");
            assert!(!error.is_transient());
            assert!(!error.kind().self_heals());
        }
        assert_eq!(status(tonic::Code::NotFound).kind(), ErrorKind::TopicNotFound);
    }

    #[test]
    fn test_schema_unavailable_is_transient() {
        let error = Error::SchemaUnavailable {
            schema_id: "abc".to_string(),
            source: Arc::new(status(tonic::Code::Unavailable)),
        };
        assert_eq!(error.kind(), ErrorKind::SchemaUnavailable);
        assert!(error.is_transient());
        assert!(error.kind().self_heals());
    }

    #[test]
    fn test_decode_errors_are_fatal() {
        let invalid = Error::InvalidSchema {
            schema_id: "abc".to_string(),
            reason: "bad".to_string(),
        };
        let unexpected = Error::UnexpectedPayload {
            schema_id: "abc".to_string(),
        };
        for error in [invalid, unexpected] {
            assert_eq!(error.kind(), ErrorKind::DecodeFailure);
            assert!(!error.is_transient());
        }
    }

    #[test]
    fn test_exhausted_reports_last_kind_but_is_not_transient() {
        let error = Error::ReconnectsExhausted {
            attempts: 3,
            last: Box::new(Error::StreamClosed),
        };
        assert_eq!(error.kind(), ErrorKind::TransientTransport);
        assert!(!error.is_transient());
        assert_eq!(
            error.to_string(),
            "Gave up after 3 reconnect attempts: Stream closed by server"
        );
    }

    #[test]
    fn test_error_display_topic_mismatch() {
        let error = Error::TopicMismatch {
            expected: "/data/AccountChangeEvent".to_string(),
            found: "/data/ContactChangeEvent".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Topic mismatch: stream bound to /data/AccountChangeEvent, request for /data/ContactChangeEvent"
        );
        assert_eq!(error.kind(), ErrorKind::TopicMismatch);
    }

    #[test]
    fn test_replay_cursor_rejects_empty() {
        assert!(ReplayCursor::from_bytes(Vec::new()).is_none());
        let cursor = ReplayCursor::from_bytes(vec![0, 0, 1]).unwrap();
        assert_eq!(cursor.as_bytes(), &[0, 0, 1]);
        assert_eq!(format!("{cursor:?}"), "ReplayCursor(3 bytes)");
        assert_eq!(cursor.into_bytes(), vec![0, 0, 1]);
    }

    #[test]
    fn test_replay_apply() {
        let mut request = FetchRequest::default();
        Replay::Earliest.apply(&mut request);
        assert_eq!(request.replay_preset, ReplayPreset::Earliest as i32);
        assert!(request.replay_id.is_empty());

        let cursor = ReplayCursor::from_bytes(vec![9, 9]).unwrap();
        Replay::from(cursor).apply(&mut request);
        assert_eq!(request.replay_preset, ReplayPreset::Custom as i32);
        assert_eq!(request.replay_id, vec![9, 9]);

        Replay::Latest.apply(&mut request);
        assert_eq!(request.replay_preset, ReplayPreset::Latest as i32);
        assert!(request.replay_id.is_empty());
    }

    #[test]
    fn test_auth_from_credential_redacts_token() {
        let credential = Credential {
            access_token: "secret-token".to_string(),
            instance_url: "https://mydomain.my.salesforce.com".to_string(),
            tenant_id: "00Dxx".to_string(),
            ..Credential::default()
        };
        let auth = Auth::from(&credential);
        assert_eq!(auth.tenant_id, "00Dxx");
        assert!(!format!("{auth:?}").contains("secret-token"));
    }

    #[test]
    fn test_change_event_field() {
        use apache_avro::types::Value;
        let event = ChangeEvent {
            tenant_id: "00Dxx".to_string(),
            topic: "/data/AccountChangeEvent".to_string(),
            event_id: "evt".to_string(),
            schema_id: "abc".to_string(),
            record: Value::Record(vec![("Sequence".to_string(), Value::Long(4))]),
            replay_cursor: ReplayCursor::from_bytes(vec![1]).unwrap(),
        };
        assert_eq!(event.field("Sequence"), Some(&Value::Long(4)));
        assert_eq!(event.field("Name"), None);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_dropped_receiver() {
        let (sink, receiver) = mpsc::channel(1);
        drop(receiver);
        let event = ChangeEvent {
            tenant_id: String::new(),
            topic: String::new(),
            event_id: String::new(),
            schema_id: String::new(),
            record: apache_avro::types::Value::Null,
            replay_cursor: ReplayCursor::from_bytes(vec![1]).unwrap(),
        };
        assert!(sink.on_event(event).await.is_err());
    }
}
