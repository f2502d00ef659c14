use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::{
    ChangeEvent, ConsumerEvent, Error, EventBus, EventSink, FetchRequest, FetchResponse,
    FetchStream, FlowWindow, Replay, ReplayCursor, ReplayPreset, SchemaCache,
};
use crate::config::{Config, ReconnectPolicy};

/// Capacity of the outbound request queue of a stream.
const REQUEST_BUFFER: usize = 8;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Establishing the stream and sending the initial request.
    Opening,
    /// Receiving events and topping up credit.
    Streaming,
    /// Shutdown requested; delivering what the server still sends.
    Draining,
    /// Waiting out the backoff before reopening.
    Reconnecting,
    /// Terminal.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Opening => "opening",
            State::Streaming => "streaming",
            State::Draining => "draining",
            State::Reconnecting => "reconnecting",
            State::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tuning of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Events requested per refill.
    pub appetite: i32,
    /// Backoff between reconnects.
    pub reconnect: ReconnectPolicy,
    /// Time a draining session waits for the server to end the stream.
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        (&Config::default()).into()
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            appetite: config.appetite,
            reconnect: config.reconnect,
            drain_timeout: config.drain_timeout(),
        }
    }
}

/// Outcome of a session that closed cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Topic the session was bound to.
    pub topic: String,
    /// Events handed to the sink.
    pub delivered: u64,
    /// Streams reopened after an interruption.
    pub reconnects: u32,
    /// Position to resume from, if any.
    pub last_cursor: Option<ReplayCursor>,
}

/// A session that ended with an error, with everything it achieved before.
#[derive(thiserror::Error, Debug)]
#[error("Stream session on {} failed: {error}", .summary.topic)]
pub struct SessionError {
    /// Terminal error.
    #[source]
    pub error: Error,
    /// Progress up to the failure, including the last checkpointable cursor.
    pub summary: SessionSummary,
}

struct Stream {
    requests: Option<mpsc::Sender<FetchRequest>>,
    responses: FetchStream,
}

enum Step {
    Drain,
    DrainTimedOut,
    Response(Option<Result<FetchResponse, tonic::Status>>),
}

/// One subscription to one topic for one tenant.
///
/// The session keeps `appetite` events of credit outstanding, decodes each event against its
/// schema and hands it to the sink in server order. Transport interruptions reopen the stream
/// from the last delivered cursor; decode, sink and contract errors end it.
pub struct Session {
    tenant_id: String,
    topic: String,
    bus: Arc<dyn EventBus>,
    schemas: SchemaCache,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    start: Replay,
    cursor: Option<ReplayCursor>,
    window: FlowWindow,
    state: watch::Sender<State>,
    delivered: u64,
    reconnects: u32,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tenant_id", &self.tenant_id)
            .field("topic", &self.topic)
            .field("state", &*self.state.borrow())
            .field("window", &self.window)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session that starts at the latest event.
    pub fn new(
        tenant_id: impl Into<String>,
        topic: impl Into<String>,
        bus: Arc<dyn EventBus>,
        schemas: SchemaCache,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(State::Opening);
        Self {
            tenant_id: tenant_id.into(),
            topic: topic.into(),
            bus,
            schemas,
            sink,
            window: FlowWindow::new(config.appetite),
            config,
            start: Replay::Latest,
            cursor: None,
            state,
            delivered: 0,
            reconnects: 0,
        }
    }

    /// Sets where the first stream starts.
    pub fn start_from(mut self, replay: Replay) -> Self {
        self.start = replay;
        self
    }

    /// Topic bound to this session.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Runs the session until it closes.
    ///
    /// Setting `shutdown` to `true` drains the session: no more credit is requested, events
    /// already on the wire are still delivered, and the session closes when the server ends
    /// the stream or the drain timeout passes.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] for any non-transient failure, or once the reconnect
    /// policy is exhausted.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SessionSummary, SessionError> {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow_and_update() {
                return Ok(self.close());
            }

            self.transition(State::Opening);
            let opened = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => None,
                opened = self.open() => Some(opened),
            };

            let result = match opened {
                None => return Ok(self.close()),
                Some(Ok(stream)) => {
                    self.transition(State::Streaming);
                    self.stream(stream, &mut shutdown, &mut attempt).await
                }
                Some(Err(error)) => Err(error),
            };

            let error = match result {
                Ok(()) => return Ok(self.close()),
                Err(error) if error.is_transient() => error,
                Err(error) => return Err(self.fail(error)),
            };

            attempt += 1;
            if self.config.reconnect.exhausted(attempt) {
                let error = Error::ReconnectsExhausted {
                    attempts: attempt - 1,
                    last: Box::new(error),
                };
                return Err(self.fail(error));
            }

            self.transition(State::Reconnecting);
            let delay = self.config.reconnect.backoff(attempt);
            warn!(
                tenant_id = %self.tenant_id,
                topic = %self.topic,
                kind = %error.kind(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "stream interrupted, reconnecting"
            );

            let cancelled_during_backoff = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => true,
                _ = sleep(delay) => false,
            };
            if cancelled_during_backoff {
                return Ok(self.close());
            }
            self.reconnects += 1;
        }
    }

    async fn open(&mut self) -> Result<Stream, Error> {
        let replay = match &self.cursor {
            Some(cursor) => Replay::Custom(cursor.clone()),
            None => self.start.clone(),
        };

        let mut request = FetchRequest {
            topic_name: self.topic.clone(),
            num_requested: self.window.open(),
            ..FetchRequest::default()
        };
        replay.apply(&mut request);
        validate_request(&self.topic, &request, true)?;

        let (requests, receiver) = mpsc::channel(REQUEST_BUFFER);
        requests
            .send(request)
            .await
            .map_err(|_| Error::StreamClosed)?;

        info!(
            tenant_id = %self.tenant_id,
            topic = %self.topic,
            replay = ?replay,
            num_requested = self.window.requested(),
            "opening stream"
        );
        let responses = self.bus.subscribe(receiver).await?;

        Ok(Stream {
            requests: Some(requests),
            responses,
        })
    }

    /// Pumps one stream. `Ok` means the session is done; errors decide between reconnect and
    /// failure.
    async fn stream(
        &mut self,
        mut stream: Stream,
        shutdown: &mut watch::Receiver<bool>,
        attempt: &mut u32,
    ) -> Result<(), Error> {
        let mut drain_deadline: Option<Instant> = None;

        loop {
            let draining = drain_deadline.is_some();
            let step = tokio::select! {
                biased;
                _ = cancelled(shutdown), if !draining => Step::Drain,
                _ = sleep_until(drain_deadline.unwrap_or_else(Instant::now)), if draining => {
                    Step::DrainTimedOut
                }
                response = stream.responses.next() => Step::Response(response),
            };

            match step {
                Step::Drain => {
                    self.transition(State::Draining);
                    // Half-close: the server sees end of requests and may finish the stream.
                    stream.requests = None;
                    drain_deadline = Some(Instant::now() + self.config.drain_timeout);
                }
                Step::DrainTimedOut => {
                    warn!(
                        tenant_id = %self.tenant_id,
                        topic = %self.topic,
                        timeout_ms = self.config.drain_timeout.as_millis() as u64,
                        "drain timed out, abandoning stream"
                    );
                    return Ok(());
                }
                Step::Response(Some(Ok(response))) => {
                    *attempt = 0;
                    self.handle_batch(response, stream.requests.as_ref()).await?;
                }
                Step::Response(Some(Err(status))) if draining => {
                    debug!(
                        tenant_id = %self.tenant_id,
                        topic = %self.topic,
                        code = ?status.code(),
                        "stream ended with status while draining"
                    );
                    return Ok(());
                }
                Step::Response(Some(Err(status))) => return Err(Error::Tonic(Box::new(status))),
                Step::Response(None) if draining => return Ok(()),
                Step::Response(None) => return Err(Error::StreamClosed),
            }
        }
    }

    async fn handle_batch(
        &mut self,
        response: FetchResponse,
        requests: Option<&mpsc::Sender<FetchRequest>>,
    ) -> Result<(), Error> {
        if response.events.is_empty() {
            debug!(
                tenant_id = %self.tenant_id,
                topic = %self.topic,
                pending_num_requested = response.pending_num_requested,
                "keepalive"
            );
            return Ok(());
        }

        for consumed in response.events {
            if let Some(num_requested) = self.window.consume(requests.is_some())? {
                if let Some(requests) = requests {
                    self.top_up(requests, num_requested).await?;
                }
            }

            let event = self.decode(consumed).await?;
            let cursor = event.replay_cursor.clone();
            self.sink.on_event(event).await.map_err(Error::Sink)?;
            self.cursor = Some(cursor);
            self.delivered += 1;
        }
        Ok(())
    }

    async fn top_up(
        &self,
        requests: &mpsc::Sender<FetchRequest>,
        num_requested: i32,
    ) -> Result<(), Error> {
        let request = FetchRequest {
            topic_name: self.topic.clone(),
            num_requested,
            ..FetchRequest::default()
        };
        validate_request(&self.topic, &request, false)?;

        debug!(
            tenant_id = %self.tenant_id,
            topic = %self.topic,
            num_requested,
            requested = self.window.requested(),
            "requesting more events"
        );
        // A closed request side means the stream is ending; the response side reports why.
        if requests.send(request).await.is_err() {
            debug!(tenant_id = %self.tenant_id, topic = %self.topic, "request stream closed");
        }
        Ok(())
    }

    async fn decode(&self, consumed: ConsumerEvent) -> Result<ChangeEvent, Error> {
        let replay_cursor = ReplayCursor::from_bytes(consumed.replay_id).ok_or_else(|| {
            Error::ProtocolViolation("event without replay id".to_string())
        })?;
        let event = consumed
            .event
            .ok_or_else(|| Error::ProtocolViolation("consumer event without payload".to_string()))?;

        let decoder = self
            .schemas
            .resolve(self.bus.as_ref(), &event.schema_id)
            .await?;
        let record = decoder.decode(&event.payload)?;

        Ok(ChangeEvent {
            tenant_id: self.tenant_id.clone(),
            topic: self.topic.clone(),
            event_id: event.id,
            schema_id: event.schema_id,
            record,
            replay_cursor,
        })
    }

    fn transition(&self, next: State) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(
                tenant_id = %self.tenant_id,
                topic = %self.topic,
                from = %previous,
                state = %next,
                "session state changed"
            );
        }
    }

    fn summary(&self) -> SessionSummary {
        let last_cursor = self.cursor.clone().or_else(|| match &self.start {
            Replay::Custom(cursor) => Some(cursor.clone()),
            _ => None,
        });
        SessionSummary {
            topic: self.topic.clone(),
            delivered: self.delivered,
            reconnects: self.reconnects,
            last_cursor,
        }
    }

    fn close(&self) -> SessionSummary {
        self.transition(State::Closed);
        info!(
            tenant_id = %self.tenant_id,
            topic = %self.topic,
            delivered = self.delivered,
            reconnects = self.reconnects,
            "session closed"
        );
        self.summary()
    }

    fn fail(&self, error: Error) -> SessionError {
        self.transition(State::Closed);
        let kind = error.kind();
        error!(
            tenant_id = %self.tenant_id,
            topic = %self.topic,
            kind = %kind,
            self_heals = kind.self_heals(),
            delivered = self.delivered,
            error = %error,
            "session failed"
        );
        SessionError {
            error,
            summary: self.summary(),
        }
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Checks a request against the subscribe contract of a stream bound to `topic`.
///
/// Only the first request may carry a replay directive, and any topic it names must be the
/// bound one.
pub(crate) fn validate_request(
    topic: &str,
    request: &FetchRequest,
    first: bool,
) -> Result<(), Error> {
    if request.topic_name.is_empty() {
        if first {
            return Err(Error::ProtocolViolation(
                "first request must name the topic".to_string(),
            ));
        }
    } else if request.topic_name != topic {
        return Err(Error::TopicMismatch {
            expected: topic.to_string(),
            found: request.topic_name.clone(),
        });
    }

    let custom = request.replay_preset == ReplayPreset::Custom as i32;
    if first {
        if custom && request.replay_id.is_empty() {
            return Err(Error::ProtocolViolation(
                "custom replay requires a replay id".to_string(),
            ));
        }
    } else if request.replay_preset != ReplayPreset::Latest as i32
        || !request.replay_id.is_empty()
    {
        return Err(Error::ProtocolViolation(
            "only the first request may set a replay directive".to_string(),
        ));
    }

    if request.num_requested <= 0 {
        return Err(Error::ProtocolViolation(format!(
            "num_requested must be positive, got {}",
            request.num_requested
        )));
    }
    Ok(())
}
