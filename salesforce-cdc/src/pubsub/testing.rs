//! In-memory fakes for the event bus, connector and credential provider.

use apache_avro::types::{Record, Value};
use apache_avro::Schema;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Status};
use url::Url;

use super::{
    Auth, ChangeEvent, Connector, ConsumerEvent, Error, EventBus, EventSink, FetchRequest,
    FetchResponse, FetchStream, ProducerEvent, SchemaInfo, SinkError, TopicInfo,
};
use crate::client::{self, CodeExchange, CredentialProvider, TokenGrant, UserInfo};

pub(crate) const ACCOUNT_SCHEMA_ID: &str = "8UIGgKIzJkMiYs5BRF1TsQ";

pub(crate) const ACCOUNT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "AccountChangeEvent",
    "namespace": "com.sforce.eventbus",
    "fields": [
        {"name": "Name", "type": ["null", "string"], "default": null},
        {"name": "Sequence", "type": "long"}
    ]
}"#;

pub(crate) const INSTANCE_URL: &str = "https://mydomain.my.salesforce.com";

/// Avro payload of an account change with the given sequence number.
pub(crate) fn account_payload(sequence: u64) -> Vec<u8> {
    let schema = Schema::parse_str(ACCOUNT_SCHEMA).unwrap();
    let mut record = Record::new(&schema).unwrap();
    record.put(
        "Name",
        Value::Union(1, Box::new(Value::String(format!("Account {sequence}")))),
    );
    record.put("Sequence", Value::Long(sequence as i64));
    apache_avro::to_avro_datum(&schema, record).unwrap()
}

/// Replay ID used by [`event`] for the given sequence number.
pub(crate) fn replay_id(sequence: u64) -> Vec<u8> {
    sequence.to_be_bytes().to_vec()
}

pub(crate) fn event_with_payload(sequence: u64, payload: Vec<u8>) -> ConsumerEvent {
    ConsumerEvent {
        event: Some(ProducerEvent {
            id: format!("evt-{sequence}"),
            schema_id: ACCOUNT_SCHEMA_ID.to_string(),
            payload,
            headers: Vec::new(),
        }),
        replay_id: replay_id(sequence),
    }
}

pub(crate) fn event(sequence: u64) -> ConsumerEvent {
    event_with_payload(sequence, account_payload(sequence))
}

pub(crate) fn events(sequences: std::ops::RangeInclusive<u64>) -> Vec<ConsumerEvent> {
    sequences.map(event).collect()
}

/// Sequence number of a delivered account event.
pub(crate) fn sequence(event: &ChangeEvent) -> i64 {
    match event.field("Sequence") {
        Some(Value::Long(sequence)) => *sequence,
        other => panic!("unexpected Sequence field: {other:?}"),
    }
}

/// Server behavior for one subscribe call.
pub(crate) enum Script {
    /// Fail the call itself.
    Reject(Code),
    /// Serve `events` as credit allows, then finish as `end` says.
    Serve { events: Vec<ConsumerEvent>, end: End },
}

pub(crate) enum End {
    /// End the response stream.
    Eof,
    /// End the response stream with an error status.
    Fail(Code),
    /// Keep the stream open until the client half-closes.
    UntilHalfClose,
    /// Wait for the client to half-close, then send these events as credit allows and end.
    FlushOnHalfClose(Vec<ConsumerEvent>),
    /// Keep the stream open forever.
    Stall,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedStream {
    pub(crate) topic: String,
    pub(crate) requests: Vec<FetchRequest>,
}

/// Scripted in-memory event bus.
///
/// A subscribe call without a remaining script for its topic is rejected with
/// `FAILED_PRECONDITION`.
pub(crate) struct FakeBus {
    topics: Mutex<HashMap<String, TopicInfo>>,
    schemas: Mutex<HashMap<String, String>>,
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    schema_failures: AtomicUsize,
    schema_fetches: AtomicUsize,
    stall_topic_lookups: AtomicBool,
    topic_lookups: AtomicUsize,
    streams: Arc<Mutex<Vec<RecordedStream>>>,
    recorders: Mutex<Vec<JoinHandle<()>>>,
}

impl FakeBus {
    /// Creates a bus that knows the account schema and no topics.
    pub(crate) fn new() -> Self {
        let schemas = HashMap::from([(
            ACCOUNT_SCHEMA_ID.to_string(),
            ACCOUNT_SCHEMA.to_string(),
        )]);
        Self {
            topics: Mutex::new(HashMap::new()),
            schemas: Mutex::new(schemas),
            scripts: Mutex::new(HashMap::new()),
            schema_failures: AtomicUsize::new(0),
            schema_fetches: AtomicUsize::new(0),
            stall_topic_lookups: AtomicBool::new(false),
            topic_lookups: AtomicUsize::new(0),
            streams: Arc::new(Mutex::new(Vec::new())),
            recorders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_topic(&self, topic: &str) {
        self.insert_topic(topic, true);
    }

    pub(crate) fn add_restricted_topic(&self, topic: &str) {
        self.insert_topic(topic, false);
    }

    fn insert_topic(&self, topic: &str, can_subscribe: bool) {
        self.topics.lock().unwrap().insert(
            topic.to_string(),
            TopicInfo {
                topic_name: topic.to_string(),
                tenant_guid: "00Dxx0000001gPL".to_string(),
                can_publish: false,
                can_subscribe,
                schema_id: ACCOUNT_SCHEMA_ID.to_string(),
                rpc_id: "fake-rpc".to_string(),
            },
        );
    }

    /// Queues the behavior of the next subscribe call for `topic`.
    pub(crate) fn script(&self, topic: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_back(script);
    }

    /// Makes the next `count` schema fetches fail with `UNAVAILABLE`.
    pub(crate) fn fail_schema_fetches(&self, count: usize) {
        self.schema_failures.store(count, Ordering::SeqCst);
    }

    /// Makes every later topic lookup hang.
    pub(crate) fn stall_topic_lookups(&self) {
        self.stall_topic_lookups.store(true, Ordering::SeqCst);
    }

    pub(crate) fn topic_lookups(&self) -> usize {
        self.topic_lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn schema_fetches(&self) -> usize {
        self.schema_fetches.load(Ordering::SeqCst)
    }

    /// Waits until every stream's request side has been closed by the client and recorded.
    pub(crate) async fn settle(&self) {
        let recorders: Vec<JoinHandle<()>> = self.recorders.lock().unwrap().drain(..).collect();
        for recorder in recorders {
            recorder.await.unwrap();
        }
    }

    pub(crate) fn streams(&self) -> Vec<RecordedStream> {
        self.streams.lock().unwrap().clone()
    }

    pub(crate) fn streams_for(&self, topic: &str) -> Vec<RecordedStream> {
        self.streams()
            .into_iter()
            .filter(|stream| stream.topic == topic)
            .collect()
    }
}

#[async_trait]
impl EventBus for FakeBus {
    async fn get_topic(&self, topic_name: &str) -> Result<TopicInfo, Error> {
        self.topic_lookups.fetch_add(1, Ordering::SeqCst);
        if self.stall_topic_lookups.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.topics
            .lock()
            .unwrap()
            .get(topic_name)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(topic_name.to_string()))
    }

    async fn get_schema(&self, schema_id: &str) -> Result<SchemaInfo, Error> {
        self.schema_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let fail = self
            .schema_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Tonic(Box::new(Status::unavailable(
                "schema service unavailable",
            ))));
        }

        let schema_json = self.schemas.lock().unwrap().get(schema_id).cloned();
        match schema_json {
            Some(schema_json) => Ok(SchemaInfo {
                schema_json,
                schema_id: schema_id.to_string(),
                rpc_id: "fake-rpc".to_string(),
            }),
            None => Err(Error::Tonic(Box::new(Status::not_found("unknown schema")))),
        }
    }

    async fn subscribe(
        &self,
        mut requests: mpsc::Receiver<FetchRequest>,
    ) -> Result<FetchStream, Error> {
        let first = requests.recv().await.ok_or(Error::StreamClosed)?;
        let topic = first.topic_name.clone();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&topic)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Script::Reject(Code::FailedPrecondition));

        let index = {
            let mut streams = self.streams.lock().unwrap();
            streams.push(RecordedStream {
                topic,
                requests: vec![first.clone()],
            });
            streams.len() - 1
        };

        // Records every request until the client half-closes, forwarding them to the server.
        let (forward, forwarded) = mpsc::unbounded_channel();
        let streams = self.streams.clone();
        let recorder = tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                streams.lock().unwrap()[index].requests.push(request.clone());
                let _ = forward.send(request);
            }
        });
        self.recorders.lock().unwrap().push(recorder);

        match script {
            Script::Reject(code) => Err(Error::Tonic(Box::new(Status::new(code, "rejected")))),
            Script::Serve { events, end } => {
                let (responses, stream) = mpsc::channel(16);
                tokio::spawn(serve(first.num_requested, events, end, forwarded, responses));
                Ok(Box::pin(ReceiverStream::new(stream)))
            }
        }
    }
}

async fn serve(
    mut credit: i32,
    events: Vec<ConsumerEvent>,
    end: End,
    mut requests: mpsc::UnboundedReceiver<FetchRequest>,
    responses: mpsc::Sender<Result<FetchResponse, Status>>,
) {
    let mut pending: VecDeque<ConsumerEvent> = events.into();
    let mut half_closed = false;

    while !pending.is_empty() {
        if credit <= 0 {
            match requests.recv().await {
                Some(request) => credit += request.num_requested,
                None => {
                    half_closed = true;
                    break;
                }
            }
            continue;
        }

        let count = (credit as usize).min(pending.len());
        let batch: Vec<ConsumerEvent> = pending.drain(..count).collect();
        credit -= count as i32;
        let latest_replay_id = batch
            .last()
            .map(|event| event.replay_id.clone())
            .unwrap_or_default();
        let response = FetchResponse {
            events: batch,
            latest_replay_id,
            rpc_id: "fake-rpc".to_string(),
            pending_num_requested: credit,
        };
        if responses.send(Ok(response)).await.is_err() {
            return;
        }
        while let Ok(request) = requests.try_recv() {
            credit += request.num_requested;
        }
    }

    match end {
        End::Eof => {}
        End::Fail(code) => {
            let _ = responses.send(Err(Status::new(code, "stream failed"))).await;
        }
        End::UntilHalfClose => {
            if !half_closed {
                while requests.recv().await.is_some() {}
            }
        }
        End::FlushOnHalfClose(buffered) => {
            if !half_closed {
                while let Some(request) = requests.recv().await {
                    credit += request.num_requested;
                }
            }
            let count = (credit.max(0) as usize).min(buffered.len());
            let batch: Vec<ConsumerEvent> = buffered.into_iter().take(count).collect();
            let response = FetchResponse {
                latest_replay_id: batch
                    .last()
                    .map(|event| event.replay_id.clone())
                    .unwrap_or_default(),
                events: batch,
                rpc_id: "fake-rpc".to_string(),
                pending_num_requested: credit - count as i32,
            };
            let _ = responses.send(Ok(response)).await;
        }
        End::Stall => {
            std::future::pending::<()>().await;
        }
    }
}

/// Connector that hands every tenant the same bus and records the credentials it saw.
pub(crate) struct FakeConnector {
    bus: Arc<FakeBus>,
    auths: Mutex<Vec<Auth>>,
}

impl FakeConnector {
    pub(crate) fn new(bus: Arc<FakeBus>) -> Self {
        Self {
            bus,
            auths: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn auths(&self) -> Vec<Auth> {
        self.auths.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, auth: &Auth) -> Result<Arc<dyn EventBus>, Error> {
        self.auths.lock().unwrap().push(auth.clone());
        let bus: Arc<dyn EventBus> = self.bus.clone();
        Ok(bus)
    }
}

/// Credential provider with scripted codes and refresh failures.
#[derive(Default)]
pub(crate) struct FakeProvider {
    refreshes: AtomicUsize,
    rejected_refresh_tokens: Mutex<HashSet<String>>,
    // code -> (client_id, organization_id)
    codes: Mutex<HashMap<String, (String, String)>>,
    // access token -> organization_id
    orgs: Mutex<HashMap<String, String>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reject_refresh_token(&self, refresh_token: &str) {
        self.rejected_refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh_token.to_string());
    }

    /// Accepts `code` for the connected app `client_id`, linking to `organization_id`.
    pub(crate) fn accept_code(&self, code: &str, client_id: &str, organization_id: &str) {
        self.codes.lock().unwrap().insert(
            code.to_string(),
            (client_id.to_string(), organization_id.to_string()),
        );
    }

    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

fn rejected(message: &str) -> client::Error {
    client::Error::TokenExchange(Box::new(std::io::Error::other(message.to_string())))
}

#[async_trait]
impl CredentialProvider for FakeProvider {
    fn authorize_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<Url, client::Error> {
        let mut url = Url::parse("https://login.salesforce.com/services/oauth2/authorize")
            .map_err(|e| client::Error::ParseUrl { source: e })?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("code_verifier", code_verifier);
        Ok(url)
    }

    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenGrant, client::Error> {
        let accepted = self.codes.lock().unwrap().get(&request.code).cloned();
        match accepted {
            Some((client_id, organization_id)) if client_id == request.client_id => {
                let access_token = format!("access-{}", request.code);
                self.orgs
                    .lock()
                    .unwrap()
                    .insert(access_token.clone(), organization_id);
                Ok(TokenGrant {
                    access_token,
                    refresh_token: Some(format!("refresh-{}", request.code)),
                    instance_url: Some(INSTANCE_URL.to_string()),
                })
            }
            _ => Err(rejected("invalid_grant")),
        }
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        _client_id: &str,
        _client_secret: &str,
    ) -> Result<TokenGrant, client::Error> {
        if self
            .rejected_refresh_tokens
            .lock()
            .unwrap()
            .contains(refresh_token)
        {
            return Err(rejected("expired refresh token"));
        }
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenGrant {
            access_token: format!("fresh-{refresh_token}-{count}"),
            refresh_token: None,
            instance_url: Some(INSTANCE_URL.to_string()),
        })
    }

    async fn user_info(
        &self,
        _instance_url: &str,
        access_token: &str,
    ) -> Result<UserInfo, client::Error> {
        let organization_id = self
            .orgs
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or_else(|| rejected("unknown access token"))?;
        Ok(UserInfo {
            organization_id,
            user_id: None,
        })
    }
}

/// Sink that rejects every event.
pub(crate) struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn on_event(&self, _event: ChangeEvent) -> Result<(), SinkError> {
        Err("checkpoint store offline".into())
    }
}
