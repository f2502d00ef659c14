use apache_avro::types::Value;
use apache_avro::Schema;
use moka::future::Cache;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::{Error, EventBus};

/// Avro decoder for one schema.
#[derive(Debug)]
pub struct Decoder {
    schema_id: String,
    schema: Schema,
}

impl Decoder {
    /// Parses an Avro schema definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] if the JSON is not a valid Avro schema.
    pub fn parse(schema_id: impl Into<String>, schema_json: &str) -> Result<Self, Error> {
        let schema_id = schema_id.into();
        let schema = Schema::parse_str(schema_json).map_err(|e| Error::InvalidSchema {
            schema_id: schema_id.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { schema_id, schema })
    }

    /// ID of the schema.
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// Parsed schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decodes a single Avro datum into a record.
    pub fn decode(&self, payload: &[u8]) -> Result<Value, Error> {
        let mut reader = payload;
        let value =
            apache_avro::from_avro_datum(&self.schema, &mut reader, None).map_err(|e| {
                Error::Decode {
                    schema_id: self.schema_id.clone(),
                    source: Box::new(e),
                }
            })?;

        match value {
            Value::Record(_) => Ok(value),
            _ => Err(Error::UnexpectedPayload {
                schema_id: self.schema_id.clone(),
            }),
        }
    }
}

/// Process-wide cache of schema decoders.
///
/// Schemas are immutable once published, so entries never expire. Concurrent misses for the
/// same ID share one fetch; failed fetches are not cached. Clones share the same entries.
#[derive(Clone)]
pub struct SchemaCache {
    decoders: Cache<String, Arc<Decoder>>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCache")
            .field("entries", &self.decoders.entry_count())
            .finish()
    }
}

impl SchemaCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            decoders: Cache::builder().build(),
        }
    }

    /// Returns true if a decoder for `schema_id` is cached.
    pub fn contains(&self, schema_id: &str) -> bool {
        self.decoders.contains_key(schema_id)
    }

    /// Returns the cached decoder, or runs `fetch` for the schema JSON and caches the result.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSchema`] if the fetched definition does not parse
    /// - [`Error::UnknownSchema`] if `fetch` fails with `NOT_FOUND` or `INVALID_ARGUMENT`
    /// - [`Error::SchemaUnavailable`] if `fetch` fails otherwise
    pub async fn get_or_fetch<F, Fut>(
        &self,
        schema_id: &str,
        fetch: F,
    ) -> Result<Arc<Decoder>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, Error>>,
    {
        let id = schema_id.to_string();
        self.decoders
            .try_get_with(id.clone(), async move {
                let schema_json = fetch().await?;
                Decoder::parse(id, &schema_json).map(Arc::new)
            })
            .await
            .map_err(|error| {
                if let Error::InvalidSchema { schema_id, reason } = error.as_ref() {
                    return Error::InvalidSchema {
                        schema_id: schema_id.clone(),
                        reason: reason.clone(),
                    };
                }
                let unknown = matches!(
                    error.as_ref(),
                    Error::Tonic(status)
                        if matches!(
                            status.code(),
                            tonic::Code::NotFound | tonic::Code::InvalidArgument
                        )
                );
                let schema_id = schema_id.to_string();
                if unknown {
                    Error::UnknownSchema {
                        schema_id,
                        source: error,
                    }
                } else {
                    Error::SchemaUnavailable {
                        schema_id,
                        source: error,
                    }
                }
            })
    }

    /// Resolves a decoder, fetching the schema from `bus` on a miss.
    pub async fn resolve(
        &self,
        bus: &dyn EventBus,
        schema_id: &str,
    ) -> Result<Arc<Decoder>, Error> {
        self.get_or_fetch(schema_id, || async move {
            let info = bus.get_schema(schema_id).await?;
            debug!(schema_id, "fetched schema");
            Ok(info.schema_json)
        })
        .await
    }
}
