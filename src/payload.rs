//! Request payload generation.
//!
//! GET runs cycle through a fixed list of query-parameter sets, picking one
//! per request by `sequence_number % sets.len()`. POST runs materialize a
//! [`PayloadTemplate`] once per request, so generator leaves (random numbers,
//! timestamps) produce a fresh value every time.
//!
//! Templates can be written as JSON. An object with a `"$generator"` key is
//! a generator, any other object is a mapping, arrays are sequences and
//! everything else is a literal:
//!
//! ```json
//! {
//!   "key1": "value1",
//!   "key3": { "$generator": "random_int", "min": 1, "max": 9 },
//!   "tags": ["load", { "$generator": "random_hex", "len": 8 }]
//! }
//! ```

use rand::Rng;
use serde_json::{Map, Value};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading query sets or templates.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read CSV file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Query parameters must be a JSON array of objects")]
    NotAnArrayOfObjects,

    #[error("Query parameter '{0}' must be a string, number or boolean")]
    UnsupportedParamValue(String),

    #[error("CSV file has no headers")]
    NoHeaders,

    #[error("Unknown generator '{0}'")]
    UnknownGenerator(String),

    #[error("Generator '{generator}' is missing field '{field}'")]
    MissingField { generator: String, field: String },

    #[error("Generator 'random_int' has min {min} greater than max {max}")]
    InvalidRange { min: i64, max: i64 },
}

/// Payload attached to one request unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No query string and no body.
    None,

    /// Query-string pairs, sent in order.
    Query(Vec<(String, String)>),

    /// JSON request body.
    Json(Value),
}

/// A value source re-evaluated for every request.
#[derive(Clone)]
pub enum Generator {
    /// Uniform integer in `min..=max`.
    RandomInt { min: i64, max: i64 },

    /// Random lowercase hex string of `len` characters.
    RandomHex { len: usize },

    /// Unix time in milliseconds at generation.
    Timestamp,

    /// The request's sequence number.
    SequenceNumber,

    /// Arbitrary value-producing closure.
    Custom(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Generator {
    pub fn generate(&self, sequence_number: u64) -> Value {
        match self {
            Generator::RandomInt { min, max } => Value::from(rand::thread_rng().gen_range(*min..=*max)),
            Generator::RandomHex { len } => {
                let mut rng = rand::thread_rng();
                let hex: String = (0..*len)
                    .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
                    .collect();
                Value::String(hex)
            }
            Generator::Timestamp => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_millis() as u64);
                Value::from(millis)
            }
            Generator::SequenceNumber => Value::from(sequence_number),
            Generator::Custom(f) => f(),
        }
    }

    fn from_json(fields: &Map<String, Value>) -> Result<Self, TemplateError> {
        let name = fields
            .get(GENERATOR_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default();

        let int_field = |field: &str| {
            fields.get(field)
                .and_then(Value::as_i64)
                .ok_or_else(|| TemplateError::MissingField {
                    generator: name.to_string(),
                    field: field.to_string(),
                })
        };

        match name {
            "random_int" => {
                let min = int_field("min")?;
                let max = int_field("max")?;
                if min > max {
                    return Err(TemplateError::InvalidRange { min, max });
                }
                Ok(Generator::RandomInt { min, max })
            }
            "random_hex" => {
                let len = fields.get("len").and_then(Value::as_u64).unwrap_or(16) as usize;
                Ok(Generator::RandomHex { len })
            }
            "timestamp" => Ok(Generator::Timestamp),
            "sequence_number" => Ok(Generator::SequenceNumber),
            other => Err(TemplateError::UnknownGenerator(other.to_string())),
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generator::RandomInt { min, max } => f
                .debug_struct("RandomInt")
                .field("min", min)
                .field("max", max)
                .finish(),
            Generator::RandomHex { len } => f.debug_struct("RandomHex").field("len", len).finish(),
            Generator::Timestamp => f.write_str("Timestamp"),
            Generator::SequenceNumber => f.write_str("SequenceNumber"),
            Generator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

const GENERATOR_KEY: &str = "$generator";

/// Request body template, materialized recursively once per request.
#[derive(Debug, Clone)]
pub enum PayloadTemplate {
    Literal(Value),
    Generator(Generator),
    Sequence(Vec<PayloadTemplate>),
    Mapping(Vec<(String, PayloadTemplate)>),
}

impl PayloadTemplate {
    /// Parses a template from its JSON form.
    pub fn from_json(value: &Value) -> Result<Self, TemplateError> {
        match value {
            Value::Object(map) if map.contains_key(GENERATOR_KEY) => {
                Ok(PayloadTemplate::Generator(Generator::from_json(map)?))
            }
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(key, v)| Ok((key.clone(), Self::from_json(v)?)))
                    .collect::<Result<Vec<_>, TemplateError>>()?;
                Ok(PayloadTemplate::Mapping(entries))
            }
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PayloadTemplate::Sequence(items))
            }
            literal => Ok(PayloadTemplate::Literal(literal.clone())),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, TemplateError> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_json(&value)
    }

    /// Produces a concrete value; generators are invoked fresh on every call.
    pub fn materialize(&self, sequence_number: u64) -> Value {
        match self {
            PayloadTemplate::Literal(v) => v.clone(),
            PayloadTemplate::Generator(g) => g.generate(sequence_number),
            PayloadTemplate::Sequence(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.materialize(sequence_number))
                    .collect(),
            ),
            PayloadTemplate::Mapping(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, template) in entries {
                    map.insert(key.clone(), template.materialize(sequence_number));
                }
                Value::Object(map)
            }
        }
    }
}

impl Default for PayloadTemplate {
    /// Two static keys and a random digit from 1 to 9.
    fn default() -> Self {
        PayloadTemplate::Mapping(vec![
            ("key1".into(), PayloadTemplate::Literal("value1".into())),
            ("key2".into(), PayloadTemplate::Literal("value2".into())),
            (
                "key3".into(),
                PayloadTemplate::Generator(Generator::RandomInt { min: 1, max: 9 }),
            ),
        ])
    }
}

/// One set of query-string pairs.
pub type QueryParams = Vec<(String, String)>;

/// Query-parameter sets cycled through by sequence number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParamSets {
    sets: Vec<QueryParams>,
}

impl QueryParamSets {
    pub fn new(sets: Vec<QueryParams>) -> Self {
        Self { sets }
    }

    /// Parses a JSON array of flat objects, e.g. `[{"page": "1"}, {"page": 2}]`.
    pub fn from_json_str(s: &str) -> Result<Self, TemplateError> {
        let value: Value = serde_json::from_str(s)?;
        let Value::Array(items) = value else {
            return Err(TemplateError::NotAnArrayOfObjects);
        };

        let mut sets = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(map) = item else {
                return Err(TemplateError::NotAnArrayOfObjects);
            };
            let mut params = Vec::with_capacity(map.len());
            for (key, v) in map {
                let text = match v {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(TemplateError::UnsupportedParamValue(key)),
                };
                params.push((key, text));
            }
            sets.push(params);
        }

        Ok(Self { sets })
    }

    /// Loads a CSV file with a header row; every data row becomes one set.
    pub fn from_csv_file<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        let path_ref = path.as_ref();
        info!(path = ?path_ref, "Loading query parameter CSV file");

        let file = File::open(path_ref)?;
        let mut reader = csv::Reader::from_reader(file);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();
        if headers.is_empty() {
            return Err(TemplateError::NoHeaders);
        }

        let mut sets = Vec::new();
        for record in reader.records() {
            let record = record?;
            let params = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect();
            sets.push(params);
        }

        debug!(headers = ?headers, rows = sets.len(), "Query parameter sets loaded");
        Ok(Self { sets })
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Query pairs for a sequence number; no sets means no query string.
    pub fn select(&self, sequence_number: u64) -> Payload {
        if self.sets.is_empty() {
            return Payload::None;
        }
        let index = (sequence_number % self.sets.len() as u64) as usize;
        Payload::Query(self.sets[index].clone())
    }

    /// The three sample sets used when none are configured.
    pub fn sample() -> Self {
        let set = |a: &str, b: &str| vec![("param1".to_string(), a.to_string()), ("param2".to_string(), b.to_string())];
        Self::new(vec![
            set("value1", "valueA"),
            set("value2", "valueB"),
            set("value3", "valueC"),
        ])
    }
}

/// Produces one payload per dispatched request.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    Query(QueryParamSets),
    Body(PayloadTemplate),
}

impl PayloadSource {
    pub fn generate(&self, sequence_number: u64) -> Payload {
        match self {
            PayloadSource::Query(sets) => sets.select(sequence_number),
            PayloadSource::Body(template) => Payload::Json(template.materialize(sequence_number)),
        }
    }
}
