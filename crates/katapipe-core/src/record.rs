//! JSON-backed records flowing through the pipeline.
//!
//! Queries, requests and responses are open JSON objects: the engine and the
//! downstream consumer both accept fields this crate knows nothing about, so
//! records keep their full field map and expose typed accessors only for the
//! handful of keys the pipeline itself interprets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An open JSON object, the shape of every query, request and response.
pub type Fields = Map<String, Value>;

/// Common accessors shared by requests and responses.
pub trait Record {
    fn fields(&self) -> &Fields;
    fn fields_mut(&mut self) -> &mut Fields;

    fn get(&self, key: &str) -> Option<&Value> {
        self.fields().get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.fields_mut().insert(key.to_string(), value);
    }

    /// The user-query id. Compared as a raw JSON value so numeric and string
    /// ids both work.
    fn id(&self) -> Option<&Value> {
        self.get("id")
    }

    fn turn_number(&self) -> Option<i64> {
        self.get("turnNumber").and_then(Value::as_i64)
    }
}

/// Single-turn unit of work derived from a user query, keyed by
/// `(id, turnNumber)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Request {
    pub fields: Fields,
}

impl Request {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// The turn numbers the originating query asked for. Every request
    /// carries these; the Joiner uses the last element to detect completion.
    pub fn analyze_turns(&self) -> Vec<i64> {
        self.get("analyzeTurns")
            .and_then(Value::as_array)
            .map(|turns| turns.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default()
    }
}

impl Record for Request {
    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }
}

/// One record emitted by the engine, in arbitrary order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response {
    pub fields: Fields,
}

impl Response {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

impl Record for Response {
    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }
}

/// A matched (request, response) tuple produced by the Sorter.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub request: Request,
    pub response: Response,
}

impl Pair {
    pub fn new(request: Request, response: Response) -> Self {
        Self { request, response }
    }
}

/// Equality on the given keys. A key missing on both sides compares equal,
/// matching the behaviour of comparing optional lookups.
pub fn same_by(keys: &'static [&'static str]) -> impl Fn(&Fields, &Fields) -> bool {
    move |a, b| keys.iter().all(|k| a.get(*k) == b.get(*k))
}

/// JSON truthiness: null, false, zero, empty strings and empty containers
/// are all falsey.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Shallow merge, right-most part winning on key collisions.
pub fn merge_fields(parts: &[&Fields]) -> Fields {
    let mut merged = Fields::new();
    for part in parts {
        for (key, value) in part.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
