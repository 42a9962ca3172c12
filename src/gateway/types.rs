//! Request and response types for the remote call gateway.
//!
//! Endpoints are addressed by service, method and path so that stage tables
//! and poll configurations stay independent of the concrete base URLs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Duration class of a remote call.
///
/// Both classes resolve through [`TimeoutPolicy`], so they can be tuned
/// independently even when configured to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    Standard,
    Extended,
}

/// Concrete durations for each [`TimeoutClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub standard: Duration,
    pub extended: Duration,
}

impl TimeoutPolicy {
    pub fn duration(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Standard => self.standard,
            TimeoutClass::Extended => self.extended,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            standard: Duration::from_secs(120),
            extended: Duration::from_secs(600),
        }
    }
}

/// Which remote service an endpoint lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Analysis, slide generation, rendering and podcast synthesis.
    Backend,
    /// Figure gallery extraction.
    Gallery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// A named remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub service: Service,
    pub method: Method,
    pub path: String,
}

impl Endpoint {
    pub fn post(service: Service, path: impl Into<String>) -> Self {
        Self {
            service,
            method: Method::Post,
            path: path.into(),
        }
    }

    pub fn get(service: Service, path: impl Into<String>) -> Self {
        Self {
            service,
            method: Method::Get,
            path: path.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self.method {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        write!(f, "{method} {}", self.path.trim_start_matches('/'))
    }
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        bytes: Arc<[u8]>,
    },
}

/// Request payload for a remote call.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Multipart form; repeated names are sent as repeated parts.
    Form(Vec<FormField>),
    /// JSON body.
    Json(serde_json::Value),
    /// URL query parameters (used by read-only checks).
    Query(Vec<(String, String)>),
}

impl Payload {
    /// Start an empty multipart form.
    pub fn form() -> Self {
        Payload::Form(Vec::new())
    }

    /// Append a text field. No-op on non-form payloads.
    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        if let Payload::Form(fields) = &mut self {
            fields.push(FormField::Text {
                name: name.to_string(),
                value: value.into(),
            });
        }
        self
    }

    /// Append a file part. No-op on non-form payloads.
    pub fn file(mut self, name: &str, file_name: &str, bytes: Arc<[u8]>) -> Self {
        if let Payload::Form(fields) = &mut self {
            fields.push(FormField::File {
                name: name.to_string(),
                file_name: file_name.to_string(),
                bytes,
            });
        }
        self
    }

    /// All text values recorded under `name`, in insertion order.
    pub fn text_values(&self, name: &str) -> Vec<&str> {
        match self {
            Payload::Form(fields) => fields
                .iter()
                .filter_map(|f| match f {
                    FormField::Text { name: n, value } if n == name => Some(value.as_str()),
                    _ => None,
                })
                .collect(),
            Payload::Query(pairs) => pairs
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// First text value recorded under `name`.
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.text_values(name).into_iter().next()
    }
}

/// Raw body of a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseBody {
    pub status: u16,
    pub bytes: Vec<u8>,
}

impl ResponseBody {
    pub fn new(status: u16, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            bytes: bytes.into(),
        }
    }

    pub fn json_value(value: &serde_json::Value) -> Self {
        Self::new(200, serde_json::to_vec(value).unwrap_or_default())
    }

    /// True when the body carries no usable result: no bytes, `null` or `""`.
    pub fn is_empty(&self) -> bool {
        let trimmed = String::from_utf8_lossy(&self.bytes);
        let trimmed = trimmed.trim();
        trimmed.is_empty() || trimmed == "null" || trimmed == "\"\""
    }

    /// Parse the body as JSON. Non-JSON bodies become `Value::Null`.
    pub fn value(&self) -> serde_json::Value {
        serde_json::from_slice(&self.bytes).unwrap_or(serde_json::Value::Null)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.bytes)
    }
}
