//! Response-like value returned by operations.

use serde::de::DeserializeOwned;

use crate::types::ResourceId;

/// Coarse classification of an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 200–299.
    Success,
    /// 400–499: the request is permanently invalid.
    ClientError,
    /// 500–599: transient, worth retrying.
    ServerError,
    /// Anything else (1xx, 3xx, out-of-range).
    Other,
}

impl StatusClass {
    /// Classifies `status`.
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }
}

/// Status, headers, and raw body of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ApiResponse {
    /// Response with no headers and no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Response whose body is `value` encoded as JSON.
    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: value.to_string().into_bytes(),
        }
    }

    /// Stand-in returned when an operation fails before producing a response.
    pub fn synthetic_failure() -> Self {
        Self::empty(500)
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// True for 2xx.
    pub fn ok(&self) -> bool {
        StatusClass::of(self.status) == StatusClass::Success
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True when the response declares a JSON content type.
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|v| v.contains("application/json"))
    }

    /// Raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// `id` field of a JSON object body, when the response declares JSON.
    ///
    /// Numeric ids are accepted and stringified.
    pub fn resource_id(&self) -> Option<ResourceId> {
        if !self.is_json() {
            return None;
        }
        let value: serde_json::Value = self.json().ok()?;
        id_field(&value)
    }
}

/// Non-empty string or numeric `id` field of a JSON object.
pub(crate) fn id_field(value: &serde_json::Value) -> Option<ResourceId> {
    match value.get("id")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(ResourceId::new(s.clone())),
        serde_json::Value::Number(n) => Some(ResourceId::new(n.to_string())),
        _ => None,
    }
}
