use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP verb of a request descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request overrides of the client defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    /// Per-attempt timeout; falls back to `ClientOptions::timeout_ms`.
    pub timeout_ms: Option<u64>,
    /// Retry budget; falls back to the client's retry policy.
    pub max_retries: Option<u32>,
    /// Extra headers sent with every attempt.
    pub headers: Vec<(String, String)>,
}

/// Immutable specification of one outbound operation.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    endpoint: String,
    method: Method,
    payload: Option<Value>,
    options: RequestOptions,
}

impl RequestDescriptor {
    /// Creates a descriptor for `method` on `endpoint`.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            payload: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Post, endpoint).with_payload(payload)
    }

    pub fn put(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Put, endpoint).with_payload(payload)
    }

    pub fn patch(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Patch, endpoint).with_payload(payload)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    /// Sets the JSON body. Ignored for `GET` requests.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = Some(max_retries);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.push((name.into(), value.into()));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Body to send, or `None` for bodiless requests.
    pub fn payload(&self) -> Option<&Value> {
        match self.method {
            Method::Get => None,
            _ => self.payload.as_ref(),
        }
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Method, RequestDescriptor};

    #[test]
    fn builders_set_method_and_overrides() {
        let descriptor = RequestDescriptor::put("/notes/1", json!({"title": "t"}))
            .with_timeout_ms(500)
            .with_max_retries(1)
            .with_header("x-trace", "abc");

        assert_eq!(descriptor.method(), Method::Put);
        assert_eq!(descriptor.endpoint(), "/notes/1");
        assert_eq!(descriptor.payload(), Some(&json!({"title": "t"})));
        assert_eq!(descriptor.options().timeout_ms, Some(500));
        assert_eq!(descriptor.options().max_retries, Some(1));
        assert_eq!(descriptor.options().headers.len(), 1);
    }

    #[test]
    fn get_never_carries_a_body() {
        let descriptor = RequestDescriptor::get("/todos").with_payload(json!({"ignored": true}));
        assert_eq!(descriptor.payload(), None);
    }
}
