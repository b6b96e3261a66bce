//! Request descriptors.
//!
//! A [`RequestDescriptor`] is the logical request a caller hands to the
//! gateway: method, path, query parameters, JSON body, extra headers and
//! whether the route is public. Parameters live in a sorted map, so the
//! [canonical key](RequestDescriptor::canonical_key) used for deduplication
//! does not depend on the order they were added in.

use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use serde_json::Value;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
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

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
        }
    }
}

/// A query parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Text value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! param_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ParamValue {
            fn from(value: $ty) -> Self {
                Self::Int(i64::from(value))
            }
        })*
    };
}

param_from_int!(i8, i16, i32, i64, u8, u16, u32);

/// A logical request submitted to the [`Gateway`](crate::Gateway).
///
/// # Example
///
/// ```
/// use dashboard_client_gateway::RequestDescriptor;
///
/// let request = RequestDescriptor::get("/contacts").param("page", 1).param("q", "ada");
/// assert_eq!(request.canonical_key(), r#"GET:/contacts:{"page":1,"q":"ada"}"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    params: BTreeMap<String, ParamValue>,
    body: Option<Value>,
    headers: BTreeMap<String, String>,
    public: bool,
}

impl RequestDescriptor {
    /// Creates a descriptor with no params, body or headers.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
            public: false,
        }
    }

    /// A `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// A `POST` request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// A `PUT` request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// A `PATCH` request.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    /// A `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Adds (or replaces) a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be represented as JSON.
    pub fn json_from<B: Serialize>(self, body: &B) -> Result<Self, serde_json::Error> {
        Ok(self.json(serde_json::to_value(body)?))
    }

    /// Adds an extra header. Names are case-insensitive; `content-type`,
    /// `accept` and `authorization` are always overridden by the gateway.
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Marks the route as reachable without a session.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Caller path, before prefix mapping.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters, sorted by name.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// JSON body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Extra headers with lower-cased names.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Whether the caller marked the route public.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.public
    }

    /// Deduplication key: `METHOD:path:params`, where params is the JSON
    /// object of the parameters in key order, or empty when there are none.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let params = if self.params.is_empty() {
            String::new()
        } else {
            // A map of strings to scalars always serializes.
            serde_json::to_string(&self.params).unwrap_or_default()
        };
        format!("{}:{}:{params}", self.method, self.path)
    }

    /// URL-encoded query string (without `?`), parameters in key order.
    #[must_use]
    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(&value.to_string())
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}
