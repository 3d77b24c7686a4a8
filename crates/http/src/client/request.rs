//! Outbound request descriptors

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, multipart};
use serde::Serialize;
use serde_json::Value;

use super::ClientError;

/// Login endpoint, relative to the API root
pub const LOGIN_PATH: &str = "auth/login";
/// Refresh endpoint, relative to the API root
pub const REFRESH_PATH: &str = "auth/refresh";
/// Logout endpoint, relative to the API root
pub const LOGOUT_PATH: &str = "auth/logout";
/// Token validation endpoint, relative to the API root
pub const VALIDATE_PATH: &str = "auth/validate";

/// Endpoints that never trigger token refresh
const PUBLIC_PATHS: [&str; 2] = [LOGIN_PATH, REFRESH_PATH];

/// Whether `path` is reachable without a session
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&normalize_path(path))
}

/// Strip the leading slash so `/auth/login` and `auth/login` compare equal
pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// One part of a multipart form
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
}

#[derive(Debug, Clone)]
pub enum MultipartValue {
    Text(String),
    File {
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::Text(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::File {
                file_name: file_name.into(),
                mime: None,
                bytes,
            },
        }
    }

    /// Set the part's content type; only meaningful for file parts
    pub fn with_mime(mut self, content_type: impl Into<String>) -> Self {
        if let MultipartValue::File { mime, .. } = &mut self.value {
            *mime = Some(content_type.into());
        }
        self
    }

    fn to_part(&self) -> Result<multipart::Part, ClientError> {
        match &self.value {
            MultipartValue::Text(text) => Ok(multipart::Part::text(text.clone())),
            MultipartValue::File {
                file_name,
                mime,
                bytes,
            } => {
                let part = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                match mime {
                    Some(mime) => part.mime_str(mime).map_err(ClientError::Request),
                    None => Ok(part),
                }
            }
        }
    }
}

/// Request body variants the gateway knows how to resend
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(_))
    }

    /// Bodies whose content type reqwest writes itself
    fn sets_own_content_type(&self) -> bool {
        matches!(self, Self::Form(_) | Self::Multipart(_))
    }
}

/// Everything needed to (re)issue one API call
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Add a header, replacing any earlier value
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Text(body.into());
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    /// Whether the gateway should default the content type to JSON
    fn wants_json_content_type(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
            && !self.body.sets_own_content_type()
            && !self.headers.contains_key(CONTENT_TYPE)
    }

    /// Apply headers, bearer token and body to a fresh builder.
    ///
    /// The caller's headers are applied after `defaults`, so they win, and the
    /// bearer token wins over both. Form and multipart bodies drop any
    /// caller-supplied content type: reqwest writes its own, including the
    /// multipart boundary.
    pub(crate) fn apply(
        &self,
        mut builder: RequestBuilder,
        defaults: &HeaderMap,
        bearer: Option<&str>,
    ) -> Result<RequestBuilder, ClientError> {
        let mut headers = defaults.clone();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(token) = bearer {
            // A token that cannot travel as a header is as good as none.
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::SessionExpired)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if self.body.sets_own_content_type() {
            headers.remove(CONTENT_TYPE);
        } else if self.wants_json_content_type() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        builder = builder.headers(headers);

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(serde_json::to_vec(value)?),
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::Form(pairs) => builder.form(pairs),
            RequestBody::Multipart(fields) => {
                let mut form = multipart::Form::new();
                for field in fields {
                    form = form.part(field.name.clone(), field.to_part()?);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}
