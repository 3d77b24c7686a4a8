//! Authenticated request gateway for the portal API
//!
//! Every call to the API goes through [`Gateway::request`], which attaches the
//! bearer token, turns a 403 into [`ClientError::AccessDenied`] and answers a
//! 401 with exactly one refresh-then-retry cycle.

pub mod auth;
pub mod error;
pub mod refresh;
pub mod request;

pub use error::ClientError;
pub use refresh::RefreshCoordinator;
pub use request::{MultipartField, MultipartValue, RequestBody, RequestOptions};

use crate::envelope::Envelope;
use crate::session::events::{SessionEvent, SessionEvents};
use crate::session::store::{MemoryTokenStore, TokenStore};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// User agent sent when none is configured
pub const DEFAULT_USER_AGENT: &str = concat!("portal-console/", env!("CARGO_PKG_VERSION"));

/// Connection details shared by the gateway and the refresh coordinator
#[derive(Debug)]
pub(crate) struct Transport {
    client: Client,
    base_url: String,
    path_prefix: String,
    default_headers: HeaderMap,
}

impl Transport {
    fn url(&self, path: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            self.path_prefix,
            request::normalize_path(path)
        )
    }

    /// Send one request, with no session handling
    pub(crate) async fn send(
        &self,
        path: &str,
        options: &RequestOptions,
        bearer: Option<&str>,
    ) -> Result<Response, ClientError> {
        let url = self.url(path);
        let builder = self.client.request(options.method.clone(), &url);
        let builder = options.apply(builder, &self.default_headers, bearer)?;

        trace!(method = %options.method, %url, authenticated = bearer.is_some(), "Sending request");
        let response = builder.send().await?;
        trace!(%url, status = response.status().as_u16(), "Received response");
        Ok(response)
    }
}

/// Wraps every outbound API call with token attachment and refresh handling
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<Transport>,
    store: Arc<dyn TokenStore>,
    events: SessionEvents,
    refresher: RefreshCoordinator,
}

impl Gateway {
    /// Create a gateway with an in-memory token store
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.transport.base_url
    }

    /// The token store this gateway reads and the coordinator writes
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// The channel session changes are announced on
    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// The refresh coordinator used on 401
    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Issue one API call.
    ///
    /// Public paths (`auth/login`, `auth/refresh`) are sent as-is apart from
    /// the bearer header, which is attached whenever a token is known. For
    /// protected paths a missing token fails before any network traffic, a
    /// 403 becomes [`ClientError::AccessDenied`], and a 401 triggers a single
    /// refresh followed by a single retry whose response is returned
    /// unexamined.
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, ClientError> {
        let path = request::normalize_path(path);
        let public = request::is_public_path(path);
        let token = self.store.access_token();

        if token.is_none() && !public {
            info!(path, "No access token for protected request");
            self.refresher.end_session();
            self.events.emit(SessionEvent::Expired);
            return Err(ClientError::SessionExpired);
        }

        let response = self.transport.send(path, &options, token.as_deref()).await?;
        if public {
            return Ok(response);
        }

        match response.status() {
            StatusCode::FORBIDDEN => {
                warn!(path, "Access denied");
                self.events.emit(SessionEvent::AccessDenied {
                    path: path.to_string(),
                });
                Err(ClientError::AccessDenied)
            }
            StatusCode::UNAUTHORIZED => {
                debug!(path, "Access token rejected, refreshing");
                if !self.refresher.refresh().await {
                    return Err(ClientError::SessionExpired);
                }
                let token = self.store.access_token();
                self.transport.send(path, &options, token.as_deref()).await
            }
            _ => Ok(response),
        }
    }

    /// Send with the current bearer token but without 401/403 handling
    pub(crate) async fn send_unmanaged(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Response, ClientError> {
        let token = self.store.access_token();
        self.transport.send(path, options, token.as_deref()).await
    }

    /// Issue a call and decode its envelope-normalised JSON payload
    pub async fn execute<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ClientError> {
        let response = self.request(path, options).await?;
        Ok(read_envelope(response).await?.decode()?)
    }

    /// `GET` a JSON resource
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(path, RequestOptions::get()).await
    }

    /// Send a JSON body with the given method and decode the reply
    pub async fn send_json<B, T>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(path, RequestOptions::new(method).json(body)?).await
    }

    /// `DELETE` a resource, discarding any reply body
    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let _: Value = self.execute(path, RequestOptions::delete()).await?;
        Ok(())
    }
}

/// Turn a response into an [`Envelope`], mapping non-2xx statuses to errors
pub async fn read_envelope(response: Response) -> Result<Envelope, ClientError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ClientError::from_status(status, &body));
    }
    if body.trim().is_empty() {
        return Ok(Envelope::Raw(Value::Null));
    }

    let value: Value = serde_json::from_str(&body)?;
    Ok(Envelope::normalize(value))
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    base_url: Option<String>,
    path_prefix: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    default_headers: Vec<(String, String)>,
    single_flight: bool,
    store: Option<Arc<dyn TokenStore>>,
    events: Option<SessionEvents>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            path_prefix: None,
            timeout: None,
            user_agent: None,
            default_headers: Vec::new(),
            single_flight: true,
            store: None,
            events: None,
        }
    }
}

impl GatewayBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Prefix inserted between the base URL and every request path
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Header sent with every request unless the caller overrides it
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Collapse concurrent refreshes into one exchange (on by default)
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Token store shared with the session context
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Event channel shared with the session context
    pub fn events(mut self, events: SessionEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the gateway
    pub fn build(self) -> Result<Gateway, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;
        url::Url::parse(&base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base_url {base_url}: {e}")))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        let path_prefix = match self.path_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => format!("/{p}"),
            _ => String::new(),
        };

        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Configuration(format!("invalid header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Configuration(format!("invalid header value: {e}")))?;
            default_headers.insert(name, value);
        }

        let mut client_builder = ClientBuilder::new();
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }
        client_builder =
            client_builder.user_agent(self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));
        let client = client_builder.build()?;

        let transport = Arc::new(Transport {
            client,
            base_url,
            path_prefix,
            default_headers,
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let events = self.events.unwrap_or_default();
        let refresher = RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            events.clone(),
            self.single_flight,
        );

        Ok(Gateway {
            transport,
            store,
            events,
            refresher,
        })
    }
}
