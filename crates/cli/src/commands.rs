//! Console subcommands

use crate::config::ApiConfig;
use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use portal_console_http::client::{MultipartField, read_envelope};
use portal_console_http::{
    ClientError, Credentials, FileTokenStore, Gateway, RequestOptions, SessionContext,
    SessionEvents, SessionIdentity, TokenStore,
};
use reqwest::Method;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session tokens
    Login {
        /// Account name
        #[arg(short, long)]
        username: String,

        /// Account password
        #[arg(short, long, env = "PORTAL_CONSOLE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the session on the server and forget the stored tokens
    Logout,
    /// Show the identity carried by the stored access token
    Whoami,
    /// Check the stored session with the server, refreshing it if needed
    Validate,
    /// Exchange the refresh token for a new token pair
    Refresh,
    /// Call an API endpoint with the stored session
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the API root, e.g. `api/openvpn/users`
        path: String,

        /// JSON request body
        #[arg(long, conflicts_with_all = ["form", "file"])]
        json: Option<String>,

        /// Form field as key=value; repeatable
        #[arg(long, value_parser = parse_key_value)]
        form: Vec<(String, String)>,

        /// File upload as field=path; repeatable, sends a multipart body
        #[arg(long, value_parser = parse_key_value)]
        file: Vec<(String, String)>,
    },
}

/// A session context wired to the on-disk token store.
///
/// The context follows the gateway's session events for as long as the
/// console lives, so a forced logout during any call shows up in its state.
pub struct Console {
    session: SessionContext,
    listener: JoinHandle<()>,
}

impl Console {
    /// Must be called from within a tokio runtime
    pub fn new(api: &ApiConfig, state_dir: &Path) -> Result<Self> {
        let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::in_dir(state_dir));

        let mut builder = Gateway::builder()
            .base_url(api.base_url.as_str())
            .timeout(api.timeout())
            .single_flight(api.single_flight)
            .store(store)
            .events(SessionEvents::new());
        if let Some(prefix) = &api.path_prefix {
            builder = builder.path_prefix(prefix.as_str());
        }
        if let Some(agent) = &api.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        for (name, value) in &api.default_headers {
            builder = builder.default_header(name.as_str(), value.as_str());
        }

        let gateway = builder.build().context("Invalid API configuration")?;
        debug!(base_url = gateway.base_url(), state_dir = %state_dir.display(), "Console ready");

        let session = SessionContext::new(gateway);
        let listener = {
            let session = session.clone();
            // Subscribe before spawning so no early event is missed
            let events = session.gateway().events().subscribe();
            tokio::spawn(async move { session.follow(events).await })
        };

        Ok(Self { session, listener })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Commands {
    pub async fn execute(self, console: &Console) -> Result<()> {
        let session = console.session();

        match self {
            Commands::Login { username, password } => {
                let credentials = Credentials::new(username, password);
                match session.login(&credentials).await? {
                    Some(identity) => println!("Logged in as {}", describe(&identity)),
                    None => println!("Logged in as {}", credentials.username),
                }
            }
            Commands::Logout => {
                session.logout().await;
                println!("Logged out");
            }
            Commands::Whoami => match session.hydrate() {
                Some(identity) => println!("{}", describe(&identity)),
                None if session.gateway().store().access_token().is_some() => {
                    println!("Stored session is expired or unreadable; run `refresh` or `validate`");
                }
                None => println!("Not logged in"),
            },
            Commands::Validate => {
                session.hydrate();
                if !session.validate().await {
                    return Err(ClientError::SessionExpired.into());
                }
                match session.user() {
                    Some(identity) => println!("Session valid for {}", describe(&identity)),
                    None => println!("Session valid"),
                }
            }
            Commands::Refresh => {
                if !session.refresh().await {
                    return Err(ClientError::SessionExpired.into());
                }
                match session.user() {
                    Some(identity) => println!("Session refreshed for {}", describe(&identity)),
                    None => println!("Session refreshed"),
                }
            }
            Commands::Request {
                method,
                path,
                json,
                form,
                file,
            } => {
                let options = build_request(&method, json.as_deref(), form, &file)?;
                info!(method = %options.method, path = %path, "Sending request");

                let response = session.gateway().request(&path, options).await?;
                let payload = read_envelope(response).await?.into_payload();
                if !payload.is_null() {
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                }
            }
        }

        Ok(())
    }
}

fn describe(identity: &SessionIdentity) -> String {
    let expires = chrono::DateTime::from_timestamp(identity.expires_at, 0)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| identity.expires_at.to_string());

    if identity.role.is_empty() {
        format!("{} (expires {expires})", identity.username)
    } else {
        format!("{} [{}] (expires {expires})", identity.username, identity.role)
    }
}

/// Turn `request` arguments into a request descriptor
fn build_request(
    method: &str,
    json: Option<&str>,
    form: Vec<(String, String)>,
    files: &[(String, String)],
) -> Result<RequestOptions> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {method}"))?;
    let options = RequestOptions::new(method);

    if let Some(json) = json {
        let body: Value = serde_json::from_str(json).context("Request body is not valid JSON")?;
        return Ok(options.json(&body)?);
    }

    if !files.is_empty() {
        let mut fields: Vec<MultipartField> = form
            .into_iter()
            .map(|(name, value)| MultipartField::text(name, value))
            .collect();
        for (name, path) in files {
            fields.push(read_file_field(name, Path::new(path))?);
        }
        return Ok(options.multipart(fields));
    }

    if !form.is_empty() {
        return Ok(options.form(form));
    }

    Ok(options)
}

fn read_file_field(name: &str, path: &Path) -> Result<MultipartField> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(MultipartField::file(name, file_name, bytes))
}

fn parse_key_value(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err(anyhow!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
