//! Session-cookie HTTP client.
//!
//! `SessionClient` performs the form login / logout flow against the chat
//! backend and normalizes every failure into a [`SessionError`]. Transport
//! errors are never surfaced raw: a request that produced no response is a
//! timeout, a 401 is an expired session, and anything else carries the
//! server's JSON payload.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::retry::{retry_async, RetryPolicy};

/// Message attached to every [`SessionError::Timeout`].
pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again later.";
/// HTTP-only session identifier cookie set by the backend.
pub const SESSION_COOKIE: &str = "JSESSIONID";
/// Readable anti-forgery cookie used as the local "logged in before" signal.
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";
/// Header echoing [`XSRF_COOKIE`] on state-changing requests.
pub const XSRF_HEADER: &str = "X-XSRF-TOKEN";
/// Login code the backend returns on success.
pub const LOGIN_SUCCESS_CODE: &str = "success";

const LOGIN_PATH: &str = "/login";
const LOGOUT_PATH: &str = "/logout";
const WHOAMI_PATH: &str = "/whoami";
const EXPIRED_COOKIE_ATTRS: &str = "Expires=Thu, 01 Jan 1970 00:00:01 GMT; Path=/";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionDefaults;

impl SessionDefaults {
    pub const BASE_URL: &'static str = "http://localhost:8080";
    pub const BASE_URL_ENV: &'static str = "CHAT_API_URL";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

#[derive(Clone, Debug)]
pub struct SessionClientOptions {
    pub base_url: String,
    /// Whole-request deadline; expiry is reported as a timeout.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Attach the client's cookie jar to every request.
    pub with_credentials: bool,
    /// Existing jar to resume a prior session from. A fresh jar is created
    /// when unset.
    pub cookie_jar: Option<Arc<Jar>>,
    /// Applied to idempotent reads only. Login and logout are never retried.
    pub retry_policy: RetryPolicy,
}

impl Default for SessionClientOptions {
    fn default() -> Self {
        Self {
            base_url: SessionDefaults::BASE_URL.to_string(),
            request_timeout: SessionDefaults::REQUEST_TIMEOUT,
            connect_timeout: SessionDefaults::CONNECT_TIMEOUT,
            with_credentials: true,
            cookie_jar: None,
            retry_policy: RetryPolicy::none(),
        }
    }
}

impl SessionClientOptions {
    /// Defaults with the base URL taken from `CHAT_API_URL` when set.
    pub fn from_env() -> Self {
        Self::default().with_env_base_url(std::env::var(SessionDefaults::BASE_URL_ENV).ok())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    /// Shares `jar` with the client. Ignored when credentials are disabled.
    pub fn with_cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn with_env_base_url(self, value: Option<String>) -> Self {
        match value.map(|v| v.trim().to_string()) {
            Some(base_url) if !base_url.is_empty() => self.with_base_url(base_url),
            _ => self,
        }
    }
}

/// How the caller negotiated the response body.
///
/// `Blob` responses are raw bytes on success; on failure the bytes are
/// decoded as UTF-8 JSON before being reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResponseType {
    #[default]
    Json,
    Blob,
}

/// Locally visible authentication state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub authenticated: bool,
    pub message: String,
}

/// Envelope returned by the login endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoginResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LoginResponse {
    pub fn is_success(&self) -> bool {
        self.code == LOGIN_SUCCESS_CODE
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionErrorKind {
    Timeout,
    Unauthorized,
    Application,
    Decode,
    Configuration,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// No response was received (network failure or timeout).
    #[error("{message}")]
    Timeout { message: String },

    /// The server answered 401. Session state is left untouched.
    #[error("unauthorized")]
    Unauthorized { payload: Option<Value> },

    /// Any other non-2xx status with the server-supplied payload.
    #[error("http status {status}: {payload}")]
    Application { status: StatusCode, payload: Value },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid base url {0:?}")]
    InvalidBaseUrl(String),

    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
}

impl SessionError {
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            Self::Timeout { .. } => SessionErrorKind::Timeout,
            Self::Unauthorized { .. } => SessionErrorKind::Unauthorized,
            Self::Application { .. } => SessionErrorKind::Application,
            Self::Decode(_) => SessionErrorKind::Decode,
            Self::InvalidBaseUrl(_) | Self::Build(_) => SessionErrorKind::Configuration,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn timeout() -> Self {
        Self::Timeout {
            message: TIMEOUT_MESSAGE.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SessionClient {
    http: Client,
    base_url: Url,
    jar: Option<Arc<Jar>>,
    session: Arc<RwLock<Session>>,
    retry_policy: RetryPolicy,
}

impl SessionClient {
    /// Client for the default local backend with credentials enabled.
    pub fn new() -> Result<Self, SessionError> {
        Self::with_options(SessionClientOptions::default())
    }

    pub fn with_options(options: SessionClientOptions) -> Result<Self, SessionError> {
        let base_url = Url::parse(options.base_url.trim_end_matches('/'))
            .map_err(|err| SessionError::InvalidBaseUrl(format!("{}: {err}", options.base_url)))?;

        let mut builder = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout);

        let jar = options
            .with_credentials
            .then(|| options.cookie_jar.clone().unwrap_or_default());
        if let Some(jar) = jar.as_ref() {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        let http = builder.build().map_err(SessionError::Build)?;

        let client = Self {
            http,
            base_url,
            jar,
            session: Arc::new(RwLock::new(Session::default())),
            retry_policy: options.retry_policy,
        };
        client.restore_session();
        Ok(client)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The jar backing this client, for handing to a later client.
    pub fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.jar.clone()
    }

    /// Snapshot of the current session state.
    pub fn session(&self) -> Session {
        self.session
            .read()
            .map(|session| session.clone())
            .unwrap_or_default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().authenticated
    }

    /// Re-derives `authenticated` from the anti-forgery cookie.
    ///
    /// The session cookie is HTTP-only on the server side, so the readable
    /// `XSRF-TOKEN` stands in for "a prior login exists". Runs at
    /// construction, which resumes a session held in a jar passed through
    /// [`SessionClientOptions::with_cookie_jar`]. Returns the new value.
    pub fn restore_session(&self) -> bool {
        let authenticated = self.xsrf_token().is_some();
        if authenticated {
            debug!(event = "session_restored_from_cookie");
        }
        self.update_session(|session| session.authenticated = authenticated);
        authenticated
    }

    /// Current `Cookie` header value for the base URL, if any cookies are held.
    ///
    /// Hand this to the realtime channel so the handshake carries the same
    /// credential cookie.
    pub fn cookie_header(&self) -> Option<String> {
        let jar = self.jar.as_ref()?;
        let header = jar.cookies(&self.base_url)?;
        header.to_str().ok().map(str::to_string)
    }

    /// Submits form credentials and records the outcome in the session.
    ///
    /// A 2xx response always updates the session: `authenticated` becomes
    /// `code == "success"` and `message` is stored verbatim. Failures leave
    /// the session untouched.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, SessionError> {
        let form = [
            ("username", username),
            ("password", password.expose_secret().as_str()),
        ];
        let request = self.http.post(self.endpoint(LOGIN_PATH)).form(&form);
        let body = self.execute(request, ResponseType::Json).await?;
        let response: LoginResponse = parse_json(&body)?;

        debug!(
            event = "login_completed",
            username,
            code = %response.code
        );
        self.update_session(|session| {
            session.authenticated = response.is_success();
            session.message = response.message.clone();
        });
        Ok(response)
    }

    /// Ends the server session, then clears local credentials.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let request = self.with_xsrf(self.http.post(self.endpoint(LOGOUT_PATH)));
        self.execute(request, ResponseType::Json).await?;

        self.expire_cookies();
        self.update_session(|session| session.authenticated = false);
        debug!(event = "logout_completed");
        Ok(())
    }

    /// Name of the authenticated principal.
    pub async fn whoami(&self) -> Result<String, SessionError> {
        let endpoint = self.endpoint(WHOAMI_PATH);
        let body = self
            .get_with_retry(&endpoint, ResponseType::Json)
            .await?;
        String::from_utf8(body).map_err(|err| SessionError::Decode(err.to_string()))
    }

    /// Fetches raw bytes from `path`. Error bodies are decoded from binary.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>, SessionError> {
        let endpoint = self.endpoint(path);
        self.get_with_retry(&endpoint, ResponseType::Blob).await
    }

    async fn get_with_retry(
        &self,
        endpoint: &str,
        response_type: ResponseType,
    ) -> Result<Vec<u8>, SessionError> {
        retry_async(
            &self.retry_policy,
            |_| {
                let mut request = self.http.get(endpoint);
                if response_type == ResponseType::Blob {
                    request = request.header(ACCEPT, HeaderValue::from_static("*/*"));
                }
                self.execute(request, response_type)
            },
            SessionError::is_retryable,
        )
        .await
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        response_type: ResponseType,
    ) -> Result<Vec<u8>, SessionError> {
        let response = request.send().await.map_err(|err| {
            warn!(event = "http_no_response", error = %err);
            SessionError::timeout()
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            warn!(event = "http_body_incomplete", %status, error = %err);
            SessionError::timeout()
        })?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        debug!(event = "http_error_status", %status, body_len = body.len());
        Err(classify_failure(status, &body, response_type))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn with_xsrf(&self, request: RequestBuilder) -> RequestBuilder {
        match self.xsrf_token() {
            Some(token) => request.header(XSRF_HEADER, token),
            None => request,
        }
    }

    fn xsrf_token(&self) -> Option<String> {
        find_cookie(&self.cookie_header()?, XSRF_COOKIE)
    }

    fn expire_cookies(&self) {
        let Some(jar) = self.jar.as_ref() else {
            return;
        };
        for name in [SESSION_COOKIE, XSRF_COOKIE] {
            jar.add_cookie_str(&format!("{name}=; {EXPIRED_COOKIE_ATTRS}"), &self.base_url);
        }
    }

    fn update_session(&self, apply: impl FnOnce(&mut Session)) {
        if let Ok(mut session) = self.session.write() {
            apply(&mut session);
        }
    }
}

/// Maps a non-2xx response to its error classification.
pub fn classify_failure(status: StatusCode, body: &[u8], response_type: ResponseType) -> SessionError {
    if status == StatusCode::UNAUTHORIZED {
        return SessionError::Unauthorized {
            payload: serde_json::from_slice(body).ok(),
        };
    }

    let payload = match response_type {
        ResponseType::Blob => match decode_blob_payload(body) {
            Ok(payload) => payload,
            Err(err) => return err,
        },
        ResponseType::Json => json_or_text(body),
    };

    SessionError::Application { status, payload }
}

/// Decodes a binary body as UTF-8 text holding JSON.
pub fn decode_blob_payload(body: &[u8]) -> Result<Value, SessionError> {
    let text = std::str::from_utf8(body)
        .map_err(|err| SessionError::Decode(format!("blob is not utf-8: {err}")))?;
    serde_json::from_str(text)
        .map_err(|err| SessionError::Decode(format!("blob is not json: {err}")))
}

fn json_or_text(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, SessionError> {
    serde_json::from_slice(body).map_err(|err| SessionError::Decode(err.to_string()))
}

fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
