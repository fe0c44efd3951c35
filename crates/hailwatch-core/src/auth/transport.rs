//! Credential transport: login and registration requests to the dashboard API.
//!
//! Every failure is normalized into a [`TransportError`] whose message can be
//! shown as-is. The backend's `msg` field is surfaced verbatim except for the
//! few cases with canned replacements below.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::claims::Role;
use crate::error::TransportError;

/// Shown when the backend cannot be reached at all.
pub const MSG_UNREACHABLE: &str = "Cannot reach the server. Check your connection.";
/// Fallback for a failed login whose body carries no `msg`.
pub const MSG_LOGIN_FAILED: &str = "Login failed.";
/// Fallback for a failed registration whose body carries no `msg`.
pub const MSG_REGISTER_FAILED: &str = "Registration failed.";
/// Replacement for HTTP 400 "already registered" answers on registration.
pub const MSG_ALREADY_REGISTERED: &str =
    "This email is already registered. Log in or use another email.";
/// Replacement for HTTP 400 "required" answers on registration.
pub const MSG_MISSING_FIELDS: &str = "Please fill in all required fields.";

/// Login form contents, sent verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Extra fields the registration form collects for professional roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RoleProfile {
    #[default]
    None,
    #[serde(rename_all = "camelCase")]
    CivilDefense {
        institution: String,
        employee_id: String,
        institutional_email: String,
    },
    #[serde(rename_all = "camelCase")]
    Meteorologist {
        license_number: String,
        workplace: String,
        linkedin_profile: String,
    },
    #[serde(rename_all = "camelCase")]
    DataScientist {
        organization: String,
        github_profile: String,
        interest_description: String,
    },
}

/// Registration form contents.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(flatten, skip_serializing_if = "RoleProfile::is_none")]
    pub profile: RoleProfile,
}

impl RoleProfile {
    pub fn is_none(&self) -> bool {
        matches!(self, RoleProfile::None)
    }
}

/// Successful registration reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegisterOutcome {
    #[serde(default)]
    pub msg: Option<String>,
    /// One-time code issued to professional roles.
    #[serde(default)]
    pub verification_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
}

/// Sends credentials to the authentication backend.
///
/// Implementations report failures and never retry them.
pub trait CredentialTransport: Send + Sync {
    /// Exchanges credentials for a bearer token.
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Creates an account. Does not log in.
    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<RegisterOutcome, TransportError>> + Send;
}

/// HTTP transport against the dashboard's JSON API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for `base_url` (e.g. `http://localhost:5000/api`).
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid server URL '{base_url}': {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Invalid server URL '{base_url}': expected http or https");
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(reqwest::StatusCode, String), TransportError> {
        let url = self.endpoint(path);
        debug!(%url, "sending auth request");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "auth request failed before a response");
                TransportError::unreachable(MSG_UNREACHABLE)
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            debug!(error = %e, "failed to read auth response body");
            TransportError::unreachable(MSG_UNREACHABLE)
        })?;
        Ok((status, text))
    }
}

impl CredentialTransport for HttpTransport {
    async fn login(&self, credentials: &Credentials) -> Result<String, TransportError> {
        let (status, body) = self.post("login", credentials).await?;

        if !status.is_success() {
            let msg = error_message(&body);
            debug!(status = status.as_u16(), "login rejected");
            return Err(TransportError::rejected(
                status.as_u16(),
                msg.unwrap_or_else(|| MSG_LOGIN_FAILED.to_string()),
            ));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            debug!(error = %e, "login response did not carry an access token");
            TransportError::invalid_response(MSG_LOGIN_FAILED)
        })?;
        Ok(token.access_token)
    }

    async fn register(&self, registration: &Registration) -> Result<RegisterOutcome, TransportError> {
        let (status, body) = self.post("register", registration).await?;

        if !status.is_success() {
            return Err(normalize_register_error(status.as_u16(), error_message(&body)));
        }

        let outcome: RegisterOutcome = serde_json::from_str(&body).unwrap_or_else(|e| {
            debug!(error = %e, "registration response was not the expected JSON");
            RegisterOutcome::default()
        });
        if let Some(code) = &outcome.verification_code {
            info!(role = %registration.role, verification_code = %code, "account requires verification");
        }
        Ok(outcome)
    }
}

/// Extracts the backend's `msg` field from an error body, if any.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.msg)
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Backend phrasings of a duplicate e-mail (the API answers in Spanish).
const DUPLICATE_EMAIL_HINTS: &[&str] = &["already registered", "ya está registrado"];
/// Backend phrasings of missing form fields.
const MISSING_FIELDS_HINTS: &[&str] = &["required", "requerido"];

fn mentions(msg: &str, hints: &[&str]) -> bool {
    hints.iter().any(|hint| msg.contains(hint))
}

fn normalize_register_error(status: u16, msg: Option<String>) -> TransportError {
    let message = match msg {
        Some(m) if status == 400 && mentions(&m, DUPLICATE_EMAIL_HINTS) => {
            MSG_ALREADY_REGISTERED.to_string()
        }
        Some(m) if status == 400 && mentions(&m, MISSING_FIELDS_HINTS) => {
            MSG_MISSING_FIELDS.to_string()
        }
        Some(m) => m,
        None => MSG_REGISTER_FAILED.to_string(),
    };
    TransportError::rejected(status, message)
}
