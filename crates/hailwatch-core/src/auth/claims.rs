//! Bearer token decoding.
//!
//! Tokens are JWTs issued by the dashboard backend. Decoding here is advisory:
//! the signature is never checked (the backend is the authority on every
//! protected request), we only need the subject, role and expiry to drive the
//! UI. Missing or mistyped claims are a hard failure rather than a default.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::MalformedTokenError;

/// A dashboard role.
///
/// The backend stores roles as free-form strings; the known ones get their own
/// variant and anything else round-trips through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    User,
    Admin,
    /// Civil defense staff (`defensa_civil`).
    CivilDefense,
    /// Meteorologist (`meteorologo`).
    Meteorologist,
    /// Data scientist (`cientifico_datos`).
    DataScientist,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::CivilDefense => "defensa_civil",
            Role::Meteorologist => "meteorologo",
            Role::DataScientist => "cientifico_datos",
            Role::Other(name) => name,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value {
            "user" => Role::User,
            "admin" => Role::Admin,
            "defensa_civil" => Role::CivilDefense,
            "meteorologo" => Role::Meteorologist,
            "cientifico_datos" => Role::DataScientist,
            other => Role::Other(other.to_string()),
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::from(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::from(raw.as_str()))
    }
}

/// Identity claims extracted from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (the account e-mail).
    pub identity: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

/// Wire shape of the JWT payload. Extra claims (`iat`, `jti`, `fresh`, ...)
/// are ignored; the three below are required.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    role: Role,
    exp: f64,
}

/// Decodes a bearer token into its claims without verifying the signature.
///
/// # Errors
/// Returns [`MalformedTokenError`] if the token is not a three-segment JWT with
/// JSON header and payload, or if `sub`, `role` or `exp` are missing.
pub fn decode(token: &str) -> Result<Claims, MalformedTokenError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(MalformedTokenError::new("token is empty"));
    }

    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return Err(MalformedTokenError::new(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };
    if signature.is_empty() {
        return Err(MalformedTokenError::new("signature segment is empty"));
    }

    let header = decode_segment(header, "header")?;
    if !header.is_object() {
        return Err(MalformedTokenError::new("header is not a JSON object"));
    }

    let payload = decode_segment(payload, "payload")?;
    let raw: RawClaims = serde_json::from_value(payload)
        .map_err(|e| MalformedTokenError::new(format!("invalid claims: {e}")))?;

    if raw.sub.trim().is_empty() {
        return Err(MalformedTokenError::new("subject claim is empty"));
    }
    if !raw.exp.is_finite() {
        return Err(MalformedTokenError::new("expiry claim is not finite"));
    }
    let expires_at = DateTime::<Utc>::from_timestamp(raw.exp.floor() as i64, 0)
        .ok_or_else(|| MalformedTokenError::new("expiry claim is out of range"))?;

    debug!(role = %raw.role, %expires_at, "decoded session token");

    Ok(Claims {
        identity: raw.sub,
        role: raw.role,
        expires_at,
    })
}

/// Returns true once `now` has reached the token expiry.
pub fn is_expired(claims: &Claims, now: DateTime<Utc>) -> bool {
    now >= claims.expires_at
}

fn decode_segment(segment: &str, name: &str) -> Result<serde_json::Value, MalformedTokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| MalformedTokenError::new(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| MalformedTokenError::new(format!("{name} is not JSON: {e}")))
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= 16 {
        return "***".to_string();
    }
    let prefix: String = token.chars().take(12).collect();
    format!("{prefix}...")
}
