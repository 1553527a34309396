// ===============================
// src/auth.rs
// ===============================
//
// Auth session: only the raw token is persisted; claims are decoded in
// memory on login and on rehydration. The signature is not checked here,
// the backend verifies it on every authenticated call.
//
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{StorageError, TokenRepository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientClaims {
    pub client_id: i64,
    pub email: String,
    pub name: String,
    pub store_id: i64,
    #[serde(default)]
    pub nuip: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

impl ClientClaims {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.is_some_and(|exp| exp < now.timestamp())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is not a JWT")]
    Malformed,
    #[error("token payload is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("token payload has unexpected claims: {0}")]
    Claims(#[from] serde_json::Error),
}

pub fn decode_claims(token: &str) -> Result<ClientClaims, AuthError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::Malformed),
    };
    let raw = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// A token that decoded and was not expired when accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub claims: ClientClaims,
}

pub struct AuthSession<R> {
    repo: R,
    current: Option<Credentials>,
}

impl<R: TokenRepository> AuthSession<R> {
    /// Load the persisted token; an undecodable or expired one is cleared.
    pub fn rehydrate(repo: R) -> Result<Self, StorageError> {
        Self::rehydrate_at(repo, Utc::now())
    }

    fn rehydrate_at(repo: R, now: DateTime<Utc>) -> Result<Self, StorageError> {
        let stored = repo.load()?;
        let mut session = Self {
            repo,
            current: None,
        };
        if let Some(token) = stored {
            match accept(&token, now) {
                Some(credentials) => session.current = Some(credentials),
                None => {
                    info!("auth: stored token unusable, signing out");
                    session.logout()?;
                }
            }
        }
        Ok(session)
    }

    /// Returns `false` (state untouched) for undecodable or expired tokens.
    pub fn login(&mut self, token: &str) -> Result<bool, StorageError> {
        self.login_at(token, Utc::now())
    }

    fn login_at(&mut self, token: &str, now: DateTime<Utc>) -> Result<bool, StorageError> {
        let Some(credentials) = accept(token, now) else {
            return Ok(false);
        };
        self.repo.save(Some(&credentials.token))?;
        info!(client_id = credentials.claims.client_id, store_id = credentials.claims.store_id, "auth: signed in");
        self.current = Some(credentials);
        Ok(true)
    }

    pub fn logout(&mut self) -> Result<(), StorageError> {
        self.repo.save(None)?;
        self.current = None;
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.current.as_ref()
    }
}

fn accept(token: &str, now: DateTime<Utc>) -> Option<Credentials> {
    let claims = match decode_claims(token) {
        Ok(c) => c,
        Err(e) => {
            warn!(%e, "auth: rejecting token");
            return None;
        }
    };
    if claims.is_expired_at(now) {
        warn!(client_id = claims.client_id, "auth: rejecting expired token");
        return None;
    }
    Some(Credentials {
        token: token.to_string(),
        claims,
    })
}

/// Test-only JWT builder; the signature segment is opaque.
#[cfg(test)]
pub(crate) fn test_token(client_id: i64, store_id: i64, exp: Option<i64>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let mut claims = serde_json::json!({
        "clientId": client_id,
        "email": "cliente@example.com",
        "name": "Cliente",
        "storeId": store_id,
        "iat": 1_700_000_000,
    });
    if let Some(exp) = exp {
        claims["exp"] = serde_json::json!(exp);
    }
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
