//! The HTTP Basic scheme: `Basic base64(username:password)`.
use crate::auth::{
    AuthError,
    AuthResult,
    AuthSpec,
    Credential,
};

pub fn encode(username: &str, password: &str) -> String {
    let raw = format!("{}:{}", username, password);
    format!("Basic {}", base64::encode(raw.as_bytes()))
}

/// Split a base64 payload into username and password.
pub fn decode(payload: &str) -> Result<(String, String), AuthError> {
    let raw = match base64::decode(payload) {
        Ok(v) => v,
        Err(_) => {
            return Err(AuthError::Malformed);
        },
    };
    let s = match String::from_utf8(raw) {
        Ok(v) => v,
        Err(_) => {
            return Err(AuthError::Malformed);
        },
    };
    match s.split_once(':') {
        Some((user, secret)) => Ok((user.to_string(), secret.to_string())),
        None => Err(AuthError::Malformed),
    }
}

/// Verifies the given [AuthSpec] against the configured credential.
pub fn verify(auth: &AuthSpec, credential: &Credential) -> Result<AuthResult, AuthError> {
    if auth.user != credential.username || auth.secret != credential.password {
        return Err(AuthError::Denied);
    }
    Ok(AuthResult {
        identity: auth.user.clone(),
    })
}
