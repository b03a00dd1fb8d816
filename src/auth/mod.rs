//! The registry is guarded by at most one shared credential.
//!
//! When the server is started with a [Credential], every request must carry an
//! `Authorization` header in the HTTP Basic scheme matching it. Without one,
//! all requests are accepted.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub mod basic;

/// The parsed value of an `Authorization` header.
pub struct AuthSpec {
    pub method: String,
    pub user: String,
    secret: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("auth string malformed")]
    Malformed,
    #[error("unsupported auth scheme {0:?}")]
    Scheme(String),
    #[error("invalid credentials")]
    Denied,
}

/// Outcome of a successful check.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResult {
    pub identity: String,
}

/// The username and password clients must present.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Credential {
        Credential {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Value of the `Authorization` header presenting this credential.
    pub fn header_value(&self) -> String {
        basic::encode(&self.username, &self.password)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Credential {{ username: {:?}, password: <hidden> }}", self.username)
    }
}

impl FromStr for AuthSpec {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<AuthSpec, AuthError> {
        let mut auth_fields = s.trim().splitn(2, ' ');
        let method = match auth_fields.next() {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => {
                return Err(AuthError::Malformed);
            },
        };
        let payload = match auth_fields.next() {
            Some(v) => v.trim(),
            None => {
                return Err(AuthError::Malformed);
            },
        };
        if !method.eq_ignore_ascii_case("basic") {
            return Err(AuthError::Scheme(method));
        }
        let (user, secret) = basic::decode(payload)?;
        Ok(AuthSpec {
            method,
            user,
            secret,
        })
    }
}

impl fmt::Debug for AuthSpec {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} user {:?}", self.method, self.user)
    }
}

/// Check an optional `Authorization` header value against the configured credential.
///
/// # Arguments
///
/// * `header` - Raw header value, if the request had one.
/// * `credential` - Credential the server requires, if any.
pub fn auth_check(header: Option<&str>, credential: Option<&Credential>) -> Result<Option<AuthResult>, AuthError> {
    let credential = match credential {
        Some(v) => v,
        None => {
            return Ok(None);
        },
    };
    let auth = match header {
        Some(v) => AuthSpec::from_str(v)?,
        None => {
            return Err(AuthError::Denied);
        },
    };
    basic::verify(&auth, credential).map(Some)
}
