//! SMTP AUTH credential validation.
//!
//! The listener decodes the protocol exchange; a [`CredentialValidator`]
//! only decides. Two validators exist:
//! - [`StaticCredentials`]: configured username/password, LOGIN, PLAIN and
//!   CRAM-MD5, with `before_auth`/`after_auth` events
//! - [`AllowAnyLogin`]: explicit development mode, LOGIN/PLAIN always pass

pub mod cram;
mod validator;

pub use cram::CramChallenge;
pub use validator::{AllowAnyLogin, StaticCredentials};

/// SASL mechanisms the listener understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
    CramMd5,
}

impl AuthMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::Login => "LOGIN",
            AuthMechanism::CramMd5 => "CRAM-MD5",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "PLAIN" => Some(AuthMechanism::Plain),
            "LOGIN" => Some(AuthMechanism::Login),
            "CRAM-MD5" => Some(AuthMechanism::CramMd5),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Credentials as received from the client, still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthData {
    /// A login/password pair (LOGIN, or a well-formed PLAIN blob).
    LoginPassword { login: Vec<u8>, password: Vec<u8> },
    /// Anything that did not split into a login/password pair.
    Raw(Vec<u8>),
}

/// Event payload for `before_auth` / `after_auth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttempt {
    pub mechanism: AuthMechanism,
    /// `None` when the credentials could not be decoded.
    pub username: Option<String>,
}

/// Result of a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    InvalidCredentials,
    MechanismNotSupported,
}

impl AuthOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthOutcome::Authorized)
    }

    /// SMTP reply line for this outcome.
    pub fn reply(&self) -> &'static str {
        match self {
            AuthOutcome::Authorized => "235 2.7.0 Authentication successful",
            AuthOutcome::InvalidCredentials => "535 5.7.8 Authentication credentials invalid",
            AuthOutcome::MechanismNotSupported => {
                "504 5.5.4 Authentication mechanism not supported"
            }
        }
    }
}

/// Decides AUTH attempts. One operation per mechanism family.
///
/// Implementations may block (the static validator waits on
/// `EventBus::publish_sync`), so callers on an async runtime run them on the
/// blocking pool.
pub trait CredentialValidator: Send + Sync {
    /// Mechanisms to advertise in EHLO.
    fn mechanisms(&self) -> &'static [AuthMechanism] {
        &[AuthMechanism::Plain, AuthMechanism::Login, AuthMechanism::CramMd5]
    }

    /// When false, LOGIN and PLAIN answers reach the validator as sent,
    /// without base64 decoding.
    fn decodes_credentials(&self) -> bool {
        true
    }

    /// LOGIN and PLAIN.
    fn validate_login(&self, mechanism: AuthMechanism, data: &AuthData) -> AuthOutcome;

    /// CRAM-MD5: `response` is the decoded `username hexdigest` line.
    fn validate_cram(&self, challenge: &CramChallenge, response: &str) -> AuthOutcome;
}

/// Split a decoded PLAIN blob (`authzid NUL authcid NUL passwd`).
pub fn split_plain(blob: &[u8]) -> AuthData {
    let mut fields = blob.split(|b| *b == 0);
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(_authzid), Some(login), Some(password), None) => AuthData::LoginPassword {
            login: login.to_vec(),
            password: password.to_vec(),
        },
        _ => AuthData::Raw(blob.to_vec()),
    }
}

/// Byte comparison whose running time does not depend on where the inputs
/// differ.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
