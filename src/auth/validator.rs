//! Credential validators.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::{
    AuthAttempt, AuthData, AuthMechanism, AuthOutcome, CramChallenge, CredentialValidator,
    constant_time_eq, cram,
};
use crate::events::{self, EventArgs, EventBus};

/// Validates against one configured username/password.
pub struct StaticCredentials {
    username: String,
    password: SecretString,
    bus: EventBus,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: SecretString, bus: EventBus) -> Self {
        Self {
            username: username.into(),
            password,
            bus,
        }
    }

    fn notify(&self, event: &str, attempt: &AuthAttempt) {
        if let Err(e) = self
            .bus
            .publish_sync(event, EventArgs::Auth(attempt.clone()))
        {
            warn!(event, error = %e, "Auth event handler failed");
        }
    }

    fn decide(&self, attempt: AuthAttempt, matched: bool) -> AuthOutcome {
        let user = attempt.username.as_deref().unwrap_or("?");
        if matched {
            info!(user, mechanism = %attempt.mechanism, "Authentication successful");
            self.notify(events::AFTER_AUTH, &attempt);
            AuthOutcome::Authorized
        } else {
            warn!(user, mechanism = %attempt.mechanism, "Authentication failed");
            AuthOutcome::InvalidCredentials
        }
    }
}

impl CredentialValidator for StaticCredentials {
    fn validate_login(&self, mechanism: AuthMechanism, data: &AuthData) -> AuthOutcome {
        debug!(%mechanism, "Authentication attempt");

        let decoded = match data {
            AuthData::LoginPassword { login, password } => {
                match (std::str::from_utf8(login), std::str::from_utf8(password)) {
                    (Ok(login), Ok(password)) => Some((login, password)),
                    _ => None,
                }
            }
            AuthData::Raw(_) => None,
        };

        let attempt = AuthAttempt {
            mechanism,
            username: decoded.map(|(login, _)| login.to_string()),
        };
        self.notify(events::BEFORE_AUTH, &attempt);

        let Some((login, password)) = decoded else {
            warn!(%mechanism, "Unsupported credential shape");
            return AuthOutcome::MechanismNotSupported;
        };

        let matched = constant_time_eq(login.as_bytes(), self.username.as_bytes())
            & constant_time_eq(password.as_bytes(), self.password.expose_secret().as_bytes());
        self.decide(attempt, matched)
    }

    fn validate_cram(&self, challenge: &CramChallenge, response: &str) -> AuthOutcome {
        let attempt = AuthAttempt {
            mechanism: AuthMechanism::CramMd5,
            username: response
                .trim()
                .rsplit_once(' ')
                .map(|(user, _)| user.to_string()),
        };
        self.notify(events::BEFORE_AUTH, &attempt);

        let matched = cram::verify(
            &self.username,
            self.password.expose_secret().as_bytes(),
            challenge,
            response,
        );
        self.decide(attempt, matched)
    }
}

/// Development mode: every LOGIN/PLAIN attempt succeeds, credentials are
/// never decoded. CRAM-MD5 is not offered.
pub struct AllowAnyLogin;

impl CredentialValidator for AllowAnyLogin {
    fn mechanisms(&self) -> &'static [AuthMechanism] {
        &[AuthMechanism::Plain, AuthMechanism::Login]
    }

    fn decodes_credentials(&self) -> bool {
        false
    }

    fn validate_login(&self, mechanism: AuthMechanism, _data: &AuthData) -> AuthOutcome {
        debug!(%mechanism, "Accepting login without validation");
        AuthOutcome::Authorized
    }

    fn validate_cram(&self, _challenge: &CramChallenge, _response: &str) -> AuthOutcome {
        AuthOutcome::MechanismNotSupported
    }
}
