//! Brokerage credentials and session lifetime.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("login rejected: {0}")]
    Rejected(String),

    #[error("network error during login: {0}")]
    Network(String),

    #[error("unexpected login response: {0}")]
    ResponseFormat(String),
}

/// Application and user credentials issued by the brokerage.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_source: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub user_key: String,
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default)]
    pub client_code: String,
    #[serde(default)]
    pub pin: String,
}

impl Credentials {
    /// Fields the TOTP login cannot do without.
    pub fn validate(&self) -> Result<(), AuthError> {
        let required = [
            ("user_key", &self.user_key),
            ("user_id", &self.user_id),
            ("encryption_key", &self.encryption_key),
            ("client_code", &self.client_code),
            ("pin", &self.pin),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(AuthError::MissingCredential(name));
            }
        }
        Ok(())
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_name", &self.app_name)
            .field("user_id", &self.user_id)
            .field("client_code", &self.client_code)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
}

/// An authenticated brokerage session.
#[derive(Clone)]
pub struct Session {
    access_token: String,
    client_code: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Session issued at `issued_at`; brokerage tokens die at the next IST midnight.
    pub fn new(access_token: String, client_code: String, issued_at: DateTime<Utc>) -> Self {
        let expires_at = next_ist_midnight(issued_at);
        Self {
            access_token,
            client_code,
            issued_at,
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn client_code(&self) -> &str {
        &self.client_code
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.access_token.is_empty() || now >= self.expires_at {
            SessionStatus::Expired
        } else {
            SessionStatus::Active
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status(Utc::now()) == SessionStatus::Active
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_code", &self.client_code)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Anything that can turn credentials plus a one-time code into a session.
pub trait Authenticator {
    fn authenticate(&self, credentials: &Credentials, otp: &str) -> Result<Session, AuthError>;
}

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// India Standard Time, UTC+05:30.
pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

fn next_ist_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    let local = t.with_timezone(&ist());
    let tomorrow = local.date_naive() + Duration::days(1);
    let midnight = tomorrow.and_time(Default::default());
    midnight
        .and_local_timezone(ist())
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(t + Duration::days(1))
}
