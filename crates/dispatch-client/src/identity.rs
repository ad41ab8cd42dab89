//! Identity resolution against an injected host platform.
//!
//! The host (a Telegram WebApp in production) supplies the user context and an
//! alert-and-close primitive. Resolution is a one-shot synchronous check.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::IdentityError;

pub const ALERT_USER_INFO_UNAVAILABLE: &str = "User info not available";

/// Stable, non-empty string naming the driver within the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Trimmed identifier, or `None` when blank.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User context exposed by the host platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUser {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl HostUser {
    #[must_use]
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }
}

/// Host environment contract.
pub trait HostPlatform: Send + Sync {
    /// Current user context, if the host injected one.
    fn user(&self) -> Option<HostUser>;

    /// Notify the user and ask the host to close the view.
    fn alert_and_close(&self, message: &str);
}

/// Callback receiving host alerts.
pub type AlertSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Resolve the driver's identifier from the host.
///
/// A missing host is logged and reported as `HostUnavailable`; there is nothing
/// to close in that case. A host without a usable username gets an
/// alert-and-close request before `IdentityMissing` is returned.
pub fn resolve(host: Option<&dyn HostPlatform>) -> Result<Identifier, IdentityError> {
    let Some(host) = host else {
        error!("host platform not available; terminating session");
        return Err(IdentityError::HostUnavailable);
    };

    let identifier = host
        .user()
        .and_then(|user| user.username)
        .and_then(|username| Identifier::new(&username));

    match identifier {
        Some(identifier) => Ok(identifier),
        None => {
            warn!("host user context has no username");
            host.alert_and_close(ALERT_USER_INFO_UNAVAILABLE);
            Err(IdentityError::IdentityMissing)
        }
    }
}

/// Host with a fixed user context. Alerts are forwarded to the sink.
pub struct StaticHost {
    user: Option<HostUser>,
    on_alert: AlertSink,
}

impl StaticHost {
    #[must_use]
    pub fn new(user: Option<HostUser>, on_alert: AlertSink) -> Self {
        Self { user, on_alert }
    }
}

impl HostPlatform for StaticHost {
    fn user(&self) -> Option<HostUser> {
        self.user.clone()
    }

    fn alert_and_close(&self, message: &str) {
        (self.on_alert)(message);
    }
}

/// Host backed by a Telegram WebApp `initData` query string.
pub struct InitDataHost {
    user: Option<HostUser>,
    auth_date: Option<i64>,
    hash: Option<String>,
    on_alert: AlertSink,
}

impl InitDataHost {
    /// Parse `initData`. A malformed `user` field is logged and treated as
    /// absent so that resolution reports `IdentityMissing`.
    #[must_use]
    pub fn parse(init_data: &str, on_alert: AlertSink) -> Self {
        let mut user = None;
        let mut auth_date = None;
        let mut hash = None;

        let raw = init_data.trim().trim_start_matches('?');
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "user" => match serde_json::from_str::<HostUser>(&value) {
                    Ok(parsed) => user = Some(parsed),
                    Err(error) => warn!("ignoring malformed initData user: {}", error),
                },
                "auth_date" => auth_date = value.parse::<i64>().ok(),
                "hash" => hash = Some(value.into_owned()),
                _ => {}
            }
        }

        Self {
            user,
            auth_date,
            hash,
            on_alert,
        }
    }

    pub fn auth_date(&self) -> Option<i64> {
        self.auth_date
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }
}

impl HostPlatform for InitDataHost {
    fn user(&self) -> Option<HostUser> {
        self.user.clone()
    }

    fn alert_and_close(&self, message: &str) {
        (self.on_alert)(message);
    }
}
