//! Verification gate: authorizes the identifier before any conversation access.

use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::error::{BackendError, VerificationError};
use crate::identity::{HostPlatform, Identifier};

pub const ALERT_UNAUTHORIZED: &str = "Unauthorized access.";
pub const ALERT_VERIFICATION_FAILED: &str = "Something went wrong. Please try again.";

/// Proof that the backend accepted the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub identifier: Identifier,
}

/// Issue exactly one verification request and classify the outcome.
///
/// Transport and decode failures are `Transport`; any HTTP status outside 2xx
/// is `Unauthorized`. No alerting happens here.
pub async fn verify<B>(backend: &B, identifier: &Identifier) -> Result<Authorized, VerificationError>
where
    B: Backend + ?Sized,
{
    match backend.verify(identifier).await {
        Ok(()) => {
            info!(user_id = %identifier, "driver verified");
            Ok(Authorized {
                identifier: identifier.clone(),
            })
        }
        Err(BackendError::Http { status, body }) => {
            warn!(
                user_id = %identifier,
                status = %status,
                body = %body,
                outcome = "unauthorized",
                "verification rejected"
            );
            Err(VerificationError::Unauthorized { status })
        }
        Err(other) => {
            error!(
                user_id = %identifier,
                outcome = "transport",
                "error verifying user: {}",
                other
            );
            Err(VerificationError::Transport {
                message: other.to_string(),
            })
        }
    }
}

/// User-facing alert for a verification failure. Both classes alert and close.
#[must_use]
pub fn alert_message(error: &VerificationError) -> &'static str {
    match error {
        VerificationError::Unauthorized { .. } => ALERT_UNAUTHORIZED,
        VerificationError::Transport { .. } => ALERT_VERIFICATION_FAILED,
    }
}

/// Verify, and on failure alert the user through the host and request close.
pub async fn verify_or_close<B>(
    backend: &B,
    host: &dyn HostPlatform,
    identifier: &Identifier,
) -> Result<Authorized, VerificationError>
where
    B: Backend + ?Sized,
{
    let result = verify(backend, identifier).await;
    if let Err(error) = &result {
        host.alert_and_close(alert_message(error));
    }
    result
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn both_failure_classes_have_distinct_alerts() {
        assert_eq!(
            alert_message(&VerificationError::Unauthorized {
                status: StatusCode::UNAUTHORIZED
            }),
            ALERT_UNAUTHORIZED
        );
        assert_eq!(
            alert_message(&VerificationError::Transport {
                message: "connection refused".to_string()
            }),
            ALERT_VERIFICATION_FAILED
        );
    }
}
