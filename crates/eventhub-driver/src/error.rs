//! Driver error types.

use eventhub_core::{AuthenticationError, ChannelId};
use thiserror::Error;

/// Why an incoming connection could not be bound to a channel.
///
/// Adapters answer every variant with an empty `403 Forbidden`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// No binding strategy found a channel.
    #[error("no channel matches the request")]
    NotFound,
    /// The sender reconnected within the brute-force interval.
    #[error("repeated connection attempt from {0}")]
    BruteForce(String),
    /// The application authenticator refused the request.
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    /// The channel requires a matching cookie and none was presented.
    #[error("request does not authenticate against channel {0}")]
    Unauthenticated(ChannelId),
    /// The driver is shutting down.
    #[error("event driver is stopping")]
    Stopping,
}

impl BindError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BruteForce(_) => "brute_force",
            Self::Authentication(_) => "authentication",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Stopping => "stopping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_error_is_transparent() {
        let err = BindError::from(AuthenticationError::Rejected("expired".into()));
        assert_eq!(err.to_string(), "authentication rejected: expired");
        assert_eq!(err.reason(), "authentication");
    }

    #[test]
    fn brute_force_names_sender() {
        let err = BindError::BruteForce("http://10.0.0.1:c0".into());
        assert!(err.to_string().contains("10.0.0.1"));
    }
}
