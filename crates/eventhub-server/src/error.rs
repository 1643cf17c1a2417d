//! Server errors and the HTTP answer to a refused connection.

use axum::http::StatusCode;
use eventhub_driver::BindError;

/// Errors starting or running the HTTP listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listen socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The listener failed while serving.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    /// The metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}

/// Status answered for a connection the driver refused to bind.
///
/// Unbound requests get an empty 403; a stopping driver answers 503 so
/// clients retry elsewhere.
pub fn rejection_status(err: &BindError) -> StatusCode {
    match err {
        BindError::Stopping => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::FORBIDDEN,
    }
}

#[cfg(test)]
mod tests {
    use eventhub_core::{AuthenticationError, ChannelId};

    use super::*;

    #[test]
    fn unbound_requests_are_forbidden() {
        for err in [
            BindError::NotFound,
            BindError::BruteForce("http://10.0.0.1:c0".into()),
            BindError::Unauthenticated(ChannelId::new(1)),
            BindError::Authentication(AuthenticationError::Rejected("nope".into())),
        ] {
            assert_eq!(rejection_status(&err), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn stopping_driver_is_unavailable() {
        assert_eq!(
            rejection_status(&BindError::Stopping),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:80".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("127.0.0.1:80"));
    }
}
