//! Application seams used while binding an incoming connection.

use thiserror::Error;

use crate::ids::ChannelId;
use crate::request::IncomingRequest;

/// Failure reported by a [`ChannelAuthenticator`].
///
/// Any error aborts the bind; the client gets a `403`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    /// The request was inspected and refused.
    #[error("authentication rejected: {0}")]
    Rejected(String),
    /// The authenticator could not reach its backing store.
    #[error("authenticator unavailable: {0}")]
    Unavailable(String),
}

/// Trusted application callback that maps a request to a channel.
pub trait ChannelAuthenticator: Send + Sync {
    /// Resolve `request` to a registered channel.
    ///
    /// `routed_session` is the session name taken from the URL, if any.
    /// `Ok(None)` lets the next binding strategy try.
    fn authenticate(
        &self,
        request: &IncomingRequest,
        routed_session: Option<&str>,
    ) -> Result<Option<ChannelId>, AuthenticationError>;
}

/// Decrypts a cookie value with a channel's metadata.
pub trait CookieDecoder: Send + Sync {
    /// Decode `value` using `metadata` as the decryption context.
    /// `None` when the value does not decode under this context.
    fn decode(&self, value: &str, metadata: &str) -> Option<String>;
}

/// Decoder for unencrypted cookies: the value is the token.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCookies;

impl CookieDecoder for PlainCookies {
    fn decode(&self, value: &str, _metadata: &str) -> Option<String> {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}
