//! Transport-neutral view of an incoming HTTP request.
//!
//! The HTTP adapters fill one of these from the raw request so that the
//! driver's binding strategies never depend on the protocol engine.

use crate::ids::SenderFingerprint;

/// A single cookie carried by the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestCookie {
    /// Cookie name.
    pub name: String,
    /// Raw (possibly encrypted) cookie value.
    pub value: String,
}

impl RequestCookie {
    /// Create a cookie.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The parts of a request the driver cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncomingRequest {
    /// Absolute request path, e.g. `/eventhub/Sockets/room/42`.
    pub path: String,
    /// Cookies in header order.
    pub cookies: Vec<RequestCookie>,
    /// Remote address of the client.
    pub sender: String,
    /// Optional desktop discriminator for clients sharing one address
    /// (terminal servers).
    pub desktop: Option<String>,
}

impl IncomingRequest {
    /// Create a request for `path` from `sender`.
    pub fn new(path: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sender: sender.into(),
            ..Self::default()
        }
    }

    /// Add a cookie.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push(RequestCookie::new(name, value));
        self
    }

    /// Set the desktop discriminator.
    #[must_use]
    pub fn with_desktop(mut self, desktop: impl Into<String>) -> Self {
        self.desktop = Some(desktop.into());
        self
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Session name routed after `marker` (case-insensitive).
    ///
    /// `/base/Events/database/john` with marker `Events` yields
    /// `database/john`. Returns `None` when the marker is absent or nothing
    /// follows it.
    pub fn routed_session(&self, marker: &str) -> Option<String> {
        let mut found = false;
        let mut parts: Vec<&str> = Vec::new();
        for segment in self.segments() {
            if segment.eq_ignore_ascii_case(marker) {
                found = true;
            } else if found {
                parts.push(segment);
            }
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Sender identity: address plus desktop, lowercased.
    pub fn sender_identity(&self) -> String {
        format!(
            "http://{}:c{}",
            self.sender,
            self.desktop.as_deref().unwrap_or("0")
        )
        .to_lowercase()
    }

    /// Fingerprint of the client address, matched against return-to-sender
    /// targets.
    pub fn fingerprint(&self) -> SenderFingerprint {
        SenderFingerprint::of(&self.sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routed_session_after_marker() {
        let req = IncomingRequest::new("/eventhub/Sockets/room/42", "10.0.0.1");
        assert_eq!(req.routed_session("Sockets").as_deref(), Some("room/42"));
    }

    #[test]
    fn routed_session_marker_is_case_insensitive() {
        let req = IncomingRequest::new("/Product/events/database_name/john_doe", "h");
        assert_eq!(
            req.routed_session("Events").as_deref(),
            Some("database_name/john_doe")
        );
    }

    #[test]
    fn routed_session_without_marker() {
        let req = IncomingRequest::new("/eventhub/Other/room", "h");
        assert!(req.routed_session("Polling").is_none());
    }

    #[test]
    fn routed_session_marker_only() {
        let req = IncomingRequest::new("/eventhub/Polling/", "h");
        assert!(req.routed_session("Polling").is_none());
    }

    #[test]
    fn routed_session_skips_empty_segments() {
        let req = IncomingRequest::new("/base//Events//a///b/", "h");
        assert_eq!(req.routed_session("Events").as_deref(), Some("a/b"));
    }

    #[test]
    fn sender_identity_includes_desktop() {
        let req = IncomingRequest::new("/", "10.0.0.1").with_desktop("3");
        assert_eq!(req.sender_identity(), "http://10.0.0.1:c3");
    }

    #[test]
    fn identity_distinguishes_desktops() {
        let a = IncomingRequest::new("/", "10.0.0.1").with_desktop("1");
        let b = IncomingRequest::new("/", "10.0.0.1").with_desktop("2");
        assert_ne!(a.sender_identity(), b.sender_identity());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_matches_return_to_sender() {
        let req = IncomingRequest::new("/", "10.0.0.7");
        assert_eq!(req.fingerprint(), SenderFingerprint::of("10.0.0.7"));
    }

    #[test]
    fn with_cookie_preserves_order() {
        let req = IncomingRequest::new("/", "h")
            .with_cookie("a", "1")
            .with_cookie("b", "2");
        let names: Vec<_> = req.cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
