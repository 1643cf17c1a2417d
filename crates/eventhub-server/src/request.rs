//! Conversion of an HTTP request into the driver's [`IncomingRequest`].

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use eventhub_core::IncomingRequest;

/// Header carrying the client desktop number, distinguishing terminal
/// sessions behind one address.
pub const DESKTOP_HEADER: &str = "x-eventhub-desktop";

/// Sender recorded when the peer address is not available.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Extractor yielding the transport-neutral view of the request.
#[derive(Clone, Debug)]
pub struct ClientRequest(pub IncomingRequest);

impl<S: Send + Sync> FromRequestParts<S> for ClientRequest {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(incoming_request(parts)))
    }
}

/// Build an [`IncomingRequest`] from path, cookies, peer address and the
/// desktop header.
pub fn incoming_request(parts: &Parts) -> IncomingRequest {
    let sender = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_SENDER.to_string(), |ConnectInfo(addr)| addr.ip().to_string());

    let mut request = IncomingRequest::new(parts.uri.path(), sender);
    for cookie in CookieJar::from_headers(&parts.headers).iter() {
        request = request.with_cookie(cookie.name(), cookie.value());
    }
    if let Some(desktop) = parts
        .headers
        .get(DESKTOP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        request = request.with_desktop(desktop);
    }
    request
}

/// `Set-Cookie` value re-issuing the request's channel cookie with a fresh
/// lifetime. `None` when refreshing is disabled or the request carried no
/// such cookie (routed connections).
pub fn refreshed_cookie(
    request: &IncomingRequest,
    cookie_name: &str,
    path: &str,
    minutes: u32,
) -> Option<HeaderValue> {
    if minutes == 0 {
        return None;
    }
    let current = request
        .cookies
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(cookie_name))?;
    let cookie = Cookie::build((current.name.clone(), current.value.clone()))
        .path(path.to_string())
        .http_only(true)
        .build();
    let max_age = u64::from(minutes) * 60;
    HeaderValue::from_str(&format!("{cookie}; Max-Age={max_age}")).ok()
}

/// Attach an optional refreshed cookie to a response.
pub fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(value) = cookie {
        let _ = response.headers_mut().append(SET_COOKIE, value);
    }
    response
}
