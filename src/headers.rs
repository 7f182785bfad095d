//! Header policies
//! One filter for headers sent upstream, one for headers returned to the caller

use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS,
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL, HOST, REFERER,
};
use std::collections::HashSet;

/// Inbound header names dropped outright
const SKIPPED_REQUEST_HEADERS: &[&str] = &["host", "connection", "accept-encoding"];

/// Inbound header name prefixes injected by edge platforms
const SKIPPED_REQUEST_PREFIXES: &[&str] = &["cf-", "x-forwarded-", "x-vercel-"];

/// Upstream headers that no longer describe the body we send, or that
/// would block the mirror's own origin
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "content-length",
    "content-security-policy",
    "content-security-policy-report-only",
    "clear-site-data",
    "connection",
    "transfer-encoding",
];

pub const PREFLIGHT_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const PREFLIGHT_MAX_AGE: &str = "86400";
pub const CACHE_HINT: &str = "public, max-age=14400";

fn forwards_request_header(name: &HeaderName) -> bool {
    // HeaderName is always lower-case
    let name = name.as_str();
    !SKIPPED_REQUEST_HEADERS.contains(&name)
        && !SKIPPED_REQUEST_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

fn forwards_response_header(name: &HeaderName) -> bool {
    !SKIPPED_RESPONSE_HEADERS.contains(&name.as_str())
}

/// Headers for the upstream request: the caller's headers minus the skipped
/// set, with `Host` and `Referer` pointing at the real upstream
pub fn upstream_request_headers(
    inbound: &HeaderMap,
    host: &HeaderValue,
    referer: &HeaderValue,
) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 2);

    for (name, value) in inbound {
        if forwards_request_header(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    headers.insert(HOST, host.clone());
    headers.insert(REFERER, referer.clone());
    headers
}

/// CORS and cache hints every proxied response starts from
pub fn base_response_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_HINT));
    headers
}

/// Headers returned to the caller. Upstream values replace a base header of
/// the same name; repeated upstream headers (e.g. `set-cookie`) are kept.
pub fn caller_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = base_response_headers();
    let mut seen: HashSet<&HeaderName> = HashSet::new();

    for (name, value) in upstream {
        if !forwards_response_header(name) {
            continue;
        }
        if seen.insert(name) {
            headers.insert(name.clone(), value.clone());
        } else {
            headers.append(name.clone(), value.clone());
        }
    }

    headers
}

/// Headers answering an `OPTIONS` preflight locally. Narrower than the
/// proxied-response base: no `Access-Control-Allow-Credentials` and no
/// cache hint, only the CORS fields a preflight needs.
pub fn preflight_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(PREFLIGHT_METHODS),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
    headers
}
