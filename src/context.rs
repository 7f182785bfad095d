//! Per-request proxy context

use crate::error::ProxyError;
use crate::mapping::DomainMapping;
use crate::sanitize::sanitize;
use bytes::Bytes;
use hyper::header::{HeaderMap, HOST};
use hyper::http::request::Parts;
use hyper::Method;

/// Everything derived from one inbound request. Built fresh per request and
/// dropped with it.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    /// Host value the caller used, lower-cased, port included
    pub effective_hostname: String,
    pub host_prefix: String,
    pub target_host: String,
    /// `effective_hostname` with `host_prefix` removed
    pub domain_suffix: String,
    /// Default-prefix requests mirror the upstream root as same-origin
    pub is_default: bool,
    /// Request path after nested-URL sanitizing
    pub pathname: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ProxyContext {
    /// Resolve the mapping for the request's host. The body is attached
    /// separately once it has been buffered.
    pub fn from_parts(mapping: &DomainMapping, parts: &Parts) -> Result<Self, ProxyError> {
        let effective_hostname = effective_hostname(parts).ok_or(ProxyError::MissingHost)?;

        let host_prefix = mapping
            .resolve(&effective_hostname)
            .ok_or(ProxyError::UnresolvedDomain)?;
        let target_host = mapping
            .prefix_to_host(host_prefix)
            .ok_or(ProxyError::UnresolvedDomain)?;

        Ok(Self {
            domain_suffix: effective_hostname[host_prefix.len()..].to_string(),
            is_default: mapping.is_default(host_prefix),
            host_prefix: host_prefix.to_string(),
            target_host: target_host.to_string(),
            pathname: sanitize(parts.uri.path()).into_owned(),
            query: parts.uri.query().map(str::to_string),
            method: parts.method.clone(),
            headers: parts.headers.clone(),
            body: None,
            effective_hostname,
        })
    }

    /// GET and HEAD never carry a body upstream
    pub fn accepts_body(&self) -> bool {
        self.method != Method::GET && self.method != Method::HEAD
    }
}

/// Host header first, then the authority of an absolute-form request target
fn effective_hostname(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .map(|h| h.to_ascii_lowercase())
}
