//! MirrorProxy - A domain-substitution reverse proxy
//!
//! Mirrors a fixed set of upstream domains under the caller's own hostname:
//! - Prefix-based selection of the upstream domain from the Host header
//! - Request forwarding with header filtering and manual redirect handling
//! - Response body and `Location` rewriting to proxy-domain aliases
//! - Repair of nested-URL corruption in commit-info asset paths

pub mod config;
pub mod context;
pub mod error;
pub mod forward;
pub mod headers;
pub mod mapping;
pub mod proxy;
pub mod redirect;
pub mod rewrite;
pub mod sanitize;

pub use config::{MirrorConfig, ProxyConfig, RedirectRule, RuntimeMode};
pub use context::ProxyContext;
pub use error::ProxyError;
pub use forward::{Forwarder, UpstreamScheme};
pub use mapping::{DefaultEntry, DomainMapping, MappingEntry, MappingError, RewriteRule};
pub use proxy::{ProxyBody, ProxyServer};
