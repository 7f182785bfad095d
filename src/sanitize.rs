//! Path sanitizer
//!
//! Commit-info asset endpoints sometimes receive a second absolute URL glued
//! onto their path when the upstream page resolves a relative link against
//! the mirrored path. The tail is cut off before the upstream URL is built.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// `<owner>/<repo>/<marker>/<id>` followed by `/https://<host>/...`, with the
/// scheme separator either raw or percent-encoded.
static NESTED_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(/[^/]+/[^/]+/(?:latest-commit|tree-commit-info)/[^/]+)/https(?::|%3[Aa])//[^/]+/.*")
        .expect("nested URL pattern is valid")
});

/// Collapse the nested-URL corruption back to the real asset path
pub fn sanitize(pathname: &str) -> Cow<'_, str> {
    NESTED_URL.replace(pathname, "$1")
}
