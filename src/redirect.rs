//! Redirect rewriting
//! Upstream 3xx responses are answered with a rewritten `Location` and no body

use crate::mapping::RewriteRule;
use hyper::StatusCode;
use std::borrow::Cow;

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Swap the first occurrence of the first matching original domain for its
/// proxy domain. Locations naming no mirrored domain come back unchanged.
pub fn rewrite_location<'l, 'a>(
    location: &'l str,
    rules: impl IntoIterator<Item = RewriteRule<'a>>,
) -> Cow<'l, str> {
    rules
        .into_iter()
        .find(|rule| location.contains(rule.original_domain))
        .map(|rule| Cow::Owned(location.replacen(rule.original_domain, &rule.proxy_domain, 1)))
        .unwrap_or(Cow::Borrowed(location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{DefaultEntry, DomainMapping, MappingEntry};

    fn mapping() -> DomainMapping {
        DomainMapping::new(
            DefaultEntry::default(),
            vec![
                MappingEntry::new("github.com", "v-gh."),
                MappingEntry::new("codeload.github.com", "v-codeload."),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_is_redirect() {
        for code in [301, 302, 303, 307, 308] {
            assert!(is_redirect(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200, 204, 300, 304, 404, 502] {
            assert!(!is_redirect(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_rewrites_mirrored_location() {
        let mapping = mapping();
        assert_eq!(
            rewrite_location("https://github.com/p?x=1", mapping.rules("mirror.test")),
            "https://v-gh.mirror.test/p?x=1"
        );
    }

    #[test]
    fn test_foreign_and_relative_locations_unchanged() {
        let mapping = mapping();
        for location in ["https://example.org/p", "/session", ""] {
            let out = rewrite_location(location, mapping.rules("mirror.test"));
            assert!(matches!(out, Cow::Borrowed(l) if l == location));
        }
    }

    #[test]
    fn test_first_matching_rule_only() {
        // github.com is listed first and is a substring of codeload.github.com
        let mapping = mapping();
        assert_eq!(
            rewrite_location(
                "https://codeload.github.com/o/r/zip/main?from=github.com",
                mapping.rules("mirror.test")
            ),
            "https://codeload.v-gh.mirror.test/o/r/zip/main?from=github.com"
        );
    }
}
