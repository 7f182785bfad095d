//! Response body rewriting
//!
//! Textual bodies get every reference to a mirrored domain swapped for its
//! proxy domain. Everything else passes through byte for byte.

use crate::mapping::RewriteRule;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Content types whose bodies are decoded and rewritten
const TEXTUAL_TYPES: &[&str] = &[
    "text/",
    "application/json",
    "application/javascript",
    "application/xml",
];

/// A quote directly followed by `/`
static QUOTED_ROOT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["']/"#).expect("quoted root pattern is valid"));

pub fn is_textual(content_type: &str) -> bool {
    TEXTUAL_TYPES.iter().any(|t| content_type.contains(t))
}

/// Rewrite a buffered upstream body according to its content type.
///
/// `same_origin_host` is set for the default mirror: site-relative
/// references are then made absolute against that hostname.
pub fn rewrite_body<'a>(
    body: Bytes,
    content_type: &str,
    rules: impl IntoIterator<Item = RewriteRule<'a>>,
    same_origin_host: Option<&str>,
) -> Bytes {
    if !is_textual(content_type) {
        return body;
    }

    let rewritten = {
        let text = String::from_utf8_lossy(&body);
        match rewrite_text(&text, rules, same_origin_host) {
            Cow::Borrowed(_) if matches!(text, Cow::Borrowed(_)) => None,
            rewritten => Some(rewritten.into_owned()),
        }
    };

    match rewritten {
        Some(text) => Bytes::from(text),
        None => body,
    }
}

pub fn rewrite_text<'t, 'a>(
    text: &'t str,
    rules: impl IntoIterator<Item = RewriteRule<'a>>,
    same_origin_host: Option<&str>,
) -> Cow<'t, str> {
    let mut text = Cow::Borrowed(text);

    for rule in rules {
        let absolute = format!("https://{}", rule.proxy_domain);
        if let Some(replaced) = replace_at_boundary(&text, rule.absolute, &absolute) {
            text = Cow::Owned(replaced);
        }

        let protocol_relative = format!("//{}", rule.proxy_domain);
        if let Some(replaced) = replace_at_boundary(&text, rule.protocol_relative, &protocol_relative) {
            text = Cow::Owned(replaced);
        }
    }

    if let Some(host) = same_origin_host {
        if let Some(replaced) = absolutize_site_relative(&text, host) {
            text = Cow::Owned(replaced);
        }
    }

    text
}

/// A domain match only counts when followed by `/`, a quote, whitespace or
/// the end of the text; `github.com` must not eat into `github.community`.
fn at_boundary(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => c == '/' || c == '"' || c == '\'' || c.is_whitespace(),
    }
}

fn replace_at_boundary(text: &str, pattern: &Regex, replacement: &str) -> Option<String> {
    let mut out = String::new();
    let mut last = 0;

    for m in pattern.find_iter(text) {
        if !at_boundary(&text[m.end()..]) {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        out.push_str(replacement);
        last = m.end();
    }

    if last == 0 {
        return None;
    }
    out.push_str(&text[last..]);
    Some(out)
}

/// `"/path` becomes `"https://{host}/path`, unless the slash starts a
/// protocol-relative URL (`"//`) or is followed by a scheme (`"/x:`)
fn absolutize_site_relative(text: &str, host: &str) -> Option<String> {
    let origin = format!("https://{}/", host);
    let mut out = String::new();
    let mut last = 0;

    for m in QUOTED_ROOT.find_iter(text) {
        let rest = &text[m.end()..];
        if rest.starts_with('/') || starts_with_scheme(rest) {
            continue;
        }
        // keep the quote, swap the slash
        let slash = m.end() - 1;
        out.push_str(&text[last..slash]);
        out.push_str(&origin);
        last = m.end();
    }

    if last == 0 {
        return None;
    }
    out.push_str(&text[last..]);
    Some(out)
}

fn starts_with_scheme(rest: &str) -> bool {
    let letters = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
    letters > 0 && rest.as_bytes().get(letters) == Some(&b':')
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
                MappingEntry::new("api.github.com", "v-api."),
                MappingEntry::new("githubusercontent.com", "v-ghuc."),
                MappingEntry::new("avatars.githubusercontent.com", "v-avatars."),
                MappingEntry::new("github.community", "v-community."),
            ],
        )
        .unwrap()
    }

    fn rewrite(text: &str, default_host: Option<&str>) -> String {
        let mapping = mapping();
        rewrite_text(text, mapping.rules("mirror.test"), default_host).into_owned()
    }

    #[test]
    fn test_is_textual() {
        assert!(is_textual("text/html; charset=utf-8"));
        assert!(is_textual("application/json"));
        assert!(is_textual("application/javascript"));
        assert!(is_textual("application/xml"));
        assert!(!is_textual("image/png"));
        assert!(!is_textual("application/octet-stream"));
        assert!(!is_textual(""));
    }

    #[test]
    fn test_every_entry_rewrites_absolute_and_protocol_relative() {
        let mapping = mapping();
        for entry in mapping.entries() {
            let body = format!("a https://{0}/x b //{0}/x c", entry.domain);
            let out = rewrite_text(&body, mapping.rules("mirror.test"), None);
            assert_eq!(
                out,
                format!("a https://{0}mirror.test/x b //{0}mirror.test/x c", entry.prefix)
            );
        }
    }

    #[test]
    fn test_http_is_upgraded() {
        assert_eq!(
            rewrite("<a href=\"http://github.com/login\">", None),
            "<a href=\"https://v-gh.mirror.test/login\">"
        );
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(
            rewrite("\"https://github.com\" 'https://github.com' https://github.com\nhttps://github.com", None),
            "\"https://v-gh.mirror.test\" 'https://v-gh.mirror.test' https://v-gh.mirror.test\nhttps://v-gh.mirror.test"
        );
        // longer domains sharing a prefix are left to their own rule
        assert_eq!(
            rewrite("https://github.community/t", None),
            "https://v-community.mirror.test/t"
        );
        assert_eq!(rewrite("https://github.com.evil.test/x", None), "https://github.com.evil.test/x");
        assert_eq!(rewrite("https://github.comx", None), "https://github.comx");
    }

    #[test]
    fn test_rules_do_not_shadow_each_other() {
        assert_eq!(
            rewrite(
                "https://api.github.com/users https://avatars.githubusercontent.com/u/1 //githubusercontent.com/",
                None
            ),
            "https://v-api.mirror.test/users https://v-avatars.mirror.test/u/1 //v-ghuc.mirror.test/"
        );
    }

    #[test]
    fn test_site_relative_only_for_default_mirror() {
        let html = r#"<a href="/owner/repo"><img src='/x.png'>"#;
        assert_eq!(rewrite(html, None), html);
        assert_eq!(
            rewrite(html, Some("gh.mirror.test")),
            r#"<a href="https://gh.mirror.test/owner/repo"><img src='https://gh.mirror.test/x.png'>"#
        );
    }

    #[test]
    fn test_site_relative_skips_protocol_forms() {
        let html = r#"<a href="//cdn.test/x"><a href="/javascript:void(0)"><a href="/">"#;
        assert_eq!(
            rewrite(html, Some("gh.mirror.test")),
            r#"<a href="//cdn.test/x"><a href="/javascript:void(0)"><a href="https://gh.mirror.test/">"#
        );
    }

    #[test]
    fn test_binary_bodies_pass_through() {
        let mapping = mapping();
        let body = Bytes::from_static(b"\x89PNG\r\n https://github.com/ \xff\xfe");
        let out = rewrite_body(body.clone(), "image/png", mapping.rules("mirror.test"), None);
        assert_eq!(out, body);
    }

    #[test]
    fn test_unchanged_text_keeps_buffer() {
        let mapping = mapping();
        let body = Bytes::from_static(b"{\"ok\":true}");
        let out = rewrite_body(body.clone(), "application/json", mapping.rules("mirror.test"), None);
        assert_eq!(out, body);
    }

    #[test]
    fn test_textual_body_rewritten() {
        let mapping = mapping();
        let body = Bytes::from_static(b"{\"avatar_url\":\"https://avatars.githubusercontent.com/u/1\"}");
        let out = rewrite_body(body, "application/json; charset=utf-8", mapping.rules("m.test"), None);
        assert_eq!(&out[..], b"{\"avatar_url\":\"https://v-avatars.m.test/u/1\"}");
    }
}
