//! Domain mapping table
//! Bidirectional association between mirrored upstream domains and the
//! hostname prefixes that select them on the proxy side

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Prefix reserved for the primary mirrored host
pub const DEFAULT_PREFIX: &str = "gh.";

/// One `(original domain, proxy prefix)` pair as it appears in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub domain: String,
    pub prefix: String,
}

impl MappingEntry {
    pub fn new(domain: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            prefix: prefix.into(),
        }
    }
}

/// The reserved entry resolved by its own rule instead of a table lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultEntry {
    pub prefix: String,
    pub target: String,
}

impl Default for DefaultEntry {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            target: "github.com".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("domain `{0}` is mapped more than once")]
    DuplicateDomain(String),

    #[error("prefix `{0}` is used by more than one domain")]
    DuplicatePrefix(String),

    #[error("prefix for domain `{0}` is empty")]
    EmptyPrefix(String),

    #[error("prefix `{0}` is not a hostname prefix")]
    InvalidPrefix(String),

    #[error("prefix `{0}` collides with the reserved default prefix")]
    ReservedPrefix(String),

    #[error("failed to compile matcher for `{domain}`: {source}")]
    Pattern {
        domain: String,
        #[source]
        source: regex::Error,
    },
}

/// A mapping entry with its body matchers compiled once at startup
#[derive(Debug)]
struct CompiledEntry {
    domain: String,
    prefix: String,
    absolute: Regex,
    protocol_relative: Regex,
}

impl CompiledEntry {
    fn compile(entry: MappingEntry) -> Result<Self, MappingError> {
        let escaped = regex::escape(&entry.domain);
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|source| MappingError::Pattern {
                domain: entry.domain.clone(),
                source,
            })
        };

        Ok(Self {
            absolute: compile(format!("https?://{}", escaped))?,
            protocol_relative: compile(format!("//{}", escaped))?,
            domain: entry.domain,
            prefix: entry.prefix,
        })
    }
}

/// Pairs one original domain with its full proxy domain for a given request
#[derive(Debug, Clone)]
pub struct RewriteRule<'a> {
    pub original_domain: &'a str,
    pub proxy_domain: String,
    pub(crate) absolute: &'a Regex,
    pub(crate) protocol_relative: &'a Regex,
}

/// Immutable mapping table shared by every in-flight request
#[derive(Debug)]
pub struct DomainMapping {
    entries: Vec<CompiledEntry>,
    by_prefix: HashMap<String, usize>,
    by_domain: HashMap<String, usize>,
    default: DefaultEntry,
}

impl DomainMapping {
    /// Build and validate the table. Entry order is kept; it decides which
    /// prefix wins when several are literal prefixes of one hostname.
    pub fn new(default: DefaultEntry, entries: Vec<MappingEntry>) -> Result<Self, MappingError> {
        let default = DefaultEntry {
            prefix: default.prefix.to_ascii_lowercase(),
            target: default.target.to_ascii_lowercase(),
        };
        validate_prefix(&default.target, &default.prefix)?;

        let mut compiled = Vec::with_capacity(entries.len());
        let mut by_prefix = HashMap::new();
        let mut by_domain = HashMap::new();

        for entry in entries {
            let entry = MappingEntry {
                domain: entry.domain.to_ascii_lowercase(),
                prefix: entry.prefix.to_ascii_lowercase(),
            };
            validate_prefix(&entry.domain, &entry.prefix)?;

            if entry.prefix == default.prefix {
                return Err(MappingError::ReservedPrefix(entry.prefix));
            }
            if by_domain.contains_key(&entry.domain) {
                return Err(MappingError::DuplicateDomain(entry.domain));
            }
            if by_prefix.contains_key(&entry.prefix) {
                return Err(MappingError::DuplicatePrefix(entry.prefix));
            }

            let index = compiled.len();
            by_domain.insert(entry.domain.clone(), index);
            by_prefix.insert(entry.prefix.clone(), index);
            compiled.push(CompiledEntry::compile(entry)?);
        }

        Ok(Self {
            entries: compiled,
            by_prefix,
            by_domain,
            default,
        })
    }

    /// Find the proxy prefix selected by an already lower-cased hostname.
    ///
    /// The reserved default wins first, then the first table prefix that is
    /// a literal prefix of `hostname`.
    pub fn resolve(&self, hostname: &str) -> Option<&str> {
        if hostname.starts_with(&self.default.prefix) {
            return Some(&self.default.prefix);
        }

        self.entries
            .iter()
            .find(|entry| hostname.starts_with(&entry.prefix))
            .map(|entry| entry.prefix.as_str())
    }

    pub fn prefix_to_host(&self, prefix: &str) -> Option<&str> {
        if prefix == self.default.prefix {
            return Some(&self.default.target);
        }

        self.by_prefix
            .get(prefix)
            .map(|&index| self.entries[index].domain.as_str())
    }

    /// Reverse lookup. The default target answers with the reserved prefix
    /// only when the table has no entry of its own for it.
    pub fn host_to_prefix(&self, domain: &str) -> Option<&str> {
        match self.by_domain.get(domain) {
            Some(&index) => Some(&self.entries[index].prefix),
            None if domain == self.default.target => Some(&self.default.prefix),
            None => None,
        }
    }

    pub fn is_default(&self, prefix: &str) -> bool {
        prefix == self.default.prefix
    }

    pub fn default_entry(&self) -> &DefaultEntry {
        &self.default
    }

    /// Iterate the table in configuration order
    pub fn entries(&self) -> impl Iterator<Item = MappingEntry> + '_ {
        self.entries
            .iter()
            .map(|entry| MappingEntry::new(entry.domain.clone(), entry.prefix.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite rules for a request whose hostname ends in `domain_suffix`,
    /// produced lazily in table order.
    pub fn rules<'a>(&'a self, domain_suffix: &'a str) -> impl Iterator<Item = RewriteRule<'a>> + 'a {
        self.entries.iter().map(move |entry| RewriteRule {
            original_domain: &entry.domain,
            proxy_domain: format!("{}{}", entry.prefix, domain_suffix),
            absolute: &entry.absolute,
            protocol_relative: &entry.protocol_relative,
        })
    }
}

fn validate_prefix(domain: &str, prefix: &str) -> Result<(), MappingError> {
    if prefix.is_empty() {
        return Err(MappingError::EmptyPrefix(domain.to_string()));
    }
    if prefix.contains('/') || prefix.chars().any(char::is_whitespace) {
        return Err(MappingError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}
