//! Startup configuration
//! The mirror table and redirect rule, either built in or loaded from JSON

use crate::mapping::{DefaultEntry, DomainMapping, MappingEntry};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

/// Mirrored upstream domains and their proxy prefixes, in resolution order
const BUILTIN_MAPPINGS: &[(&str, &str)] = &[
    ("github.com", "v-gh."),
    ("avatars.githubusercontent.com", "v-avatars-githubusercontent-com."),
    ("github.githubassets.com", "v-github-githubassets-com."),
    ("collector.github.com", "v-collector-github-com."),
    ("api.github.com", "v-api-github-com."),
    ("raw.githubusercontent.com", "v-raw-githubusercontent-com."),
    ("gist.githubusercontent.com", "v-gist-githubusercontent-com."),
    ("github.io", "v-github-io."),
    ("assets-cdn.github.com", "v-assets-cdn-github-com."),
    ("cdn.jsdelivr.net", "v-cdn-jsdelivr-net."),
    ("securitylab.github.com", "v-securitylab-github-com."),
    ("www.githubstatus.com", "v-www-githubstatus-com."),
    ("npmjs.com", "v-npmjs-com."),
    ("git-lfs.github.com", "v-git-lfs-github-com."),
    ("githubusercontent.com", "v-githubusercontent-com."),
    ("github.global.ssl.fastly.net", "v-github-global-ssl-fastly-net."),
    ("api.npms.io", "v-api-npms-io."),
    ("github.community", "v-github-community."),
];

const BUILTIN_REDIRECT_PATHS: &[&str] = &["/", "/login", "/signup", "/copilot"];
const BUILTIN_REDIRECT_TARGET: &str = "https://blog.miaizhe.xyz";

/// Whether failure responses carry the error chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RuntimeMode {
    #[default]
    Production,
    Development,
}

/// Literal paths answered with a fixed 302 before any upstream is chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub paths: Vec<String>,
    pub target: String,
}

impl RedirectRule {
    pub fn matches(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    fn validate(&self) -> Result<()> {
        hyper::header::HeaderValue::from_str(&self.target)
            .with_context(|| format!("Redirect target `{}` is not a valid header value", self.target))?;
        if let Some(bad) = self.paths.iter().find(|p| !p.starts_with('/')) {
            anyhow::bail!("Redirect path `{}` must start with `/`", bad);
        }
        Ok(())
    }
}

impl Default for RedirectRule {
    fn default() -> Self {
        Self {
            paths: BUILTIN_REDIRECT_PATHS.iter().map(|p| p.to_string()).collect(),
            target: BUILTIN_REDIRECT_TARGET.to_string(),
        }
    }
}

/// Mirror configuration file
///
/// ```json
/// {
///   "default": { "prefix": "gh.", "target": "github.com" },
///   "mappings": [ { "domain": "api.github.com", "prefix": "v-api." } ],
///   "redirect": { "paths": ["/login"], "target": "https://example.org" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub default: DefaultEntry,
    pub mappings: Vec<MappingEntry>,
    #[serde(default)]
    pub redirect: RedirectRule,
}

impl MirrorConfig {
    /// The built-in table of mirrored domains
    pub fn builtin() -> Self {
        Self {
            default: DefaultEntry::default(),
            mappings: BUILTIN_MAPPINGS
                .iter()
                .map(|(domain, prefix)| MappingEntry::new(*domain, *prefix))
                .collect(),
            redirect: RedirectRule::default(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.redirect.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to the built-in table
    pub fn load_or_builtin<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::builtin()),
        }
    }

    /// Compile the table once for the lifetime of the process
    pub fn build_mapping(&self) -> Result<DomainMapping> {
        DomainMapping::new(self.default.clone(), self.mappings.clone())
            .context("Invalid domain mapping table")
    }
}

/// Proxy server configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_addr: IpAddr,
    pub http_port: u16,
    pub redirect: RedirectRule,
    pub mode: RuntimeMode,
    /// Wall-clock ceiling for one request, `None` for no limit
    pub max_duration: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8080,
            redirect: RedirectRule::default(),
            mode: RuntimeMode::Production,
            max_duration: Some(Duration::from_secs(30)),
        }
    }
}
