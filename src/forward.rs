//! Request forwarder
//! Builds the upstream request for a context and issues it without
//! following redirects

use crate::context::ProxyContext;
use crate::headers::upstream_request_headers;
use anyhow::{Context, Result};
use hyper::header::HeaderValue;
use reqwest::{redirect, Client, ClientBuilder};
use tracing::debug;
use url::Url;

/// Scheme used to reach the mirrored domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamScheme {
    #[default]
    Https,
    Http,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::Https => "https",
            UpstreamScheme::Http => "http",
        }
    }
}

pub struct Forwarder {
    client: Client,
    scheme: UpstreamScheme,
}

impl Forwarder {
    /// HTTPS forwarder with the default client
    pub fn new() -> Result<Self> {
        Self::from_builder(Client::builder(), UpstreamScheme::Https)
    }

    /// Forwarder from a caller-tuned client builder. Redirect following is
    /// always switched off: 3xx responses must reach the redirect rewriter.
    pub fn from_builder(builder: ClientBuilder, scheme: UpstreamScheme) -> Result<Self> {
        let client = builder
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self { client, scheme })
    }

    /// `{scheme}://{target_host}{pathname}{?query}`
    pub fn upstream_url(&self, ctx: &ProxyContext) -> Result<Url> {
        let mut url = format!("{}://{}{}", self.scheme.as_str(), ctx.target_host, ctx.pathname);
        if let Some(q) = ctx.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }

        Url::parse(&url).with_context(|| format!("Invalid upstream URL {}", url))
    }

    /// Build the upstream request: filtered headers, forced `Host` and
    /// `Referer`, and the buffered body for methods that carry one.
    pub fn build_request(&self, ctx: &ProxyContext) -> Result<reqwest::Request> {
        let url = self.upstream_url(ctx)?;

        let host = HeaderValue::from_str(&ctx.target_host).context("Invalid upstream host")?;
        let referer = HeaderValue::from_str(url.as_str()).context("Invalid upstream URL")?;
        let headers = upstream_request_headers(&ctx.headers, &host, &referer);

        let mut builder = self.client.request(ctx.method.clone(), url).headers(headers);

        if ctx.accepts_body() {
            if let Some(body) = ctx.body.as_ref().filter(|b| !b.is_empty()) {
                builder = builder.body(body.clone());
            }
        }

        builder.build().context("Failed to build upstream request")
    }

    /// Issue the single upstream call for this request
    pub async fn forward(&self, ctx: &ProxyContext) -> Result<reqwest::Response> {
        let request = self.build_request(ctx)?;

        debug!("Forwarding {} {}", request.method(), request.url());

        let response = self
            .client
            .execute(request)
            .await
            .with_context(|| format!("Upstream request to {} failed", ctx.target_host))?;

        debug!("Upstream {} answered {}", ctx.target_host, response.status());

        Ok(response)
    }
}
