//! Proxy server implementation
//! Accepts HTTP/1.1 connections and runs each request through the mirror
//! pipeline: resolve, sanitize, forward, rewrite

use crate::config::ProxyConfig;
use crate::context::ProxyContext;
use crate::error::ProxyError;
use crate::forward::Forwarder;
use crate::headers::{caller_response_headers, preflight_headers};
use crate::mapping::DomainMapping;
use crate::redirect::{is_redirect, rewrite_location};
use crate::rewrite::rewrite_body;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::borrow::Cow;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Proxy server
pub struct ProxyServer {
    config: ProxyConfig,
    mapping: Arc<DomainMapping>,
    forwarder: Forwarder,
}

impl ProxyServer {
    /// Create a new proxy server
    pub fn new(config: ProxyConfig, mapping: Arc<DomainMapping>, forwarder: Forwarder) -> Self {
        Self {
            config,
            mapping,
            forwarder,
        }
    }

    /// Start the proxy server
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.http_port);

        info!(
            "Proxy server starting on HTTP:{} with {} mirrored domains",
            self.config.http_port,
            self.mapping.len()
        );

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("HTTP server listening on {}", addr);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, remote_addr).await {
                    debug!("HTTP connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Handle a single HTTP connection
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) -> Result<()> {
        let io = TokioIo::new(stream);

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let server = self.clone();
                    async move {
                        debug!("{} {} from {}", req.method(), req.uri().path(), remote_addr);
                        Ok::<_, Infallible>(server.handle(req).await)
                    }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    /// Run one request through the pipeline. Never fails: every error is
    /// rendered into a response here.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let outcome = match self.config.max_duration {
            Some(limit) => tokio::time::timeout(limit, self.process_request(req))
                .await
                .unwrap_or(Err(ProxyError::Timeout(limit))),
            None => self.process_request(req).await,
        };

        match outcome {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    ProxyError::UnresolvedDomain | ProxyError::MissingHost => warn!("Rejected request: {}", e),
                    ProxyError::Upstream(err) => error!("Proxy error: {:#}", err),
                    ProxyError::Timeout(_) => error!("Proxy error: {}", e),
                }
                e.into_response(self.config.mode)
            }
        }
    }

    /// Process request
    async fn process_request<B>(&self, req: Request<B>) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();

        // CORS preflight is answered locally
        if parts.method == Method::OPTIONS {
            return Ok(Self::preflight_response());
        }

        if self.config.redirect.matches(parts.uri.path()) {
            let location = HeaderValue::from_str(&self.config.redirect.target)
                .context("Invalid redirect location")?;
            return Ok(Self::redirect_response(StatusCode::FOUND, location));
        }

        let mut ctx = ProxyContext::from_parts(&self.mapping, &parts)?;

        if ctx.accepts_body() {
            let bytes = body
                .collect()
                .await
                .map_err(|e| {
                    let e: Box<dyn std::error::Error + Send + Sync> = e.into();
                    anyhow!("Failed to read request body: {}", e)
                })?
                .to_bytes();
            ctx.body = Some(bytes);
        }

        debug!(
            "{} {}{} -> {} (prefix {})",
            ctx.method, ctx.effective_hostname, ctx.pathname, ctx.target_host, ctx.host_prefix
        );

        let upstream = self.forwarder.forward(&ctx).await?;
        let status = upstream.status();

        if is_redirect(status) {
            if let Some(location) = upstream.headers().get(LOCATION) {
                // Raw non-ASCII bytes are legal here; only rewritten values are rebuilt
                let raw = String::from_utf8_lossy(location.as_bytes());
                let location = match rewrite_location(&raw, self.mapping.rules(&ctx.domain_suffix)) {
                    Cow::Borrowed(_) => location.clone(),
                    Cow::Owned(rewritten) => {
                        debug!("Redirect {} -> {}", raw, rewritten);
                        HeaderValue::from_str(&rewritten).context("Invalid redirect location")?
                    }
                };
                return Ok(Self::redirect_response(status, location));
            }
        }

        let headers = caller_response_headers(upstream.headers());
        let content_type = upstream
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = upstream
            .bytes()
            .await
            .context("Failed to read upstream response body")?;

        let same_origin_host = ctx.is_default.then_some(ctx.effective_hostname.as_str());
        let body = rewrite_body(
            bytes,
            &content_type,
            self.mapping.rules(&ctx.domain_suffix),
            same_origin_host,
        );

        let mut response = Response::new(full_body(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Create preflight response
    fn preflight_response() -> Response<ProxyBody> {
        let mut response = Response::new(empty_body());
        *response.headers_mut() = preflight_headers();
        response
    }

    /// Create redirect response
    fn redirect_response(status: StatusCode, location: HeaderValue) -> Response<ProxyBody> {
        let mut response = Response::new(empty_body());
        *response.status_mut() = status;
        response.headers_mut().insert(LOCATION, location);
        response
    }
}

/// Create full body
pub fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Create empty body
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedirectRule;
    use crate::forward::UpstreamScheme;
    use crate::mapping::{DefaultEntry, MappingEntry};
    use hyper::header::{ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE};
    use std::time::Duration;

    /// Server whose upstreams all resolve to a closed local port
    fn server() -> ProxyServer {
        let mapping = DomainMapping::new(
            DefaultEntry::default(),
            vec![MappingEntry::new("api.github.com", "v-api.")],
        )
        .unwrap();
        let dead: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let builder = reqwest::Client::builder()
            .resolve("github.com", dead)
            .resolve("api.github.com", dead)
            .timeout(Duration::from_secs(5));
        let forwarder = Forwarder::from_builder(builder, UpstreamScheme::Http).unwrap();
        let config = ProxyConfig {
            redirect: RedirectRule {
                paths: vec!["/login".to_string()],
                target: "https://landing.test".to_string(),
            },
            ..ProxyConfig::default()
        };
        ProxyServer::new(config, Arc::new(mapping), forwarder)
    }

    fn request(method: Method, uri: &str, host: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Host", host)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_bytes(response: Response<ProxyBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_options_short_circuits() {
        let response = server().handle(request(Method::OPTIONS, "/any/path", "nowhere.test")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(response.headers().get(ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_redirect_path_short_circuits() {
        for host in ["gh.mirror.test", "v-api.mirror.test"] {
            let response = server().handle(request(Method::GET, "/login", host)).await;
            assert_eq!(response.status(), StatusCode::FOUND);
            assert_eq!(response.headers().get(LOCATION).unwrap(), "https://landing.test");
            assert!(body_bytes(response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unconfigured_domain_404() {
        let response = server().handle(request(Method::GET, "/x", "www.mirror.test")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(&body_bytes(response).await[..], b"Domain not configured for proxy");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_502() {
        let response = server().handle(request(Method::GET, "/x", "v-api.mirror.test")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"], "Proxy Error");
        assert!(json["message"].as_str().unwrap().contains("api.github.com"));
        assert!(json.get("stack").is_none());
    }
}
