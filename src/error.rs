//! Request-level errors and how each one is shown to the caller

use crate::config::RuntimeMode;
use crate::proxy::{full_body, ProxyBody};
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// No prefix matched, or the matched prefix has no upstream domain
    #[error("Domain not configured for proxy")]
    UnresolvedDomain,

    #[error("Missing Host header")]
    MissingHost,

    /// Anything that went wrong while building, sending or reading the
    /// upstream exchange
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),

    #[error("Request exceeded the {0:?} execution limit")]
    Timeout(Duration),
}

#[derive(Debug, Serialize)]
struct FailureBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnresolvedDomain => StatusCode::NOT_FOUND,
            ProxyError::MissingHost => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Render the error. The error chain is only exposed in development mode.
    pub fn into_response(self, mode: RuntimeMode) -> Response<ProxyBody> {
        let status = self.status();

        let (content_type, body) = match &self {
            ProxyError::UnresolvedDomain | ProxyError::MissingHost => {
                ("text/plain", Bytes::from(self.to_string()))
            }
            ProxyError::Upstream(_) | ProxyError::Timeout(_) => {
                let stack = match (&self, mode) {
                    (ProxyError::Upstream(e), RuntimeMode::Development) => Some(format!("{:?}", e)),
                    (ProxyError::Timeout(_), RuntimeMode::Development) => Some(format!("{:?}", self)),
                    _ => None,
                };
                let failure = FailureBody {
                    error: "Proxy Error",
                    message: self.to_string(),
                    stack,
                };
                let json = serde_json::to_vec(&failure)
                    .unwrap_or_else(|_| br#"{"error":"Proxy Error"}"#.to_vec());
                ("application/json", Bytes::from(json))
            }
        };

        let mut response = Response::new(full_body(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use http_body_util::BodyExt;

    async fn body_json(response: Response<ProxyBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unresolved_domain_is_plain_404() {
        let response = ProxyError::UnresolvedDomain.into_response(RuntimeMode::Production);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"Domain not configured for proxy");
    }

    #[tokio::test]
    async fn test_upstream_failure_hides_stack_in_production() {
        let err = ProxyError::from(anyhow!("connection refused").context("Upstream request failed"));
        let response = err.into_response(RuntimeMode::Production);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");

        let json = body_json(response).await;
        assert_eq!(json["error"], "Proxy Error");
        assert_eq!(json["message"], "Upstream request failed");
        assert!(json.get("stack").is_none());
    }

    #[tokio::test]
    async fn test_upstream_failure_shows_chain_in_development() {
        let err = ProxyError::from(anyhow!("connection refused").context("Upstream request failed"));
        let json = body_json(err.into_response(RuntimeMode::Development)).await;
        let stack = json["stack"].as_str().unwrap();
        assert!(stack.contains("Upstream request failed"));
        assert!(stack.contains("connection refused"));
    }

    #[test]
    fn test_timeout_status() {
        let response = ProxyError::Timeout(Duration::from_secs(30)).into_response(RuntimeMode::Production);
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
