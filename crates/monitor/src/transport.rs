//! reqwest-backed HTTP transport for endpoint probes

use async_trait::async_trait;
use monitor_lib::{HttpMethod, HttpTransport, TransportError};
use std::time::Duration;

/// Issues probe requests with a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("podwatch/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        http_method: HttpMethod,
        url: &str,
        timeout: Duration,
    ) -> Result<u16, TransportError> {
        let response = self
            .client
            .request(method(http_method), url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout.as_millis())
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_status_code() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let status = transport
            .request(
                HttpMethod::Get,
                &format!("{}/health", server.url()),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(status, 503);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_uses_configured_method() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .with_status(201)
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let status = transport
            .request(
                HttpMethod::Post,
                &format!("{}/orders", server.url()),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(status, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .request(
                HttpMethod::Get,
                "http://127.0.0.1:1/health",
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Connection(_)));
    }
}
