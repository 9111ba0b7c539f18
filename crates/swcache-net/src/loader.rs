//! reqwest-backed [`Fetcher`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{Fetcher, NetError, Request, Response};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout. `None` waits for the platform to give up.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("swcache/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            max_redirects: 10,
        }
    }
}

/// Loads resources from the network.
#[derive(Debug, Clone)]
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(
            user_agent = %config.user_agent,
            timeout = ?config.timeout,
            "ResourceLoader initialized"
        );

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}

impl ResourceLoader {
    fn map_error(&self, error: reqwest::Error) -> NetError {
        match self.config.timeout {
            Some(timeout) if error.is_timeout() => NetError::Timeout(timeout),
            _ => NetError::HttpError(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue, Method, StatusCode};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("swcache/"));
        assert!(config.timeout.is_none());
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/styles.css"))
            .and(header("x-requested-with", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("body {}", "text/css"))
            .expect(1)
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let request = Request::parse(&format!("{}/static/styles.css", server.uri()))
            .unwrap()
            .header(
                HeaderName::from_static("x-requested-with"),
                HeaderValue::from_static("1"),
            );

        let response = loader.fetch(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("text/css"));
        assert_eq!(response.text().unwrap(), "body {}");
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let request = Request::parse(&format!("{}/missing", server.uri())).unwrap();

        let response = loader.fetch(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.ok());
        assert_eq!(response.text().unwrap(), "gone");
    }

    #[tokio::test]
    async fn test_fetch_forwards_method_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/enviar"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = url::Url::parse(&format!("{}/enviar", server.uri())).unwrap();
        let request = Request::new(Method::POST, url).body("nombre=test");

        let response = loader.fetch(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        })
        .unwrap();
        let request = Request::parse(&format!("{}/", server.uri())).unwrap();

        let err = loader.fetch(&request).await.unwrap_err();
        assert!(matches!(err, NetError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let request = Request::parse(&format!("http://{addr}/")).unwrap();

        let err = loader.fetch(&request).await.unwrap_err();
        assert!(matches!(err, NetError::HttpError(_)));
    }
}
