//! The network seam: request/response types and the `Fetch` trait.
//!
//! The engine never talks to the network directly. Everything goes through a
//! host-provided [`Fetch`] backend, which keeps the Sosika backend API a black
//! box and lets tests script responses.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::SwError;

/// Boxed future returned by [`Fetch::fetch`].
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<FetchResponse, SwError>> + Send>>;

/// Network backend the worker fetches through.
pub trait Fetch: Send + Sync {
    /// Perform a network fetch for the given request.
    fn fetch(&self, request: FetchRequest) -> FetchFuture;
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HeaderMap,

    /// Whether this is a top-level navigation (HTML document) request.
    pub is_navigation: bool,
}

impl FetchRequest {
    /// Create a plain GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            is_navigation: false,
        }
    }

    /// Create a navigation (HTML document) request.
    pub fn navigation(url: Url) -> Self {
        Self {
            is_navigation: true,
            ..Self::get(url)
        }
    }
}

/// A response, either from the network or rebuilt from a cache entry.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,
}

impl FetchResponse {
    /// Create an empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create a 200 response with a body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Check if the response is a success (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the response may be written to a cache.
    ///
    /// Only plain 200 responses are stored; anything else could poison the
    /// cache with error pages or partial content.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Get body as text.
    pub fn text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.to_vec())
    }
}

/// Adapter turning a closure into a [`Fetch`] backend.
pub struct FetchFn<F>(F);

impl<F> FetchFn<F>
where
    F: Fn(FetchRequest) -> FetchFuture + Send + Sync,
{
    /// Wrap a closure as a fetch backend.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Fetch for FetchFn<F>
where
    F: Fn(FetchRequest) -> FetchFuture + Send + Sync,
{
    fn fetch(&self, request: FetchRequest) -> FetchFuture {
        (self.0)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_request() {
        let url = Url::parse("https://app.sosika.dev/orders").unwrap();
        let request = FetchRequest::navigation(url.clone());

        assert!(request.is_navigation);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, url);
    }

    #[test]
    fn test_cacheable() {
        assert!(FetchResponse::ok("hello").is_cacheable());
        assert!(!FetchResponse::new(StatusCode::NO_CONTENT).is_cacheable());
        assert!(!FetchResponse::new(StatusCode::NOT_FOUND).is_cacheable());
        assert!(!FetchResponse::new(StatusCode::PARTIAL_CONTENT).is_cacheable());
    }

    #[tokio::test]
    async fn test_fetch_fn() {
        let backend = FetchFn::new(|request: FetchRequest| -> FetchFuture {
            Box::pin(async move {
                if request.url.path() == "/menu" {
                    Ok(FetchResponse::ok("vendors"))
                } else {
                    Err(SwError::Network("unreachable".to_string()))
                }
            })
        });

        let url = Url::parse("https://app.sosika.dev/menu").unwrap();
        let response = backend.fetch(FetchRequest::get(url)).await.unwrap();
        assert_eq!(response.text().unwrap(), "vendors");

        let url = Url::parse("https://app.sosika.dev/other").unwrap();
        assert!(backend.fetch(FetchRequest::get(url)).await.is_err());
    }
}
