//! Attaches an access token to archive requests.
//!
//! The downloader never builds credentials itself. Callers that need them add
//! middleware to the client they hand to [`crate::ArchiveDownloader`]; this
//! module provides the common bearer-token case.
use async_trait::async_trait;
use http::Extensions;
use reqwest::{
    Request, Response,
    header::{AUTHORIZATION, HeaderValue, InvalidHeaderValue},
};
use reqwest_middleware::{Middleware, Next};

/// Adds `Authorization: Bearer <token>` to requests that carry no
/// authorization yet.
#[derive(Clone)]
pub struct BearerTokenMiddleware {
    header: HeaderValue,
    host: Option<String>,
}

impl BearerTokenMiddleware {
    pub fn new(token: &str) -> Result<Self, InvalidHeaderValue> {
        let mut header = HeaderValue::from_str(&format!("Bearer {}", token.trim()))?;
        header.set_sensitive(true);
        Ok(Self { header, host: None })
    }

    /// Only send the token to `host`.
    #[must_use]
    pub fn for_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    fn applies_to(&self, request: &Request) -> bool {
        self.host
            .as_deref()
            .is_none_or(|host| request.url().host_str() == Some(host))
    }
}

impl std::fmt::Debug for BearerTokenMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenMiddleware")
            .field("header", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

#[async_trait]
impl Middleware for BearerTokenMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if self.applies_to(&req) && !req.headers().contains_key(AUTHORIZATION) {
            tracing::trace!("attaching bearer token for {}", req.url());
            req.headers_mut().insert(AUTHORIZATION, self.header.clone());
        }
        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use url::Url;

    use super::*;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn test_applies_to_every_host_by_default() {
        let middleware = BearerTokenMiddleware::new("secret").unwrap();
        assert!(middleware.applies_to(&request("https://github.com/acme/widgets")));
        assert!(middleware.applies_to(&request("https://codeload.github.com/acme/widgets")));
    }

    #[test]
    fn test_host_restriction() {
        let middleware = BearerTokenMiddleware::new("secret")
            .unwrap()
            .for_host("github.com");
        assert!(middleware.applies_to(&request("https://github.com/acme/widgets")));
        assert!(!middleware.applies_to(&request("https://example.com/acme/widgets")));
    }

    #[test]
    fn test_token_is_not_printed() {
        let middleware = BearerTokenMiddleware::new("secret").unwrap();
        assert!(!format!("{middleware:?}").contains("secret"));
    }

    #[test]
    fn test_rejects_tokens_with_newlines() {
        assert!(BearerTokenMiddleware::new("sec\nret").is_err());
    }
}
