//! Outbound HTTP seam used by the carrier adapters.
//!
//! Adapters only build [`HttpRequest`]s and read [`HttpResponse`]s; the
//! [`HttpClient`] decides how bytes move. [`FetchClient`] is the Workers
//! implementation, with the per-call timeout enforced here.

use std::time::Duration;

use futures_util::future::{select, Either};
use worker::{AbortController, Delay, Fetch, Headers, Method, Request, RequestInit};

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: String) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[allow(async_fn_in_trait)]
pub trait HttpClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `fetch()`-backed client with an abortable timeout.
#[derive(Debug, Clone, Copy)]
pub struct FetchClient {
    timeout: Duration,
}

impl FetchClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build(&self, request: &HttpRequest) -> worker::Result<Request> {
        let headers = Headers::new();
        for (name, value) in &request.headers {
            headers.set(name, value)?;
        }

        let mut init = RequestInit::new();
        init.with_method(match request.method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
        })
        .with_headers(headers);
        if let Some(body) = &request.body {
            init.with_body(Some(body.as_str().into()));
        }

        Request::new_with_init(&request.url, &init)
    }
}

impl HttpClient for FetchClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let req = self
            .build(request)
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let controller = AbortController::default();
        let signal = controller.signal();
        let fetch = Fetch::Request(req);
        let exchange = Box::pin(async {
            let mut resp = fetch.send_with_signal(&signal).await?;
            let status = resp.status_code();
            let body = resp.text().await?;
            Ok::<_, worker::Error>(HttpResponse { status, body })
        });
        let timer = Box::pin(Delay::from(self.timeout));

        // Bound to a local so the raced futures drop before `fetch` and `signal`.
        let outcome = match select(exchange, timer).await {
            Either::Left((result, _)) => result.map_err(|e| TransportError::Network(e.to_string())),
            Either::Right(((), _)) => {
                controller.abort();
                Err(TransportError::Timeout(self.timeout))
            }
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_headers() {
        let req = HttpRequest::get("https://example.test/track")
            .header("Authorization", "Bearer t")
            .header("Content-Type", "application/json");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.header_value("authorization"), Some("Bearer t"));
        assert_eq!(req.header_value("x-missing"), None);
        assert!(req.body.is_none());
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse { status: 200, body: String::new() }.is_success());
        assert!(HttpResponse { status: 204, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 301, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 404, body: String::new() }.is_success());
    }
}
