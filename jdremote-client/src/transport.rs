//! HTTP seam: the connector only needs blocking GET and POST returning status and body.

use std::time::Duration;

/// Status code and raw body of an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Blocking HTTP used by the connectors. Implementations must bound every call by a timeout.
pub trait HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
    fn post(&self, url: &str, content_type: &str, body: String) -> Result<HttpResponse, TransportError>;
}

/// Network-level failure: timeout, refused connection, unreadable body.
#[derive(Debug, thiserror::Error)]
#[error("{url}: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
}

impl TransportError {
    pub fn new(url: &str, message: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

/// [`HttpTransport`] over `reqwest`'s blocking client.
pub struct ReqwestTransport {
    http: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::new("", e.to_string()))?;
        Ok(Self { http })
    }

    fn finish(
        url: &str,
        resp: reqwest::Result<reqwest::blocking::Response>,
    ) -> Result<HttpResponse, TransportError> {
        let resp = resp.map_err(|e| TransportError::new(url, e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .map_err(|e| TransportError::new(url, e.to_string()))?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        Self::finish(url, self.http.get(url).send())
    }

    fn post(&self, url: &str, content_type: &str, body: String) -> Result<HttpResponse, TransportError> {
        Self::finish(
            url,
            self.http
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body)
                .send(),
        )
    }
}
