//! Request and response views used by the rule engine
//!
//! hyper owns the wire protocol; these types are the plain, owned shapes
//! [`super::rules::ServerState`] works on.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;

/// A fully read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Collect a hyper request, including its whole body
    pub async fn from_hyper(request: hyper::Request<Incoming>) -> hyper::Result<Self> {
        let (parts, body) = request.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(Self {
            method: parts.method.as_str().to_string(),
            target: parts.uri.to_string(),
            headers: parts
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            body: body.to_vec(),
        })
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Name of the hosted resource this request targets
    ///
    /// Accepts both origin-form (`/File1`) and absolute-form
    /// (`http://host:port/File1`) targets; the query string is ignored.
    pub fn resource_name(&self) -> &str {
        let mut target = self.target.as_str();
        if let Some((_, rest)) = target.split_once("://") {
            target = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
        }
        let path = target.split(['?', '#']).next().unwrap_or_default();
        path.trim_start_matches('/')
    }
}

/// A response produced by the rule engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// An error page with a short text body
    pub fn error(status: u16, message: &str) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain")
            .with_body(format!("{} {}\n", status, message))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Convert into a hyper response
    ///
    /// Statuses and headers that are not valid HTTP are dropped with a
    /// warning; an invalid status becomes 500.
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or_else(|_| {
            tracing::warn!(status = self.status, "Invalid status code, answering 500");
            StatusCode::INTERNAL_SERVER_ERROR
        });

        let mut response = hyper::Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping invalid response header"),
            }
        }
        response
    }
}
