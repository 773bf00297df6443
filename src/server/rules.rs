//! Per-server state and rule evaluation
//!
//! Rules are evaluated with a fixed precedence regardless of declaration
//! order: authentication, expected headers, rejected headers, forced
//! response. `SendHeader` only decorates responses that got past the
//! authentication check.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use indexmap::IndexMap;

use crate::testing::{Credentials, ResourceFile, RuleSet, RuleSpec, ServerSettings};

use super::request::{Request, Response};

/// A file as hosted by the server
#[derive(Debug, Clone)]
struct HostedFile {
    content: Vec<u8>,
    timestamp: Option<i64>,
    rules: RuleSet,
}

/// Mutable state of one mock server
#[derive(Debug)]
pub struct ServerState {
    files: IndexMap<String, HostedFile>,
    settings: ServerSettings,
    observed: BTreeSet<String>,
    realm: String,
}

impl ServerState {
    pub fn new(realm: &str) -> Self {
        Self {
            files: IndexMap::new(),
            settings: ServerSettings::default(),
            observed: BTreeSet::new(),
            realm: realm.to_string(),
        }
    }

    /// Replace the hosted files
    pub fn configure(&mut self, files: Vec<ResourceFile>) {
        self.files = files
            .into_iter()
            .map(|file| {
                (
                    file.name,
                    HostedFile {
                        content: file.content.into_bytes(),
                        timestamp: file.timestamp,
                        rules: file.rules,
                    },
                )
            })
            .collect();
    }

    pub fn apply_settings(&mut self, settings: &ServerSettings) {
        self.settings = settings.clone();
    }

    pub fn observed(&self) -> BTreeSet<String> {
        self.observed.clone()
    }

    /// Produce the response for one request
    pub fn handle(&mut self, request: &Request) -> Response {
        let response = self.respond(request);
        self.decorate(response)
    }

    fn respond(&mut self, request: &Request) -> Response {
        if !matches!(request.method.as_str(), "GET" | "HEAD" | "POST" | "PUT") {
            return Response::error(501, "Method not implemented");
        }

        let name = request.resource_name().to_string();
        let rules = self
            .files
            .get(&name)
            .map(|file| file.rules.clone())
            .unwrap_or_default();

        if let Some(denied) = self.check_rules(request, &rules) {
            return denied;
        }

        let response = match request.method.as_str() {
            "POST" => self.post(&name, &request.body),
            "PUT" => self.put(&name, &request.body),
            _ => match self.files.get(&name) {
                Some(file) => content_response(200, file),
                None => Response::error(404, "Not Found"),
            },
        };

        send_headers(response, &rules)
    }

    /// Returns the response that stops the request, if any rule does
    fn check_rules(&mut self, request: &Request, rules: &RuleSet) -> Option<Response> {
        for rule in rules.iter() {
            if let RuleSpec::Authentication(credentials) = rule {
                if !is_authorized(request, credentials) {
                    tracing::debug!(user = %credentials.user, "Authentication required");
                    return Some(
                        Response::error(401, "Authorization Required").with_header(
                            "WWW-Authenticate",
                            format!("Basic realm=\"{}\"", self.realm),
                        ),
                    );
                }
            }
        }

        let mut failed = false;
        for rule in rules.iter() {
            match rule {
                RuleSpec::ExpectHeader(headers) => {
                    for (name, value) in headers {
                        if request.header(name) == Some(value.as_str()) {
                            self.observed.insert(name.clone());
                        } else {
                            tracing::debug!(header = %name, "Expected header not found");
                            failed = true;
                        }
                    }
                }
                RuleSpec::RejectHeader(headers) => {
                    for (name, value) in headers {
                        if request.header(name) == Some(value.as_str()) {
                            tracing::debug!(header = %name, "Rejected header sent");
                            self.observed.insert(name.clone());
                            failed = true;
                        }
                    }
                }
                _ => {}
            }
        }
        if failed {
            return Some(send_headers(
                Response::error(400, "Header expectations not met"),
                rules,
            ));
        }

        rules.iter().find_map(|rule| match rule {
            RuleSpec::Response(code) => Some(send_headers(Response::new(*code), rules)),
            _ => None,
        })
    }

    fn post(&mut self, name: &str, body: &[u8]) -> Response {
        let file = self.files.entry(name.to_string()).or_insert_with(|| HostedFile {
            content: Vec::new(),
            timestamp: None,
            rules: RuleSet::default(),
        });
        if !file.content.is_empty() {
            file.content.push(b'\n');
        }
        file.content.extend_from_slice(body);
        content_response(200, file)
    }

    fn put(&mut self, name: &str, body: &[u8]) -> Response {
        match self.files.get_mut(name) {
            Some(file) => {
                file.content = body.to_vec();
                Response::new(200)
            }
            None => {
                self.files.insert(
                    name.to_string(),
                    HostedFile {
                        content: body.to_vec(),
                        timestamp: None,
                        rules: RuleSet::default(),
                    },
                );
                Response::new(201)
            }
        }
    }

    /// Attach the server-wide headers
    fn decorate(&self, mut response: Response) -> Response {
        if let Some(server) = &self.settings.server_name {
            response = response.with_header("Server", server.clone());
        }
        for (name, value) in &self.settings.headers {
            response = response.with_header(name.clone(), value.clone());
        }
        response
    }
}

fn content_response(status: u16, file: &HostedFile) -> Response {
    let mut response = Response::new(status)
        .with_header("Content-Type", "text/plain")
        .with_body(file.content.clone());
    if let Some(modified) = file.timestamp.and_then(http_date) {
        response = response.with_header("Last-Modified", modified);
    }
    response
}

fn send_headers(mut response: Response, rules: &RuleSet) -> Response {
    for rule in rules.iter() {
        if let RuleSpec::SendHeader(headers) = rule {
            for (name, value) in headers {
                response = response.with_header(name.clone(), value.clone());
            }
        }
    }
    response
}

fn is_authorized(request: &Request, credentials: &Credentials) -> bool {
    let Some(authorization) = request.header("Authorization") else {
        return false;
    };
    let Some((scheme, encoded)) = authorization.split_once(' ') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("Basic") {
        return false;
    }

    let expected = format!("{}:{}", credentials.user, credentials.pass);
    STANDARD
        .decode(encoded.trim())
        .map(|decoded| decoded == expected.as_bytes())
        .unwrap_or(false)
}

/// RFC 7231 IMF-fixdate
fn http_date(timestamp: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}
