//! Mock download client for integration testing
//!
//! A tiny wget-like client, so the engine can be exercised without the real
//! client under test. It understands a handful of wget options and follows
//! wget's exit code conventions:
//!
//! - `0` everything was downloaded
//! - `1` generic error, such as bad options
//! - `4` network failure
//! - `8` the server issued an error response

use std::process::ExitCode;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Method, StatusCode};

const EXIT_GENERIC: u8 = 1;
const EXIT_IO: u8 = 3;
const EXIT_NETWORK_FAILURE: u8 = 4;
const EXIT_SERVER_ERROR: u8 = 8;

#[derive(Default)]
struct Options {
    method: Option<String>,
    body: Option<String>,
    user: Option<String>,
    password: Option<String>,
    headers: Vec<(String, String)>,
    content_disposition: bool,
    insecure: bool,
    urls: Vec<String>,
}

impl Options {
    fn parse(args: impl Iterator<Item = String>) -> Self {
        let mut options = Options::default();
        for arg in args {
            if let Some(value) = arg.strip_prefix("--method=") {
                options.method = Some(value.to_ascii_uppercase());
            } else if let Some(value) = arg.strip_prefix("--body-data=") {
                options.body = Some(value.to_string());
            } else if let Some(value) = arg.strip_prefix("--user=") {
                options.user = Some(value.to_string());
            } else if let Some(value) = arg.strip_prefix("--password=") {
                options.password = Some(value.to_string());
            } else if let Some(value) = arg.strip_prefix("--header=") {
                if let Some((name, value)) = value.split_once(':') {
                    options
                        .headers
                        .push((name.trim().to_string(), value.trim().to_string()));
                }
            } else if arg == "--content-disposition" {
                options.content_disposition = true;
            } else if arg == "--no-check-certificate" {
                options.insecure = true;
            } else if arg.starts_with('-') {
                // Everything else (-d, -q, ...) is accepted and ignored
            } else {
                options.urls.push(arg);
            }
        }
        options
    }

    /// The request method, as wget resolves it
    fn method(&self) -> Result<Method, String> {
        match (&self.method, &self.body) {
            (Some(method), _) => Method::from_bytes(method.as_bytes())
                .map_err(|_| format!("Invalid method '{}'", method)),
            (None, Some(_)) => Err("You must specify a method through --method=HTTPMethod".into()),
            (None, None) => Ok(Method::GET),
        }
    }
}

fn main() -> ExitCode {
    let options = Options::parse(std::env::args().skip(1));
    let method = match options.method() {
        Ok(method) => method,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    let client = match Client::builder()
        .no_proxy()
        .danger_accept_invalid_certs(options.insecure)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Cannot build client: {}", e);
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    let mut exit = 0;
    for url in &options.urls {
        match fetch(&client, &options, &method, url) {
            Ok(Some(response)) => {
                if let Err(e) = save(&options, &method, url, response) {
                    eprintln!("{}: cannot write file: {}", url, e);
                    return ExitCode::from(EXIT_IO);
                }
            }
            Ok(None) => exit = exit.max(EXIT_SERVER_ERROR),
            Err(e) => {
                eprintln!("{}: {}", url, e);
                exit = exit.max(EXIT_NETWORK_FAILURE);
            }
        }
    }

    ExitCode::from(exit)
}

/// Fetch `url`, answering an authentication challenge once
///
/// Returns `None` when the server answered with an error status.
fn fetch(
    client: &Client,
    options: &Options,
    method: &Method,
    url: &str,
) -> reqwest::Result<Option<Response>> {
    let mut response = build(client, options, method, url).send()?;
    if response.status() == StatusCode::UNAUTHORIZED {
        if let Some(user) = &options.user {
            response = build(client, options, method, url)
                .basic_auth(user, options.password.as_deref())
                .send()?;
        }
    }

    eprintln!("{} {} -> {}", method, url, response.status().as_u16());
    if response.status().is_client_error() || response.status().is_server_error() {
        return Ok(None);
    }
    Ok(Some(response))
}

fn build(client: &Client, options: &Options, method: &Method, url: &str) -> RequestBuilder {
    let mut request = client.request(method.clone(), url);
    for (name, value) in &options.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &options.body {
        request = request.body(body.clone());
    }
    request
}

fn save(options: &Options, method: &Method, url: &str, response: Response) -> std::io::Result<()> {
    if *method == Method::HEAD {
        return Ok(());
    }

    let disposition = options
        .content_disposition
        .then(|| response.headers().get(CONTENT_DISPOSITION))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split("filename=").nth(1))
        .map(|name| name.trim().trim_matches('"').to_string());

    let name = match disposition {
        Some(name) if !name.is_empty() => name,
        _ => {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            match path.rsplit('/').next() {
                Some(last) if !last.is_empty() => last.to_string(),
                _ => "index.html".to_string(),
            }
        }
    };

    let body = response.bytes().map_err(std::io::Error::other)?;
    std::fs::write(name, &body)
}
