//! Typed incoming request, built from the environment contract.
//!
//! The environment speaks in loose keys; most application code would rather
//! hold a real method, a real URI and a real header map. [`Request::from_env`]
//! is that bridge — a smaller, parallel concern to the response adapter,
//! reusing the same data model in the other direction.

use std::sync::OnceLock;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};

use crate::body::BodyReader;
use crate::env::{keys, CancelSignal, Env};
use crate::error::Error;
use crate::headers::Headers;

/// A typed view of one incoming HTTP exchange.
///
/// Owns the environment it was built from; downstream consumers that need
/// raw access to custom slots still have it via [`Request::env`].
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    overflow: Vec<(String, Vec<String>)>,
    body: BodyReader,
    cancel: CancelSignal,
    client_certificate: Option<Bytes>,
    is_local: OnceLock<bool>,
    env: Env,
}

impl Request {
    /// Builds the typed request out of the environment.
    ///
    /// The method must be present and valid. The URI is reconstructed from
    /// scheme + `Host` header + path-base + path + query; scheme, paths and
    /// query default to empty/`http` when absent, and a missing or malformed
    /// `Host` falls back to loopback with the scheme-implied port.
    pub fn from_env(mut env: Env) -> Result<Request, Error> {
        let method_str = env.get::<&str>(keys::REQUEST_METHOD)?;
        let method = Method::from_bytes(method_str.as_bytes())
            .map_err(|_| Error::InvalidMethod(method_str.to_owned()))?;

        // Snapshot the header slot so the environment stays free for the
        // mutable takes below.
        let env_headers = env
            .try_get::<&Headers>(keys::REQUEST_HEADERS)
            .cloned()
            .unwrap_or_default();
        let uri = reconstruct_uri(&env, &env_headers)?;
        let (headers, overflow) = copy_headers(&env_headers);

        let body = env.take_request_body().unwrap_or_else(BodyReader::empty);
        let cancel = env.cancellation();
        let client_certificate = env.try_get::<&Bytes>(keys::CLIENT_CERTIFICATE).cloned();

        Ok(Request {
            method,
            uri,
            headers,
            overflow,
            body,
            cancel,
            client_certificate,
            is_local: OnceLock::new(),
            env,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Headers the typed collection rejected — carried instead of dropped.
    pub fn overflow_headers(&self) -> &[(String, Vec<String>)] {
        &self.overflow
    }

    /// Takes the body stream, leaving an empty one behind.
    pub fn take_body(&mut self) -> BodyReader {
        std::mem::replace(&mut self.body, BodyReader::empty())
    }

    pub fn cancellation(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// DER bytes of the client certificate, when the listener captured one.
    pub fn client_certificate(&self) -> Option<&Bytes> {
        self.client_certificate.as_ref()
    }

    /// Whether the connection originates on this machine. Evaluated from the
    /// environment on first use.
    pub fn is_local(&self) -> bool {
        *self
            .is_local
            .get_or_init(|| self.env.try_get::<bool>(keys::IS_LOCAL).unwrap_or(false))
    }

    /// The environment this request was built from.
    pub fn env(&self) -> &Env {
        &self.env
    }
}

// ── URI reconstruction ────────────────────────────────────────────────────────

fn reconstruct_uri(env: &Env, headers: &Headers) -> Result<Uri, Error> {
    let scheme = env.try_get::<&str>(keys::REQUEST_SCHEME).unwrap_or("http");
    let path_base = env.try_get::<&str>(keys::REQUEST_PATH_BASE).unwrap_or("");
    let path = env.try_get::<&str>(keys::REQUEST_PATH).unwrap_or("");
    let query = env.try_get::<&str>(keys::REQUEST_QUERY).unwrap_or("");

    let (host, port) = host_and_port(headers, scheme);
    let mut target = format!("{scheme}://{host}:{port}{path_base}{path}");
    if !query.is_empty() {
        target.push('?');
        target.push_str(query);
    }
    target.parse().map_err(|_| Error::InvalidUri(target))
}

/// Authority from the `Host` header: split on the last colon, and a suffix
/// that parses as a non-negative integer is the port — otherwise the whole
/// value is the hostname. Multiple or malformed `Host` values fall back to
/// loopback with the scheme-implied port.
fn host_and_port(headers: &Headers, scheme: &str) -> (String, u16) {
    let default_port = if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 };

    let Some(values) = headers.get("Host") else {
        return ("127.0.0.1".to_owned(), default_port);
    };
    if values.len() != 1 || values[0].trim().is_empty() {
        return ("127.0.0.1".to_owned(), default_port);
    }

    let value = values[0].trim();
    match value.rsplit_once(':') {
        Some((host, suffix)) => match suffix.parse::<u16>() {
            Ok(port) => (host.to_owned(), port),
            Err(_) => (value.to_owned(), default_port),
        },
        None => (value.to_owned(), default_port),
    }
}

/// Copies environment headers into the typed collection; names or values the
/// typed collection rejects get a second chance in the overflow list rather
/// than failing the request.
fn copy_headers(src: &Headers) -> (HeaderMap, Vec<(String, Vec<String>)>) {
    let mut map = HeaderMap::new();
    let mut overflow = Vec::new();

    for (name, values) in src.iter() {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            overflow.push((name.to_owned(), values.to_vec()));
            continue;
        };
        let parsed: Result<Vec<HeaderValue>, _> =
            values.iter().map(|v| HeaderValue::from_str(v)).collect();
        match parsed {
            Ok(parsed) => {
                for value in parsed {
                    map.append(&header_name, value);
                }
            }
            Err(_) => overflow.push((name.to_owned(), values.to_vec())),
        }
    }
    (map, overflow)
}
