//! Typed outgoing response, projected into the environment contract.
//!
//! Build a [`Response`] and [`send`](Response::send) it into the exchange.
//! Sending copies status, reason phrase and headers into the response state
//! machine and streams the body through the environment's body writer — the
//! same path a raw-environment application takes, so commit and framing
//! semantics are identical either way.

use bytes::Bytes;

use crate::env::{Env, Value};
use crate::error::Error;
use crate::headers::Headers;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    MsgPack,      // application/msgpack
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::MsgPack     => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use trestle::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(204);
/// ```
///
/// # Builder (custom status, reason, or headers)
///
/// ```rust
/// use trestle::{ContentType, Response};
///
/// Response::builder()
///     .status(201)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder()
///     .status(200)
///     .reason("Totally Fine")
///     .bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
pub struct Response {
    status: u16,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// `200 OK` — `application/json`.
    ///
    /// Pass bytes from your serialiser directly — no intermediate allocation.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::bytes_raw("application/json", body.into())
    }

    /// `200 OK` — `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::bytes_raw("text/plain; charset=utf-8", body.into().into_bytes().into())
    }

    /// Response with no body.
    pub fn status(code: u16) -> Self {
        Self {
            status: code,
            reason: None,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Builder for responses that need a custom status, reason phrase, or
    /// extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder {
            status: 200,
            reason: None,
            headers: Headers::new(),
        }
    }

    fn bytes_raw(content_type: &str, body: Bytes) -> Self {
        let mut headers = Headers::new();
        headers.set("content-type", vec![content_type.to_owned()]);
        Self {
            status: 200,
            reason: None,
            headers,
            body,
        }
    }

    /// Projects this response into the exchange.
    ///
    /// Status, reason and headers land in the buffered head; a
    /// content-length is declared from the body size unless the response
    /// already carries one; the body goes through the environment's writer.
    /// Commit happens on the first body byte — or at completion, for an
    /// empty body.
    pub async fn send(self, env: &Env) -> Result<(), Error> {
        env.reply().set_status(Value::Int(self.status.into()));
        if let Some(reason) = self.reason {
            env.reply().set_reason(Value::Str(reason));
        }

        let response_headers = env.response_headers();
        for (name, values) in self.headers.iter() {
            response_headers.set(name, values.to_vec());
        }
        if !self.headers.contains("content-length") {
            response_headers.set("content-length", vec![self.body.len().to_string()]);
        }

        if !self.body.is_empty() {
            env.body().write(self.body).await?;
        }
        Ok(())
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to 200. Terminated by a
/// typed body method — you always know what you're sending.
pub struct ResponseBuilder {
    status: u16,
    reason: Option<String>,
    headers: Headers,
}

impl ResponseBuilder {
    pub fn status(mut self, code: u16) -> Self {
        self.status = code;
        self
    }

    /// Custom reason phrase for the status line.
    pub fn reason(mut self, phrase: impl Into<String>) -> Self {
        self.reason = Some(phrase.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish("application/json", body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish("text/plain; charset=utf-8", body.into().into_bytes().into())
    }

    /// Terminate with a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type.as_str(), body.into())
    }

    /// Terminate with no body (e.g. 204, 301).
    pub fn no_body(self) -> Response {
        Response {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: Bytes::new(),
        }
    }

    fn finish(mut self, content_type: &str, body: Bytes) -> Response {
        if !self.headers.contains("content-type") {
            self.headers.set("content-type", vec![content_type.to_owned()]);
        }
        Response {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferMode;

    #[tokio::test]
    async fn send_projects_head_and_declares_length() {
        let (env, mut driver) = Env::exchange();
        let reply = driver.reply();

        Response::builder()
            .status(201)
            .reason("Made")
            .header("location", "/users/9")
            .json(br#"{"id":9}"#.to_vec())
            .send(&env)
            .await
            .unwrap();
        reply.finish(Ok(())).await;

        let head = driver.head().await.unwrap();
        assert_eq!(head.status, http::StatusCode::CREATED);
        assert_eq!(head.reason.as_deref(), Some("Made"));
        assert_eq!(head.headers.get("location").unwrap(), "/users/9");
        assert_eq!(head.mode, TransferMode::Fixed { declared: 8 });
    }

    #[tokio::test]
    async fn empty_ok_response_declares_zero_length() {
        let (env, mut driver) = Env::exchange();
        let reply = driver.reply();

        Response::status(200).send(&env).await.unwrap();
        reply.finish(Ok(())).await;

        let head = driver.head().await.unwrap();
        assert_eq!(head.status, http::StatusCode::OK);
        assert_eq!(head.mode, TransferMode::Fixed { declared: 0 });
    }

    #[tokio::test]
    async fn bodyless_status_suppresses_framing() {
        let (env, mut driver) = Env::exchange();
        let reply = driver.reply();

        Response::status(204).send(&env).await.unwrap();
        reply.finish(Ok(())).await;

        let head = driver.head().await.unwrap();
        assert_eq!(head.status, http::StatusCode::NO_CONTENT);
        assert_eq!(head.mode, TransferMode::Suppressed);
        assert!(head.headers.get("content-length").is_none());
    }
}
