//! The per-exchange environment: the contract between listener and
//! application.
//!
//! One [`Env`] describes one HTTP exchange. The listener creates it,
//! populates the request-side slots, and hands it to the application
//! delegate; the delegate reads the request, mutates the response slots,
//! and writes body bytes. Scalar and header slots travel through
//! [`Env::get`] / [`Env::set`] under the well-known [`keys`]; the
//! stream-valued slots — request body, response body writer, cancellation,
//! commit-callback registration — surface as dedicated methods, because a
//! stream is not a value you can meaningfully copy out of a map.
//!
//! Lookup is strict: a missing key is [`Error::MissingKey`], a present key
//! of the wrong kind is [`Error::TypeMismatch`]. Use [`Env::try_get`] when
//! absence is an expected state.
//!
//! Response keys passed to [`Env::set`] are not stored in the map — they
//! route into the response state machine, so dictionary-style mutation
//! observes the buffering and commit semantics of [`crate::reply`].

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::body::{BodyReader, BodyWriter, StreamedBody};
use crate::error::Error;
use crate::headers::Headers;
use crate::reply::{Head, Reply, Staged};

/// Body frames buffered between application writes and the engine.
const BODY_CHANNEL_DEPTH: usize = 32;

/// Well-known environment keys, stable across the system.
pub mod keys {
    pub const REQUEST_METHOD: &str = "request.method";
    pub const REQUEST_SCHEME: &str = "request.scheme";
    pub const REQUEST_PATH_BASE: &str = "request.path_base";
    pub const REQUEST_PATH: &str = "request.path";
    pub const REQUEST_QUERY: &str = "request.query";
    pub const REQUEST_HEADERS: &str = "request.headers";
    /// Method-backed: [`super::Env::take_request_body`].
    pub const REQUEST_BODY: &str = "request.body";
    pub const RESPONSE_STATUS: &str = "response.status";
    pub const RESPONSE_REASON: &str = "response.reason";
    pub const RESPONSE_HEADERS: &str = "response.headers";
    /// Method-backed: [`super::Env::body`].
    pub const RESPONSE_BODY: &str = "response.body";
    pub const RESPONSE_PROTOCOL: &str = "response.protocol";
    /// Method-backed: [`super::Env::cancellation`].
    pub const CALL_CANCELLED: &str = "exchange.cancelled";
    /// Method-backed: [`super::Env::on_commit`].
    pub const ON_COMMIT: &str = "exchange.on_commit";
    pub const CLIENT_CERTIFICATE: &str = "client.certificate";
    pub const IS_LOCAL: &str = "client.is_local";
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// A loosely-typed environment value. Typing is per-key by convention;
/// response-side values are validated at commit, not at insertion, so a
/// misfiled value surfaces exactly where the original contract surfaced it.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Headers(Headers),
    Bytes(Bytes),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::Int(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Headers> for Value {
    fn from(v: Headers) -> Self {
        Self::Headers(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

/// Typed extraction from a [`Value`], used by [`Env::get`].
pub trait FromValue<'a>: Sized {
    /// Human name of the expected kind, for [`Error::TypeMismatch`].
    const EXPECTED: &'static str;

    fn from_value(value: &'a Value) -> Option<Self>;
}

impl<'a> FromValue<'a> for &'a str {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for &'a Headers {
    const EXPECTED: &'static str = "header collection";

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Headers(h) => Some(h),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for &'a Bytes {
    const EXPECTED: &'static str = "byte string";

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

// ── CancelSignal ──────────────────────────────────────────────────────────────

/// Connection-sourced cancellation, flipped when the native response body is
/// dropped — the response finished or the connection died. The adapter does
/// not poll it; pass it into long waits and pending writes so they abort
/// promptly.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the exchange is cancelled.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            // A dropped sender is the same news: the exchange is over.
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ── Env ───────────────────────────────────────────────────────────────────────

/// The environment for one HTTP exchange.
pub struct Env {
    slots: HashMap<String, Value>,
    reply: Reply,
    writer: BodyWriter,
    request_body: Option<BodyReader>,
    cancel: CancelSignal,
}

impl Env {
    /// Opens a fresh exchange: the application-facing environment plus the
    /// listener-facing [`Driver`] that receives the committed head and the
    /// streamed body.
    pub fn exchange() -> (Env, Driver) {
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
        let (head_tx, head_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let reply = Reply::new(body_tx, head_tx);
        let env = Env {
            slots: HashMap::new(),
            reply: reply.clone(),
            writer: BodyWriter::new(reply.clone()),
            request_body: None,
            cancel: CancelSignal { rx: cancel_rx },
        };
        let driver = Driver {
            reply,
            head: head_rx,
            body: Some(StreamedBody::new(body_rx, cancel_tx)),
        };
        (env, driver)
    }

    /// Typed lookup of a request-side or custom slot.
    pub fn get<'a, T: FromValue<'a>>(&'a self, key: &str) -> Result<T, Error> {
        let value = self
            .slots
            .get(key)
            .ok_or_else(|| Error::MissingKey(key.to_owned()))?;
        T::from_value(value).ok_or_else(|| Error::TypeMismatch {
            key: key.to_owned(),
            expected: T::EXPECTED,
        })
    }

    /// Like [`Env::get`], for keys whose absence is an expected state.
    pub fn try_get<'a, T: FromValue<'a>>(&'a self, key: &str) -> Option<T> {
        self.slots.get(key).and_then(T::from_value)
    }

    /// Stores a value under `key`. Response-side keys route into the
    /// response state machine instead of the map: they buffer until commit
    /// and are discarded after it.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match key.as_str() {
            keys::RESPONSE_STATUS => self.reply.set_status(value),
            keys::RESPONSE_REASON => self.reply.set_reason(value),
            keys::RESPONSE_PROTOCOL => self.reply.set_protocol(value),
            keys::RESPONSE_HEADERS => match value {
                Value::Headers(headers) => self.reply.replace_headers(headers),
                // Tolerated, not honored — the original contract let an
                // application null this slot out and still complete.
                other => debug!(value = ?other, "ignoring non-header value for response headers"),
            },
            _ => {
                self.slots.insert(key, value);
            }
        }
    }

    /// Handle onto the buffered response headers.
    pub fn response_headers(&self) -> ResponseHeaders {
        ResponseHeaders {
            reply: self.reply.clone(),
        }
    }

    /// The response body stream. First write commits the response.
    pub fn body(&self) -> BodyWriter {
        self.writer.clone()
    }

    /// Registers a callback to run just before the head is pushed to the
    /// wire. Registered after commit, it runs immediately and synchronously.
    pub fn on_commit(&self, callback: impl FnOnce(&mut Staged) + Send + 'static) {
        self.reply.on_commit(Box::new(callback));
    }

    /// Takes the request body stream. Subsequent calls return `None`.
    pub fn take_request_body(&mut self) -> Option<BodyReader> {
        self.request_body.take()
    }

    /// Listener-side: attaches the parsed request body.
    pub fn attach_request_body(&mut self, body: BodyReader) {
        self.request_body = Some(body);
    }

    /// The exchange's cancellation signal.
    pub fn cancellation(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Handle onto the response state, for middleware that needs the
    /// committed status after the delegate ran.
    pub fn reply(&self) -> Reply {
        self.reply.clone()
    }
}

/// Mutating handle onto the buffered response headers. All operations are
/// discarded once the response has committed.
pub struct ResponseHeaders {
    reply: Reply,
}

impl ResponseHeaders {
    pub fn set(&self, name: impl Into<String>, values: Vec<String>) {
        self.reply.with_headers(|h| h.set(name, values));
    }

    pub fn append(&self, name: impl Into<String>, value: impl Into<String>) {
        self.reply.with_headers(|h| h.append(name, value));
    }

    pub fn remove(&self, name: &str) {
        self.reply.with_headers(|h| h.remove(name));
    }

    /// Snapshot of the current values for `name`.
    pub fn get(&self, name: &str) -> Option<Vec<String>> {
        self.reply
            .with_headers(|h| h.get(name).map(<[String]>::to_vec))
            .flatten()
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

/// The listener's side of an exchange: awaits the committed head and owns
/// the streamed body.
pub struct Driver {
    reply: Reply,
    head: oneshot::Receiver<Result<Head, Error>>,
    body: Option<StreamedBody>,
}

impl Driver {
    /// Handle for the supervisor that completes the exchange when the
    /// delegate's task settles.
    pub fn reply(&self) -> Reply {
        self.reply.clone()
    }

    /// Waits for the commit instant and returns the frozen head, or the
    /// contract violation that degraded the exchange.
    pub async fn head(&mut self) -> Result<Head, Error> {
        match (&mut self.head).await {
            Ok(result) => result,
            // The exchange evaporated without committing.
            Err(_) => Err(Error::Aborted),
        }
    }

    /// The body to hand to the native engine. Single use.
    pub fn take_body(&mut self) -> Option<StreamedBody> {
        self.body.take()
    }
}
