//! Response-side state machine: buffer, commit, push.
//!
//! Everything the application says about the response — status, reason
//! phrase, headers, protocol — is buffered here until the commit instant:
//! the first body write, or completion if nothing was ever written. At that
//! instant the pending commit callbacks drain (re-entrant registrations
//! included), the head is validated and frozen, and the final status line
//! and headers are pushed to the native engine. After commit, mutation is
//! discarded without error; the wire cannot be rewound.
//!
//! ```text
//! {Idle} --first write / completion--> {Committed}
//! {Committed} --body count matches--> {Closed-Clean}
//! {Committed} --count mismatch / app fault--> {Closed-Aborted}
//! ```
//!
//! Commit is exactly-once: the flag lives under the head mutex, so
//! overlapping writes on the same exchange cannot double-fire callbacks or
//! double-push the head.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::body::Signal;
use crate::env::{keys, Value};
use crate::error::Error;
use crate::headers::{self, Headers};
use crate::transfer::{self, TransferMode};

/// Default `server` header, stamped when the application does not set one.
pub(crate) const SERVER_TOKEN: &str = concat!("trestle/", env!("CARGO_PKG_VERSION"));

/// A callback invoked just before the head is pushed to the wire. Captured
/// state travels in the closure.
pub type CommitCallback = Box<dyn FnOnce(&mut Staged) + Send + 'static>;

/// The frozen response head handed to the listener at commit.
#[derive(Debug)]
pub struct Head {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub mode: TransferMode,
}

// ── Staged head ───────────────────────────────────────────────────────────────

/// The buffered, not-yet-committed response head.
///
/// Commit callbacks receive `&mut Staged` and may mutate anything here,
/// including registering further callbacks — those are drained before the
/// push as well.
pub struct Staged {
    status: Value,
    reason: Option<Value>,
    protocol: Option<Value>,
    headers: Headers,
    pending: Vec<CommitCallback>,
    committed: bool,
    faulted: bool,
    mode: TransferMode,
    head_tx: Option<oneshot::Sender<Result<Head, Error>>>,
}

impl Staged {
    pub fn set_status(&mut self, status: impl Into<Value>) {
        self.status = status.into();
    }

    pub fn set_reason(&mut self, reason: impl Into<Value>) {
        self.reason = Some(reason.into());
    }

    pub fn set_header(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.headers.set(name, values);
    }

    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Re-entrant registration: a callback registered while callbacks are
    /// draining is appended and still runs before the push.
    pub fn on_commit(&mut self, callback: impl FnOnce(&mut Staged) + Send + 'static) {
        self.pending.push(Box::new(callback));
    }
}

// ── Shared exchange state ─────────────────────────────────────────────────────

pub(crate) struct Shared {
    pub(crate) state: Mutex<Staged>,
    /// Running total of body bytes accepted, compared against any declared
    /// content-length.
    pub(crate) written: AtomicU64,
    /// Set when the connection is being torn down; writes fail fast.
    pub(crate) aborted: AtomicBool,
    /// Set when the exchange has completed; late writes are rejected.
    pub(crate) finished: AtomicBool,
    pub(crate) body_tx: mpsc::Sender<Signal>,
}

/// Cheap cloneable handle onto one exchange's response state.
#[derive(Clone)]
pub struct Reply {
    pub(crate) shared: Arc<Shared>,
}

impl Reply {
    pub(crate) fn new(
        body_tx: mpsc::Sender<Signal>,
        head_tx: oneshot::Sender<Result<Head, Error>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Staged {
                    status: Value::Int(200),
                    reason: None,
                    protocol: None,
                    headers: Headers::new(),
                    pending: Vec::new(),
                    committed: false,
                    faulted: false,
                    mode: TransferMode::Chunked,
                    head_tx: Some(head_tx),
                }),
                written: AtomicU64::new(0),
                aborted: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                body_tx,
            }),
        }
    }

    /// A commit callback that panicked may leave the mutex poisoned; the
    /// staged data itself stays coherent, so recover the guard and let the
    /// supervisor turn the panic into a fault.
    fn staged(&self) -> MutexGuard<'_, Staged> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Buffered (or committed) status code, when it holds an integer.
    pub fn status(&self) -> Option<u16> {
        match self.staged().status {
            Value::Int(code) => u16::try_from(code).ok(),
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.staged().committed
    }

    // Mutation before commit buffers; after commit it is discarded, so
    // late-mutating application code does not crash the exchange.

    pub(crate) fn set_status(&self, status: Value) {
        let mut st = self.staged();
        if !st.committed {
            st.status = status;
        }
    }

    pub(crate) fn set_reason(&self, reason: Value) {
        let mut st = self.staged();
        if !st.committed {
            st.reason = Some(reason);
        }
    }

    pub(crate) fn set_protocol(&self, protocol: Value) {
        let mut st = self.staged();
        if !st.committed {
            st.protocol = Some(protocol);
        }
    }

    pub(crate) fn replace_headers(&self, headers: Headers) {
        let mut st = self.staged();
        if !st.committed {
            st.headers = headers;
        }
    }

    /// Runs `f` against the buffered headers. Returns `None` once committed.
    pub(crate) fn with_headers<R>(&self, f: impl FnOnce(&mut Headers) -> R) -> Option<R> {
        let mut st = self.staged();
        if st.committed {
            return None;
        }
        Some(f(&mut st.headers))
    }

    /// Registers a pre-commit callback. Registered too late — after the head
    /// went out — it still runs, immediately and synchronously, just without
    /// influence on the pushed head.
    pub(crate) fn on_commit(&self, callback: CommitCallback) {
        let mut st = self.staged();
        if st.committed {
            callback(&mut st);
        } else {
            st.pending.push(callback);
        }
    }

    /// The commit instant. Idempotent: the first caller drains callbacks,
    /// validates and pushes the head; everyone after gets the settled mode.
    pub(crate) fn commit(&self) -> Result<TransferMode, Error> {
        let mut st = self.staged();
        if st.committed {
            if st.faulted {
                return Err(Error::Aborted);
            }
            return Ok(st.mode);
        }

        // Drain to exhaustion so registrations made inside a callback are
        // honored up to the commit instant.
        while !st.pending.is_empty() {
            let batch = mem::take(&mut st.pending);
            for callback in batch {
                callback(&mut st);
            }
        }

        st.committed = true;
        match build_head(&st) {
            Ok(head) => {
                st.mode = head.mode;
                if let Some(tx) = st.head_tx.take() {
                    let _ = tx.send(Ok(head));
                }
                Ok(st.mode)
            }
            Err(e) => {
                warn!(error = %e, "response head rejected at commit, degrading to 500");
                st.faulted = true;
                st.mode = TransferMode::Suppressed;
                if let Some(tx) = st.head_tx.take() {
                    let _ = tx.send(Err(e.fault_copy()));
                }
                Err(e)
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst) || self.shared.aborted.load(Ordering::SeqCst)
    }

    /// Completes the exchange on behalf of the application delegate. Runs on
    /// every exit path — normal return, error return, panic (reported by the
    /// supervisor as an error) — exactly once.
    pub(crate) async fn finish(&self, result: Result<(), Error>) {
        if self.shared.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.shared.aborted.load(Ordering::SeqCst) {
            return;
        }

        match result {
            Ok(()) => match self.commit() {
                Ok(mode) => {
                    let written = self.shared.written.load(Ordering::SeqCst);
                    match transfer::end_check(mode, written) {
                        Ok(()) => {
                            let _ = self.shared.body_tx.send(Signal::End).await;
                        }
                        Err(e) => {
                            error!(error = %e, "declared content-length violated, aborting connection");
                            self.abort(e).await;
                        }
                    }
                }
                Err(_) => {
                    // Head already degraded to the 500 fallback; the streamed
                    // body is unused but the channel still gets its close.
                    let _ = self.shared.body_tx.send(Signal::End).await;
                }
            },
            Err(e) => {
                let sent = {
                    let st = self.staged();
                    st.committed && !st.faulted
                };
                if sent {
                    error!(error = %e, "application failed after commit, aborting connection");
                    self.abort(e).await;
                } else {
                    warn!(error = %e, "application failed before commit, responding 500");
                    self.fail(e);
                    let _ = self.shared.body_tx.send(Signal::End).await;
                }
            }
        }
    }

    /// Tears the connection down mid-stream.
    pub(crate) async fn abort(&self, error: Error) {
        self.shared.aborted.store(true, Ordering::SeqCst);
        let _ = self.shared.body_tx.send(Signal::Abort(error)).await;
    }

    /// Marks the exchange faulted before anything reached the wire and hands
    /// the listener the error so it can emit the fallback head.
    fn fail(&self, error: Error) {
        let mut st = self.staged();
        st.committed = true;
        st.faulted = true;
        st.mode = TransferMode::Suppressed;
        if let Some(tx) = st.head_tx.take() {
            let _ = tx.send(Err(error));
        }
    }
}

// ── Head validation ───────────────────────────────────────────────────────────

/// Validates the staged head and produces the frozen one. Every rejection
/// here is a contract violation: the exchange degrades to a 500 fallback
/// because nothing has been sent yet.
fn build_head(st: &Staged) -> Result<Head, Error> {
    let code = match st.status {
        Value::Int(code) => code,
        _ => return Err(Error::InvalidStatus(0)),
    };
    let status = u16::try_from(code)
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or(Error::InvalidStatus(code))?;

    // The engine only sends informational codes as interim responses; as a
    // final status, everything below 200 except 101 is unsendable.
    if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(Error::InvalidStatus(code));
    }

    let reason = match &st.reason {
        None => None,
        Some(Value::Str(phrase)) => {
            hyper::ext::ReasonPhrase::try_from(phrase.clone()).map_err(|_| Error::InvalidReason)?;
            Some(phrase.clone())
        }
        Some(_) => return Err(Error::InvalidReason),
    };

    match &st.protocol {
        None => {}
        Some(Value::Str(version)) => {
            // The engine speaks HTTP/1.1 only; requests for another version
            // are not honored.
            if !version.eq_ignore_ascii_case("HTTP/1.1") {
                debug!(requested = %version, "response protocol not supported, sending HTTP/1.1");
            }
        }
        Some(_) => {
            return Err(Error::TypeMismatch {
                key: keys::RESPONSE_PROTOCOL.to_owned(),
                expected: "string",
            })
        }
    }

    let mode = transfer::negotiate(status, &st.headers)?;

    let mut projected = HeaderMap::new();
    headers::project_response(&st.headers, &mut projected)?;
    match mode {
        TransferMode::Fixed { declared } => {
            projected.insert(http::header::CONTENT_LENGTH, declared.into());
        }
        TransferMode::Chunked => {
            projected.insert(
                http::header::TRANSFER_ENCODING,
                http::HeaderValue::from_static("chunked"),
            );
        }
        TransferMode::Suppressed => {}
    }
    if !projected.contains_key(http::header::SERVER) {
        projected.insert(http::header::SERVER, http::HeaderValue::from_static(SERVER_TOKEN));
    }

    Ok(Head {
        status,
        reason,
        headers: projected,
        mode,
    })
}
