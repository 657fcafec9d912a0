//! HTTP listener and graceful shutdown.
//!
//! The listener owns the native side of the bridge: it accepts connections,
//! lets hyper parse each request, populates a fresh environment, spawns the
//! application delegate, and drives the committed head and streamed body
//! back onto the connection. Faults follow the contract in
//! [`crate::reply`]: a violation before commit degrades to an empty 500,
//! anything after commit tears the connection down.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the listener stops accepting immediately and lets
//! every in-flight connection task run to completion before
//! [`Server::serve`] returns. Kubernetes sends SIGTERM and waits
//! `terminationGracePeriodSeconds` before SIGKILL — set it longer than your
//! slowest exchange.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, SERVER};
use http::{HeaderValue, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::app::{App, BoxedApp, ErasedApp as _};
use crate::body::BodyReader;
use crate::env::{keys, Env, Value};
use crate::error::Error;
use crate::headers::Headers;
use crate::reply::Reply;
use crate::transfer::TransferMode;

/// The HTTP listener.
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Server {
    /// Binds to `addr` immediately; exchanges start flowing once
    /// [`serve`](Server::serve) is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn bind() -> Result<(), trestle::Error> {
    /// use trestle::Server;
    /// let server = Server::bind("0.0.0.0:3000").await?;
    /// # Ok(()) }
    /// ```
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    /// The address actually bound — useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts accepting connections and dispatching exchanges through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight connections completing).
    pub async fn serve(self, app: impl App) -> Result<(), Error> {
        self.serve_until(app, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), with a caller-supplied shutdown
    /// future in place of the process signals.
    pub async fn serve_until(
        self,
        app: impl App,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        // Arc so the erased app can be shared across concurrent connection
        // tasks without copying.
        let app = app.into_boxed_app();

        info!(addr = %self.addr, "trestle listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` makes select! check arms top-to-bottom. Shutdown
                // is first so a signal immediately stops accepting, even if
                // more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // The closure runs once per request on the
                        // connection, not once per connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        // `with_upgrades` lets a 101 head reach the wire;
                        // unclaimed upgrades simply end the connection.
                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, svc)
                            .with_upgrades()
                            .await
                        {
                            // Aborted exchanges surface here as connection
                            // errors; that is the contract, not a defect.
                            debug!(peer = %remote_addr, "connection ended with error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: wait for every in-flight connection to finish.
        while tasks.join_next().await.is_some() {}

        info!("trestle stopped");
        Ok(())
    }
}

// ── Exchange dispatch ─────────────────────────────────────────────────────────

type NativeBody = BoxBody<Bytes, Error>;

/// Core hot path: one parsed request in, one response head plus streamed
/// body out.
///
/// The error type is [`Infallible`] — every failure is handled internally
/// (fallback 500 before commit, in-band abort after), so hyper never sees a
/// service error.
async fn dispatch(
    app: BoxedApp,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<NativeBody>, Infallible> {
    let (parts, request_body) = req.into_parts();

    let (mut env, mut driver) = Env::exchange();
    populate(&mut env, &parts, remote_addr);
    env.attach_request_body(BodyReader::from_incoming(request_body));

    // The delegate runs in its own task; its join handle is the one place
    // every exit path — return, error, panic — can be observed.
    let reply = driver.reply();
    let delegate = tokio::spawn(async move { app.call(env).await });
    tokio::spawn(supervise(delegate, reply));

    let response = match driver.head().await {
        Ok(head) => {
            let body = match head.mode {
                // The status line forbids a body; whatever was written
                // stays off the wire.
                TransferMode::Suppressed => empty_body(),
                _ => match driver.take_body() {
                    Some(streamed) => streamed.boxed(),
                    None => empty_body(),
                },
            };
            let mut response = http::Response::new(body);
            *response.status_mut() = head.status;
            *response.headers_mut() = head.headers;
            if let Some(reason) = head.reason {
                // Validated at commit; re-parse for the engine's extension.
                if let Ok(phrase) = hyper::ext::ReasonPhrase::try_from(reason) {
                    response.extensions_mut().insert(phrase);
                }
            }
            response
        }
        Err(e) => {
            debug!(error = %e, "exchange degraded to fallback response");
            fallback_response()
        }
    };

    Ok(response)
}

/// Completes the exchange when the delegate's task settles, turning panics
/// and cancellations into application faults.
async fn supervise(
    delegate: tokio::task::JoinHandle<Result<(), Error>>,
    reply: Reply,
) {
    let result = match delegate.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(Error::App("application panicked".into())),
        Err(_) => Err(Error::App("application task cancelled".into())),
    };
    reply.finish(result).await;
}

fn populate(env: &mut Env, parts: &http::request::Parts, remote_addr: SocketAddr) {
    env.set(keys::REQUEST_METHOD, Value::from(parts.method.as_str()));
    // TLS terminates upstream of this listener.
    env.set(keys::REQUEST_SCHEME, Value::from("http"));
    env.set(keys::REQUEST_PATH_BASE, Value::from(""));
    env.set(keys::REQUEST_PATH, Value::from(parts.uri.path()));
    env.set(keys::REQUEST_QUERY, Value::from(parts.uri.query().unwrap_or("")));
    env.set(
        keys::REQUEST_HEADERS,
        Value::Headers(Headers::from_native(&parts.headers)),
    );
    env.set(keys::IS_LOCAL, Value::Bool(remote_addr.ip().is_loopback()));
}

fn empty_body() -> NativeBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// The minimal response for an exchange that faulted before anything
/// reached the wire: an empty 500 with an explicit zero length.
fn fallback_response() -> http::Response<NativeBody> {
    let mut response = http::Response::new(empty_body());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(0u64));
    response
        .headers_mut()
        .insert(SERVER, HeaderValue::from_static(crate::reply::SERVER_TOKEN));
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves — on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
