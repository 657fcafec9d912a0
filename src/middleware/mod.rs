//! Middleware layer.
//!
//! A middleware is just an application wrapping another application: it
//! receives the environment, does its cross-cutting work, and delegates.
//! Because the wrapped value satisfies [`App`](crate::App) like anything
//! else, middleware composes by plain function application:
//!
//! ```rust,no_run
//! use trestle::{middleware, Env, Error, Server};
//!
//! async fn app(env: Env) -> Result<(), Error> {
//!     // …
//!     Ok(())
//! }
//!
//! # async fn run() -> Result<(), Error> {
//! Server::bind("0.0.0.0:3000")
//!     .await?
//!     .serve(middleware::trace(app))
//!     .await
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::app::{App, ErasedApp as _};
use crate::env::{keys, Env};

/// Per-exchange tracing: method, path, committed status, latency.
///
/// The status is read back from the response state after the inner
/// application returns — whatever actually committed, fallback included.
pub fn trace(inner: impl App) -> impl App {
    let inner = inner.into_boxed_app();
    move |env: Env| {
        let inner = Arc::clone(&inner);
        let method = env.try_get::<&str>(keys::REQUEST_METHOD).unwrap_or("-").to_owned();
        let path = env.try_get::<&str>(keys::REQUEST_PATH).unwrap_or("-").to_owned();
        let reply = env.reply();
        async move {
            let started = Instant::now();
            let result = inner.call(env).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match reply.status() {
                Some(status) => info!(%method, %path, status, elapsed_ms, "exchange"),
                None => info!(%method, %path, elapsed_ms, "exchange"),
            }
            result
        }
    }
}
