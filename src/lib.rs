//! # trestle
//!
//! A bridge from a native HTTP listener to your application.
//! Nothing more. Nothing less.
//!
//! ## The contract
//!
//! hyper parses requests and frames responses on the wire. Your application
//! is one async function over an environment — a per-exchange store of
//! well-known slots ([`keys`]): request method, path, headers, body;
//! response status, reason, headers, body. trestle sits between the two and
//! owns the part that is easy to get wrong:
//!
//! - **Commit** — status and headers buffer until the first body write (or
//!   completion), then freeze and go to the wire exactly once. Callbacks
//!   registered with [`Env::on_commit`] run just before the push and may
//!   still mutate the head.
//! - **Framing** — a declared `content-length` is a promise, validated byte
//!   for byte; no declaration means chunked. A broken promise aborts the
//!   connection rather than corrupting the stream.
//! - **Faults** — contract violations before commit degrade to an empty
//!   500; after commit the connection is torn down. Clients never hang on a
//!   malformed response.
//!
//! On top of the environment sits a typed layer — [`Request::from_env`] and
//! [`Response::send`] — for application code that wants real methods, URIs
//! and header maps instead of loose slots.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use trestle::{Env, Error, Request, Response, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     Server::bind("0.0.0.0:3000").await?.serve(app).await
//! }
//!
//! async fn app(env: Env) -> Result<(), Error> {
//!     let request = Request::from_env(env)?;
//!     let body = format!("hello from {}", request.uri().path());
//!     Response::text(body).send(request.env()).await
//! }
//! ```
//!
//! Prefer the raw environment when you need streaming or late header
//! decisions:
//!
//! ```rust,no_run
//! use trestle::{keys, Env, Error, Value};
//!
//! async fn app(env: Env) -> Result<(), Error> {
//!     let mut env = env;
//!     env.set(keys::RESPONSE_STATUS, Value::Int(200));
//!     env.response_headers().set("content-type", vec!["text/plain".into()]);
//!     let body = env.body();
//!     body.write(&b"streamed "[..]).await?;   // ← commit happens here
//!     body.write(&b"in chunks"[..]).await?;
//!     Ok(())
//! }
//! ```

mod app;
mod body;
mod env;
mod error;
mod headers;
mod reply;
mod request;
mod response;
mod server;
mod transfer;

pub mod middleware;

pub use app::App;
pub use body::{BodyReader, BodyWriter, StreamedBody};
pub use env::{keys, CancelSignal, Driver, Env, FromValue, ResponseHeaders, Value};
pub use error::Error;
pub use headers::Headers;
pub use reply::{Head, Reply, Staged};
pub use request::Request;
pub use response::{ContentType, Response, ResponseBuilder};
pub use server::Server;
pub use transfer::TransferMode;
