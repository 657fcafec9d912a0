//! Application contract and type erasure.
//!
//! An application is any `async fn(Env) -> Result<(), Error>`: take the
//! environment, read the request slots, mutate the response slots, write
//! body bytes, return. The listener needs to hold applications of
//! *different* concrete types behind one interface, so we use trait objects
//! (`dyn ErasedApp`) — the same erasure shape as a router holding handlers.
//!
//! The chain from user code to vtable call:
//!
//! ```text
//! async fn app(env: Env) -> Result<(), Error> { … }   ← user writes this
//!        ↓ server.serve(app)
//! app.into_boxed_app()                                ← App blanket impl
//!        ↓
//! Arc::new(FnApp(app))                                ← heap-allocated wrapper
//!        ↓  stored as BoxedApp = Arc<dyn ErasedApp>
//! app.call(env)  per exchange                         ← one vtable dispatch
//! ```
//!
//! The only runtime cost per exchange is one Arc clone (atomic inc) plus
//! one virtual call — negligible next to network I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::env::Env;
use crate::error::Error;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future for one exchange.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `App` trait's `into_boxed_app` method.
/// External crates cannot usefully interact with this trait.
#[doc(hidden)]
pub trait ErasedApp {
    fn call(&self, env: Env) -> BoxFuture;
}

/// A heap-allocated, type-erased application shared across concurrent
/// exchanges.
#[doc(hidden)]
pub type BoxedApp = Arc<dyn ErasedApp + Send + Sync + 'static>;

// ── Public App trait ──────────────────────────────────────────────────────────

/// Implemented for every valid application delegate.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(env: Env) -> Result<(), Error>
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it. This keeps the API surface stable
/// across versions.
pub trait App: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_app(self) -> BoxedApp;
}

/// The sealing module. Because `Sealed` is private, external crates cannot
/// name it and therefore cannot implement `App` on their own types.
mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut> private::Sealed for F
where
    F: Fn(Env) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
}

impl<F, Fut> App for F
where
    F: Fn(Env) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn into_boxed_app(self) -> BoxedApp {
        Arc::new(FnApp(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete application `F` and implements
/// [`ErasedApp`], bridging the typed world to the trait-object world.
struct FnApp<F>(F);

impl<F, Fut> ErasedApp for FnApp<F>
where
    F: Fn(Env) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, env: Env) -> BoxFuture {
        Box::pin((self.0)(env))
    }
}
