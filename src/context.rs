use std::{
    future::Future,
    pin::Pin,
    task::{Context as TaskContext, Poll},
};

use opentelemetry::Context;

/// Captures the ambient context at the call site.
///
/// The returned snapshot owns "which span is active" plus any other values
/// carried by [`Context`]. It stays valid after the current scope exits and
/// can be reinstalled anywhere with [`with_restored`] or [`ScopeExt::in_scope`].
pub fn snapshot() -> Context {
    Context::current()
}

/// Runs `body` with `snapshot` installed as the ambient context.
///
/// The previous context is restored when `body` returns, whether it returns
/// normally or unwinds. Only valid for synchronous bodies; anything that
/// suspends must go through [`ScopeExt::in_scope`] instead, since a plain
/// guard does not follow execution across an await point.
pub fn with_restored<R>(snapshot: &Context, body: impl FnOnce() -> R) -> R {
    let _guard = snapshot.clone().attach();
    body()
}

/// Extension trait scoping a future to a captured [`Context`].
pub trait ScopeExt: Sized {
    /// Wraps the future so that `snapshot` is the ambient context whenever
    /// the future executes.
    ///
    /// The snapshot is attached at every poll and detached before control
    /// returns to the scheduler, so the scope holds across suspension even
    /// when the future resumes on a different worker thread, and never leaks
    /// into unrelated tasks interleaved on the same thread.
    fn in_scope(self, snapshot: Context) -> Scoped<Self>;

    /// Shorthand for [`ScopeExt::in_scope`] with the current context.
    fn in_current_scope(self) -> Scoped<Self> {
        self.in_scope(Context::current())
    }
}

impl<F: Future> ScopeExt for F {
    fn in_scope(self, snapshot: Context) -> Scoped<Self> {
        Scoped {
            future: self,
            snapshot,
        }
    }
}

pin_project_lite::pin_project! {
    /// A future executing with a fixed ambient context. See [`ScopeExt`].
    pub struct Scoped<F> {
        #[pin]
        future: F,
        snapshot: Context,
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        // Attach for exactly this poll; the guard restores the previous
        // context before we hand control back, including on unwind.
        let _guard = this.snapshot.clone().attach();
        this.future.poll(cx)
    }
}
