//! # Traceflow
//! Demonstration service showing how to carry the current span and its key
//! values across asynchronous boundaries: suspension points, outbound HTTP
//! calls and database reads inside one request handler.
//!
//! ## Setup
//! Tracing and logging are set up using [`setup::setup`]. This should be the
//! first call of the server binary.
//!
//! ## Context propagation
//! Thread-local span state does not follow a future across an await point on
//! its own. [`context`] provides the scoped-restoration primitive: capture a
//! snapshot where work is scheduled, reinstall it on every resumption, tear
//! it down when that leg completes. [`observe::run_observed`] builds on it to
//! wrap a unit of work in a named child span that is closed exactly once no
//! matter how the work ends.
//!
//! ## Http middleware
//! [`middleware::server::TraceLayer`] opens the per-request span handlers run
//! under, continuing a remote trace when the request carries a `traceparent`
//! header. [`middleware::client::TraceLayer`] instruments every outbound call
//! with a child span, tags it with method, URI and a status-derived outcome
//! class, and propagates the trace downstream via [`http_injector`].
//!
//! ## The endpoint
//! [`app`] wires the pieces into a single `GET /test` route: a traced delay,
//! a traced log line, an optional `todo` table read (cargo feature `db`) and
//! a traced upstream call, summarized in a plain-text response.

pub mod app;
pub mod context;
pub mod http_injector;
pub mod middleware;
pub mod observe;
#[cfg(feature = "db")]
pub mod repo;
pub mod setup;
