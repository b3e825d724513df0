//! An async HTTP/1.x application server engine.
//!
//! Reads requests off raw connections, hands each one to an [`App`] as an [`Env`], and writes the
//! returned [`Response`] back with the framing HTTP/1.0 and HTTP/1.1 clients expect. Malformed
//! requests, slow clients and failing applications are answered without taking the server down.

pub mod app;
pub mod config;
pub mod env;
pub mod events;
pub mod http;
pub mod io;
mod server;
mod session;
pub mod sync;

pub use app::{App, AppError, AppFn, AppPanic, LowlevelErrorHandler, app_fn};
pub use config::{Limits, RemoteAddress, ServerConfig};
pub use env::{EarlyHints, Env, Hijack, RequestBody, UrlScheme};
pub use events::{Events, LogEvents, ServerState};
pub use http::response::{Response, ResponseBody, ResponseBuilder};
pub use io::{ConnectionInfo, Hijacked, Io};
pub use server::{HttpServerError, Server, ServerHandle};
pub use session::{SessionState, serve_connection};
pub use uhsapi::http::StatusCode;

// Requests and responses cross from connection tasks to application tasks
static_assertions::assert_impl_all!(Env: Send, Sync, Clone);
static_assertions::assert_impl_all!(Response: Send);
static_assertions::assert_impl_all!(ServerConfig: Send, Sync);
