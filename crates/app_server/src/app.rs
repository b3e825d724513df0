use std::{
    any::Any,
    error::Error,
    panic::{self, AssertUnwindSafe},
};

use bytes::Bytes;
use log::error;
use uhsapi::http::StatusCode;

use crate::{
    config::ServerConfig,
    env::Env,
    http::response::{Response, ResponseBody},
};

pub type AppError = Box<dyn Error + Send + Sync>;

/// The application a server hands every request to.
///
/// Returning an error (or panicking) produces a 500 response, see
/// [`ServerConfig::lowlevel_error_handler`].
pub trait App: Send + Sync + 'static {
    fn call(&self, env: Env) -> impl Future<Output = Result<Response, AppError>> + Send;
}

/// An [`App`] made from a closure, see [`app_fn`]
#[derive(Debug, Clone, Copy)]
pub struct AppFn<F>(F);

/// Creates an [`App`] from an async closure or a function returning a future
pub fn app_fn<F, Fut>(f: F) -> AppFn<F>
where
    F: Fn(Env) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AppError>> + Send,
{
    AppFn(f)
}

impl<F, Fut> App for AppFn<F>
where
    F: Fn(Env) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AppError>> + Send,
{
    fn call(&self, env: Env) -> impl Future<Output = Result<Response, AppError>> + Send {
        (self.0)(env)
    }
}

/// Builds the response sent in place of a failed application's
pub trait LowlevelErrorHandler: Send + Sync + 'static {
    fn handle(&self, err: &AppError, env: Option<&Env>) -> Result<Response, AppError>;
}

impl<F> LowlevelErrorHandler for F
where
    F: Fn(&AppError, Option<&Env>) -> Result<Response, AppError> + Send + Sync + 'static,
{
    fn handle(&self, err: &AppError, env: Option<&Env>) -> Result<Response, AppError> {
        self(err, env)
    }
}

/// The application panicked while handling a request
#[derive(Debug, thiserror::Error)]
#[error("application panicked: {0}")]
pub struct AppPanic(pub String);

impl AppPanic {
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "unknown panic payload".to_string(),
            },
        };
        Self(message)
    }
}

const GENERIC_ERROR: &str =
    "An unhandled lowlevel error occurred. The application logs may have details.\n";

/// The response used when the application and the error handler both failed
fn minimal_error() -> Response {
    Response {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        headers: Default::default(),
        body: ResponseBody::Chunks(vec![Bytes::new()]),
    }
}

fn describe(err: &AppError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str("\ncaused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Picks the response for a failed request
pub(crate) fn lowlevel_error_response(
    config: &ServerConfig,
    err: &AppError,
    env: Option<&Env>,
) -> Response {
    if let Some(handler) = &config.lowlevel_error_handler {
        return match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(err, env))) {
            Ok(Ok(response)) => response,
            Ok(Err(handler_err)) => {
                error!("lowlevel error handler failed: {handler_err}");
                minimal_error()
            }
            Err(payload) => {
                error!(
                    "lowlevel error handler panicked: {}",
                    AppPanic::from_payload(payload).0
                );
                minimal_error()
            }
        };
    }

    if config.leak_stack_on_error {
        Response::text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Server caught this error: {}\n", describe(err)),
        )
    } else {
        Response::text(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR)
    }
}
