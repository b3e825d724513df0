use std::{fmt, io, net::SocketAddr};

use log::{error, info, warn};

use crate::{app::AppError, env::Env, http::parser::HttpParseError};

/// Lifecycle of a [`Server`](crate::Server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Booting,
    Running,
    Stop,
    Done,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Booting => "booting",
            Self::Running => "running",
            Self::Stop => "stop",
            Self::Done => "done",
        })
    }
}

/// Receives server notifications. Every method defaults to doing nothing.
pub trait Events: Send + Sync + 'static {
    fn state(&self, _state: ServerState) {}

    /// A client sent a request that could not be parsed
    fn parse_error(&self, _peer: SocketAddr, _err: &HttpParseError) {}

    /// The application returned an error or panicked
    fn app_error(&self, _err: &AppError, _env: Option<&Env>) {}

    /// A connection failed with an I/O error other than the client going away
    fn connection_error(&self, _peer: SocketAddr, _err: &io::Error) {}
}

/// Reports events through the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEvents;

impl Events for LogEvents {
    fn state(&self, state: ServerState) {
        info!("server state: {state}");
    }

    fn parse_error(&self, peer: SocketAddr, err: &HttpParseError) {
        warn!("{peer}: {err}");
    }

    fn app_error(&self, err: &AppError, env: Option<&Env>) {
        match env {
            Some(env) => error!(
                "application error handling {} {}: {err}",
                env.method, env.request_uri
            ),
            None => error!("application error: {err}"),
        }
    }

    fn connection_error(&self, peer: SocketAddr, err: &io::Error) {
        warn!("{peer}: connection error: {err}");
    }
}
