use std::{fmt, sync::Arc, time::Duration};

use crate::{
    app::{AppError, LowlevelErrorHandler},
    env::Env,
    http::{header::HeaderName, response::Response},
};

pub use crate::http::parser::Limits;

/// Where the `remote_addr` of a request comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RemoteAddress {
    /// The IP address of the connected peer
    #[default]
    Socket,
    /// The value of a request header, such as `X-Forwarded-For` behind a proxy. Falls back to the
    /// peer address when the header is missing.
    Header(HeaderName),
    /// A fixed value
    Value(String),
}

/// Settings shared by every connection of a server
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether applications can send `103 Early Hints`
    pub early_hints: bool,
    /// How long to wait for a new connection's first request, and for the rest of any request
    /// once it has started
    pub first_data_timeout: Duration,
    /// How long an idle keep-alive connection waits for its next request. When it expires the
    /// connection is closed without writing anything, there is no request to answer yet.
    pub persistent_timeout: Duration,
    pub remote_address: RemoteAddress,
    /// Produces the response when the application fails
    pub lowlevel_error_handler: Option<Arc<dyn LowlevelErrorHandler>>,
    /// Include the error in the default 500 response. Useful in development only
    pub leak_stack_on_error: bool,
    pub limits: Limits,
    /// Listen backlog of the server socket
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            early_hints: false,
            first_data_timeout: Duration::from_secs(30),
            persistent_timeout: Duration::from_secs(20),
            remote_address: RemoteAddress::Socket,
            lowlevel_error_handler: None,
            leak_stack_on_error: false,
            limits: Limits::default(),
            backlog: 1024,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("early_hints", &self.early_hints)
            .field("first_data_timeout", &self.first_data_timeout)
            .field("persistent_timeout", &self.persistent_timeout)
            .field("remote_address", &self.remote_address)
            .field(
                "lowlevel_error_handler",
                &self.lowlevel_error_handler.is_some(),
            )
            .field("leak_stack_on_error", &self.leak_stack_on_error)
            .field("limits", &self.limits)
            .field("backlog", &self.backlog)
            .finish()
    }
}

impl ServerConfig {
    pub fn with_early_hints(mut self, enabled: bool) -> Self {
        self.early_hints = enabled;
        self
    }

    pub fn with_first_data_timeout(mut self, timeout: Duration) -> Self {
        self.first_data_timeout = timeout;
        self
    }

    pub fn with_persistent_timeout(mut self, timeout: Duration) -> Self {
        self.persistent_timeout = timeout;
        self
    }

    pub fn with_remote_address(mut self, remote_address: RemoteAddress) -> Self {
        self.remote_address = remote_address;
        self
    }

    pub fn with_lowlevel_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AppError, Option<&Env>) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.lowlevel_error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_leak_stack_on_error(mut self, leak: bool) -> Self {
        self.leak_stack_on_error = leak;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }
}
