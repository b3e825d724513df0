use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use tokio::{io::AsyncWriteExt, sync::watch, time};

use crate::{
    app::{App, AppError, AppPanic, lowlevel_error_response},
    config::ServerConfig,
    env::Env,
    events::Events,
    http::{
        parser::{HttpParseError, LimitKind, Location, Parser},
        request::Request,
        response::{
            CONTINUE, REQUEST_TIMEOUT, Response, ResponseContext, Sender, WriteError, WriteOutcome,
            is_peer_gone,
        },
    },
    io::{BoxedIo, ConnectionInfo, Hijacked, Io, SocketSlot},
    server::{Shutdown, stopping},
};

/// Where a connection is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitRequest,
    ReadingHeaders,
    ReadingBody,
    Dispatching,
    WritingResponse,
    /// The application owns the socket
    Hijacked,
    Closed,
}

/// Result of waiting for more bytes from the client
enum Fill {
    Data,
    Eof,
    TimedOut,
    Shutdown,
}

/// Drives one connection: reads requests, calls the application and writes responses until
/// the connection closes or is hijacked.
pub(crate) struct Session<A: App> {
    app: Arc<A>,
    config: Arc<ServerConfig>,
    events: Arc<dyn Events>,
    conn: ConnectionInfo,
    shutdown: watch::Receiver<Shutdown>,
    parser: Parser,
    state: SessionState,
    /// Requests answered on this connection so far
    served: usize,
}

impl<A: App> Session<A> {
    pub fn new(
        app: Arc<A>,
        config: Arc<ServerConfig>,
        events: Arc<dyn Events>,
        conn: ConnectionInfo,
        shutdown: watch::Receiver<Shutdown>,
    ) -> Self {
        let parser = Parser::new(config.limits);
        Self {
            app,
            config,
            events,
            conn,
            shutdown,
            parser,
            state: SessionState::AwaitRequest,
            served: 0,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        trace!("{}: {:?} -> {:?}", self.conn.peer, self.state, state);
        self.state = state;
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow() != Shutdown::Running
    }

    /// Serves the connection, reporting I/O failures other than the client going away
    pub async fn serve(mut self, io: BoxedIo) {
        match self.run(io).await {
            Ok(()) => {}
            Err(WriteError::PeerGone(err)) => debug!("{}: client went away: {err}", self.conn.peer),
            Err(WriteError::Io(err)) => self.events.connection_error(self.conn.peer, &err),
        }
        if self.state != SessionState::Hijacked {
            self.set_state(SessionState::Closed);
        }
    }

    async fn run(&mut self, mut io: BoxedIo) -> Result<(), WriteError> {
        loop {
            self.set_state(SessionState::AwaitRequest);
            let Some(mut request) = self.read_head(&mut io).await? else {
                return close(io).await;
            };

            self.set_state(SessionState::ReadingBody);
            let Some(body) = self.read_body(&mut io, &mut request).await? else {
                return close(io).await;
            };

            let mut ctx = ResponseContext::for_request(&request);
            let request_body_wait = request.started.elapsed();
            let read_buf = Bytes::copy_from_slice(self.parser.buffered());
            let slot = SocketSlot::new(io);
            let env = Env::build(
                request,
                body,
                &self.conn,
                &self.config,
                request_body_wait,
                &slot,
                read_buf,
            );

            self.set_state(SessionState::Dispatching);
            let response = self.dispatch(env).await;
            let Some(taken) = slot.take().await else {
                self.set_state(SessionState::Hijacked);
                return Ok(());
            };
            io = taken;
            if response.status.is_hijacked() {
                self.set_state(SessionState::Hijacked);
                return Ok(());
            }

            self.set_state(SessionState::WritingResponse);
            ctx.closing = self.is_stopping();
            let outcome = Sender::new(&mut io).send_response(&ctx, response).await?;
            match outcome {
                WriteOutcome::KeepAlive => self.served += 1,
                WriteOutcome::Close => return close(io).await,
                WriteOutcome::Hijack(callback) => {
                    self.set_state(SessionState::Hijacked);
                    let read_buf = self.parser.take_buffered();
                    callback(Hijacked { io, read_buf }).await;
                    return Ok(());
                }
            }
        }
    }

    /// Reads until a request head is parsed. `None` means the connection should close.
    async fn read_head(&mut self, io: &mut BoxedIo) -> Result<Option<Request>, WriteError> {
        loop {
            match self.parser.parse_request() {
                Ok(Some(request)) => return Ok(Some(request)),
                Ok(None) => {}
                Err(err) => {
                    self.reject(io, err).await;
                    return Ok(None);
                }
            }

            let idle = self.parser.is_empty();
            let limit = if idle && self.served > 0 {
                self.config.persistent_timeout
            } else {
                self.config.first_data_timeout
            };
            if !idle {
                self.set_state(SessionState::ReadingHeaders);
            }
            match self.fill(io, limit, idle).await? {
                Fill::Data => {}
                Fill::Eof | Fill::Shutdown => return Ok(None),
                // An idle keep-alive connection just goes away
                Fill::TimedOut if idle && self.served > 0 => return Ok(None),
                Fill::TimedOut => {
                    self.timed_out(io).await;
                    return Ok(None);
                }
            }
        }
    }

    /// Reads the whole body of `request` into memory
    async fn read_body(
        &mut self,
        io: &mut BoxedIo,
        request: &mut Request,
    ) -> Result<Option<Bytes>, WriteError> {
        let max = self.config.limits.max_body_bytes;
        if let (Some(max), Some(declared)) = (max, request.body.remaining())
            && declared > max
        {
            self.reject(io, body_too_large(max, declared)).await;
            return Ok(None);
        }

        // RFC 9110 - 10.1.1. Expect
        if request.expects_continue {
            Sender::new(&mut *io).send_raw(CONTINUE).await?;
        }

        let mut body = BytesMut::new();
        loop {
            if let Err(err) = self.parser.decode_body(&mut request.body, &mut body) {
                self.reject(io, err).await;
                return Ok(None);
            }
            if let Some(max) = max
                && body.len() as u64 > max
            {
                self.reject(io, body_too_large(max, body.len() as u64)).await;
                return Ok(None);
            }
            if request.body.is_done() {
                return Ok(Some(body.freeze()));
            }

            match self.fill(io, self.config.first_data_timeout, false).await? {
                Fill::Data => {}
                Fill::Eof | Fill::Shutdown => return Ok(None),
                Fill::TimedOut => {
                    self.timed_out(io).await;
                    return Ok(None);
                }
            }
        }
    }

    /// One read from the client, bounded by `limit`. While `idle` a server shutdown also ends
    /// the wait.
    async fn fill(
        &mut self,
        io: &mut BoxedIo,
        limit: Duration,
        idle: bool,
    ) -> Result<Fill, WriteError> {
        let read = time::timeout(limit, self.parser.fill(io));
        let result = if idle {
            tokio::select! {
                result = read => result,
                _ = stopping(&mut self.shutdown) => return Ok(Fill::Shutdown),
            }
        } else {
            read.await
        };
        match result {
            Err(_) => Ok(Fill::TimedOut),
            Ok(Ok(0)) => Ok(Fill::Eof),
            Ok(Ok(_)) => Ok(Fill::Data),
            Ok(Err(err)) if is_peer_gone(&err) => Ok(Fill::Eof),
            Ok(Err(err)) => Err(WriteError::Io(err)),
        }
    }

    /// Calls the application on its own task, turning errors and panics into a response
    async fn dispatch(&self, env: Env) -> Response {
        let app = self.app.clone();
        let error_env = env.clone();
        let result = tokio::spawn(async move { app.call(env).await }).await;
        let err: AppError = match result {
            Ok(Ok(response)) => return response,
            Ok(Err(err)) => err,
            Err(join) if join.is_panic() => Box::new(AppPanic::from_payload(join.into_panic())),
            Err(join) => Box::new(join),
        };
        self.events.app_error(&err, Some(&error_env));
        lowlevel_error_response(&self.config, &err, Some(&error_env))
    }

    /// Answers a malformed request and gives up on the connection
    async fn reject(&self, io: &mut BoxedIo, err: HttpParseError) {
        self.events.parse_error(self.conn.peer, &err);
        let status = err.status_code();
        let response = format!(
            "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            status,
            status.reason()
        );
        if let Err(err) = Sender::new(io).send_raw(response.as_bytes()).await {
            debug!("{}: could not send {status}: {err}", self.conn.peer);
        }
    }

    async fn timed_out(&self, io: &mut BoxedIo) {
        debug!("{}: timed out waiting for the request", self.conn.peer);
        if let Err(err) = Sender::new(io).send_raw(REQUEST_TIMEOUT).await {
            debug!("{}: could not send 408: {err}", self.conn.peer);
        }
    }
}

fn body_too_large(max: u64, actual: u64) -> HttpParseError {
    HttpParseError::too_large(
        LimitKind::BodyBytes,
        max as usize,
        actual as usize,
        Location::Body,
    )
}

async fn close(mut io: BoxedIo) -> Result<(), WriteError> {
    match io.shutdown().await {
        Err(err) if !is_peer_gone(&err) => Err(WriteError::Io(err)),
        _ => Ok(()),
    }
}

/// Serves a single connection accepted by the caller, such as a TLS stream. Returns when the
/// connection is closed or hijacked.
pub async fn serve_connection<A, S>(
    app: Arc<A>,
    config: Arc<ServerConfig>,
    events: Arc<dyn Events>,
    stream: S,
    conn: ConnectionInfo,
) where
    A: App,
    S: Io,
{
    let (_shutdown_tx, shutdown_rx) = watch::channel(Shutdown::Running);
    Session::new(app, config, events, conn, shutdown_rx)
        .serve(Box::new(stream))
        .await;
}
