use std::{future, net::SocketAddr, sync::Arc};

use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpSocket},
    sync::watch,
    task::{JoinError, JoinHandle, JoinSet},
};

use crate::{
    app::App,
    config::ServerConfig,
    events::{Events, LogEvents, ServerState},
    io::ConnectionInfo,
    session::Session,
};

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("accept loop failed: {0}")]
    Join(#[from] JoinError),
}

/// Broadcast from the server to its connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shutdown {
    Running,
    /// Finish in-flight requests, close idle connections
    Graceful,
    /// Abort every connection
    Immediate,
}

/// Resolves once the server starts stopping. Never resolves if the server is gone.
pub(crate) async fn stopping(shutdown: &mut watch::Receiver<Shutdown>) {
    if shutdown
        .wait_for(|state| *state != Shutdown::Running)
        .await
        .is_err()
    {
        future::pending::<()>().await;
    }
}

/// A TCP listener serving an [`App`]
pub struct Server<A: App> {
    app: Arc<A>,
    config: ServerConfig,
    events: Arc<dyn Events>,
}

impl<A: App> Server<A> {
    pub fn new(app: A) -> Self {
        Self {
            app: Arc::new(app),
            config: ServerConfig::default(),
            events: Arc::new(LogEvents),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default [`LogEvents`]
    pub fn events(mut self, events: Arc<dyn Events>) -> Self {
        self.events = events;
        self
    }

    /// Binds `addr` and starts accepting connections in the background
    pub fn bind<T: Into<SocketAddr>>(self, addr: T) -> Result<ServerHandle, HttpServerError> {
        let addr = addr.into();
        self.events.state(ServerState::Booting);

        let sock = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        sock.set_reuseaddr(true)?;
        sock.bind(addr)?;
        let listener = sock.listen(self.config.backlog)?;
        let local_addr = listener.local_addr()?;
        info!("listening on {local_addr}");
        self.events.state(ServerState::Running);

        let (shutdown_tx, shutdown_rx) = watch::channel(Shutdown::Running);
        let events = self.events.clone();
        let task = tokio::spawn(accept_loop(
            listener,
            local_addr,
            self.app,
            Arc::new(self.config),
            self.events,
            shutdown_rx,
        ));
        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
            events,
        })
    }
}

/// Controls a running [`Server`]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<Shutdown>,
    task: JoinHandle<()>,
    events: Arc<dyn Events>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the open ones. A graceful stop lets in-flight
    /// requests finish and closes idle keep-alive connections, otherwise connections are aborted.
    pub async fn stop(self, graceful: bool) -> Result<(), HttpServerError> {
        self.events.state(ServerState::Stop);
        self.shutdown.send_replace(if graceful {
            Shutdown::Graceful
        } else {
            Shutdown::Immediate
        });
        self.task.await?;
        self.events.state(ServerState::Done);
        Ok(())
    }
}

async fn accept_loop<A: App>(
    listener: TcpListener,
    local_addr: SocketAddr,
    app: Arc<A>,
    config: Arc<ServerConfig>,
    events: Arc<dyn Events>,
    mut shutdown: watch::Receiver<Shutdown>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("accept failed: {err}");
                        continue;
                    }
                };
                if let Err(err) = stream.set_nodelay(true) {
                    debug!("{peer}: set_nodelay failed: {err}");
                }
                let local = stream.local_addr().unwrap_or(local_addr);
                let session = Session::new(
                    app.clone(),
                    config.clone(),
                    events.clone(),
                    ConnectionInfo::new(peer, local),
                    shutdown.clone(),
                );
                connections.spawn(session.serve(Box::new(stream)));
            }
            _ = stopping(&mut shutdown) => break,
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                report(finished);
            }
        }
    }
    drop(listener);

    if *shutdown.borrow() == Shutdown::Immediate {
        connections.abort_all();
    }
    debug!("waiting for {} connections", connections.len());
    while let Some(finished) = connections.join_next().await {
        report(finished);
    }
}

fn report(finished: Result<(), JoinError>) {
    if let Err(err) = finished
        && err.is_panic()
    {
        error!("connection task panicked: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };
    use uhsapi::http::StatusCode;

    use super::*;
    use crate::{app::app_fn, env::Env, http::response::Response};

    #[derive(Default)]
    struct States(Mutex<Vec<ServerState>>);

    impl Events for States {
        fn state(&self, state: ServerState) {
            self.0.lock().unwrap().push(state);
        }
    }

    fn hello() -> impl App {
        app_fn(|_env: Env| async { Ok(Response::text(StatusCode::OK, "hello")) })
    }

    #[tokio::test]
    async fn lifecycle_states() {
        let states = Arc::new(States::default());
        let handle = Server::new(hello())
            .events(states.clone())
            .bind(([127, 0, 0, 1], 0))
            .unwrap();
        assert_eq!(
            *states.0.lock().unwrap(),
            [ServerState::Booting, ServerState::Running]
        );
        handle.stop(true).await.unwrap();
        assert_eq!(
            *states.0.lock().unwrap(),
            [
                ServerState::Booting,
                ServerState::Running,
                ServerState::Stop,
                ServerState::Done
            ]
        );
    }

    #[tokio::test]
    async fn graceful_stop_closes_idle_connections() {
        let handle = Server::new(hello()).bind(([127, 0, 0, 1], 0)).unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = [0; 64];
        let n = stream.read(&mut response).await.unwrap();
        assert!(response[..n].starts_with(b"HTTP/1.1 200 OK\r\n"));

        handle.stop(true).await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn immediate_stop_aborts() {
        let handle = Server::new(app_fn(|_env: Env| async {
            future::pending::<()>().await;
            Ok(Response::new(StatusCode::OK))
        }))
        .bind(([127, 0, 0, 1], 0))
        .unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.stop(false).await.unwrap();
    }
}
