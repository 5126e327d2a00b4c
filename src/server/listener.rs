use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::auth::{AllowAll, Authenticator};
use crate::config::Config;
use crate::handler::HandlerRegistry;
use crate::http::connection::Connection;
use crate::http::writer::{forbidden_max_connections, write_with_retry};
use crate::server::ServerContext;
use crate::server::admission::Admission;
use crate::server::socket::{Acceptor, PlainAcceptor, Socket};

/// Pause after an accept error that is not specific to one connection, such
/// as running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long a rejected peer's pending request is read and discarded.
const REJECT_LINGER: Duration = Duration::from_secs(2);
const REJECT_DRAIN_LIMIT: usize = 1024 * 1024;

pub struct Server<A = PlainAcceptor> {
    config: Arc<Config>,
    handlers: Arc<HandlerRegistry>,
    authenticator: Arc<dyn Authenticator>,
    acceptor: Arc<A>,
    admission: Admission,
}

impl Server<PlainAcceptor> {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let handlers = Arc::new(HandlerRegistry::new(config.clone())?);
        let admission = Admission::new(config.max_connections);
        Ok(Self {
            config,
            handlers,
            authenticator: Arc::new(AllowAll),
            acceptor: Arc::new(PlainAcceptor),
            admission,
        })
    }
}

impl<A: Acceptor> Server<A> {
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Replaces the registry built from the configured mappings.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Serves over streams produced by `acceptor`, e.g. a TLS handshake.
    pub fn with_acceptor<B: Acceptor>(self, acceptor: B) -> Server<B> {
        Server {
            config: self.config,
            handlers: self.handlers,
            authenticator: self.authenticator,
            acceptor: Arc::new(acceptor),
            admission: self.admission,
        }
    }

    /// Registered handlers and mappings. Changes apply to later requests.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accepts connections until `shutdown` resolves. Each connection is
    /// served on its own task.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.config.tls && !self.acceptor.is_secure() {
            anyhow::bail!("tls is enabled but no secure acceptor was configured");
        }

        let ctx = Arc::new(ServerContext {
            config: self.config.clone(),
            handlers: self.handlers.clone(),
            authenticator: self.authenticator.clone(),
            read_settings: self.config.read_settings(),
        });

        info!("Listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        if let Some(pause) = accept_backoff(&e) {
                            tokio::time::sleep(pause).await;
                        }
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    info!("Listener stopped");
                    return Ok(());
                }
            };

            let Some(guard) = self.admission.try_admit(peer.ip()) else {
                warn!(
                    peer = %peer,
                    active = self.admission.active_peers(),
                    "Maximum connections exceeded, rejecting"
                );
                let reply = forbidden_max_connections(&self.config.server_name);
                tokio::spawn(reject(stream, peer, reply));
                continue;
            };

            debug!("Accepted connection from {}", peer);
            let acceptor = self.acceptor.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let stream = match acceptor.accept(stream).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Handshake failed");
                        return;
                    }
                };

                let mut socket = Socket::new(stream, peer);
                if acceptor.is_secure() {
                    socket = socket.secure();
                }

                let mut conn = Connection::new(socket, ctx);
                if let Err(e) = conn.run().await {
                    error!("Connection error from {}: {:#}", peer, e);
                }
            });
        }
    }
}

fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

/// Answers with the 403 and then reads off whatever the peer already sent,
/// so closing with unread data does not reset the connection before the
/// reply is read.
async fn reject(stream: TcpStream, peer: SocketAddr, reply: Vec<u8>) {
    let mut socket = Socket::new(stream, peer);
    if let Err(e) = write_with_retry(&mut socket, &reply).await {
        debug!(peer = %peer, error = %e, "Rejected peer left early");
        socket.shutdown().await;
        return;
    }
    socket.shutdown().await;

    let drained = tokio::time::timeout(REJECT_LINGER, async {
        let mut sink = BytesMut::with_capacity(8 * 1024);
        let mut total = 0;
        while total < REJECT_DRAIN_LIMIT {
            sink.clear();
            match socket.receive(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
        total
    })
    .await;
    if let Ok(total) = drained {
        debug!(peer = %peer, bytes = total, "Drained rejected peer");
    }
}

/// Binds the configured address and serves until the task is dropped.
pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    Server::new(cfg)?
        .serve(listener, std::future::pending())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_backoff_only_for_listener_wide_errors() {
        // EMFILE
        assert_eq!(accept_backoff(&io::Error::from_raw_os_error(24)), Some(ACCEPT_BACKOFF));
        assert_eq!(
            accept_backoff(&io::ErrorKind::ConnectionAborted.into()),
            None
        );
        assert_eq!(accept_backoff(&io::ErrorKind::Interrupted.into()), None);
    }
}
