use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, error, info, warn};

use crate::auth::AuthDecision;
use crate::error::{HttpError, ResponseError, WireError};
use crate::http::body;
use crate::http::cookie::supports_http_only;
use crate::http::error_page;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::{self, FlushOutcome, ResponseWriter};
use crate::server::ServerContext;
use crate::server::socket::{Socket, Transport};

/// Serves the requests arriving on one accepted socket.
pub struct Connection<S> {
    socket: Socket<S>,
    carry: BytesMut,
    state: ConnectionState,
    ctx: Arc<ServerContext>,
    served: usize,
}

pub enum ConnectionState {
    Reading,
    Processing(Box<Request>),
    Writing(Box<Response>, bool), // bool = keep_alive?
    Closed,
}

impl<S: Transport> Connection<S> {
    pub fn new(socket: Socket<S>, ctx: Arc<ServerContext>) -> Self {
        Self {
            socket,
            carry: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            ctx,
            served: 0,
        }
    }

    pub fn requests_served(&self) -> usize {
        self.served
    }

    /// Runs the connection to completion. The socket is always shut down
    /// before this returns.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let result = self.drive().await;
        self.socket.shutdown().await;
        result
    }

    async fn drive(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = self.read_request().await;
                }

                ConnectionState::Processing(req) => {
                    let ctx = self.ctx.clone();
                    let (response, keep_alive) = process(&ctx, &mut self.socket, *req).await;
                    self.state = ConnectionState::Writing(Box::new(response), keep_alive);
                }

                ConnectionState::Writing(mut response, keep_alive) => {
                    let outcome = writer::flush(&mut self.socket, &mut response, true).await?;
                    self.served += 1;

                    self.state = if outcome == FlushOutcome::Sent
                        && keep_alive
                        && self.socket.is_connected()
                    {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    };
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> ConnectionState {
        let peer = self.socket.peer_addr();
        let read = tokio::time::timeout(
            self.ctx.config.request_timeout(),
            body::read_request(&mut self.socket, &mut self.carry, &self.ctx.read_settings),
        )
        .await
        .unwrap_or(Err(WireError::TimedOut));

        let result = read.and_then(|raw| match raw {
            Some(raw) => {
                let mut request = Request::from_content(raw)?
                    .ok_or_else(|| HttpError::bad_request("malformed request line"))?;
                body::complete_form(&mut request)?;
                Ok(Some(request))
            }
            None => Ok(None),
        });

        match result {
            Ok(Some(request)) => {
                info!(
                    peer = %peer,
                    method = request.method.as_str(),
                    path = %request.path,
                    "Request"
                );
                ConnectionState::Processing(Box::new(request))
            }
            Ok(None) => ConnectionState::Closed,
            Err(WireError::Disconnected) => {
                debug!(peer = %peer, "Client disconnected while sending request");
                ConnectionState::Closed
            }
            Err(WireError::TimedOut) if self.served > 0 && self.carry.is_empty() => {
                debug!(peer = %peer, "Idle keep-alive connection timed out");
                ConnectionState::Closed
            }
            Err(WireError::TimedOut) => {
                let err = HttpError::timeout("request was not received in time");
                log_error(peer, &err);
                let resp = error_response(&self.ctx, &err, false, false).await;
                ConnectionState::Writing(Box::new(resp), false)
            }
            Err(WireError::Http(err)) => {
                log_error(peer, &err);
                let resp = error_response(&self.ctx, &err, false, false).await;
                ConnectionState::Writing(Box::new(resp), false)
            }
            Err(WireError::Io(e)) => {
                warn!(peer = %peer, error = %e, "Socket error while reading request");
                ConnectionState::Closed
            }
        }
    }
}

/// Authenticates, routes and runs the handler. Handler failures become
/// error pages here; the second value says whether to keep the socket.
async fn process<S: Transport>(
    ctx: &ServerContext,
    socket: &mut Socket<S>,
    mut req: Request,
) -> (Response, bool) {
    let peer = socket.peer_addr();
    let keep_alive = ctx.config.keep_alive && req.keep_alive();
    let head_only = req.method == Method::HEAD;

    if let AuthDecision::Deny { challenge } = ctx.authenticator.authenticate(&req) {
        let err = HttpError::unauthorized("authentication required");
        log_error(peer, &err);
        let mut resp = error_response(ctx, &err, keep_alive, head_only).await;
        if let Some(challenge) = challenge {
            if let Err(e) = resp.set_header("WWW-Authenticate", challenge) {
                debug!(error = %e, "Could not attach authentication challenge");
            }
        }
        return (resp, keep_alive);
    }

    let mut resp = Response::for_request(
        ctx.config.server_name.clone(),
        keep_alive,
        supports_http_only(req.headers.user_agent()),
        head_only,
    );

    let outcome = match ctx.handlers.resolve(req.method, &req.path) {
        Ok(Some(handler)) => {
            let mut writer = ResponseWriter::new(&mut resp, socket);
            handler.process(&mut req, &mut writer).await
        }
        Ok(None) => Err(HttpError::not_found(&req.path)),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => (resp, keep_alive),
        Err(err) if resp.headers_sent() => {
            // too late for an error page
            log_error(peer, &err);
            resp.abandon();
            (resp, false)
        }
        Err(err) => {
            log_error(peer, &err);
            (error_response(ctx, &err, keep_alive, head_only).await, keep_alive)
        }
    }
}

fn log_error(peer: SocketAddr, err: &HttpError) {
    if err.status.as_u16() >= 500 {
        error!(peer = %peer, status = err.status.as_u16(), kind = %err.kind, error = %err, "Request failed");
    } else {
        info!(peer = %peer, status = err.status.as_u16(), kind = %err.kind, error = %err, "Request rejected");
    }
}

async fn error_response(
    ctx: &ServerContext,
    err: &HttpError,
    keep_alive: bool,
    head_only: bool,
) -> Response {
    let page = error_page::render(err, ctx.config.custom_error_folder.as_deref()).await;
    let server_name = ctx.config.server_name.clone();

    let build = || -> Result<Response, ResponseError> {
        let mut resp = Response::for_request(server_name.clone(), keep_alive, false, head_only);
        resp.set_status(err.status)?;
        resp.set_content_type("text/html; charset=utf-8")?;
        resp.write_str(&page);
        Ok(resp)
    };
    build().unwrap_or_else(|e| {
        warn!(error = %e, "Error response could not be built");
        Response::new(server_name.clone())
    })
}
