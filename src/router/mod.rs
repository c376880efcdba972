//! Loopback WebSocket router: handshake, dispatch, session table
pub mod dispatch;
pub mod handshake;
pub mod inject;
pub mod messages;
pub mod session_table;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::session::SessionConfig;

use dispatch::{dispatch, Context};
use handshake::{check_origin, check_token};
use messages::{ClientMessage, ErrorCode, ServerMessage};
use session_table::SessionTable;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("failed to bind loopback listener: {0}")]
    BindFailed(#[source] std::io::Error),
}

/// Binds the loopback listener and spawns the accept loop in the
/// background. Returns the bound port immediately; the session table is a
/// process-wide singleton shared by every accepted connection, which is
/// what makes session adoption on reconnect possible.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    default_session_config: SessionConfig,
) -> Result<(u16, Arc<SessionTable>), RouterError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(RouterError::BindFailed)?;
    let port = listener
        .local_addr()
        .map_err(RouterError::BindFailed)?
        .port();

    let sessions = Arc::new(SessionTable::new());
    let session_config = Arc::new(StdMutex::new(default_session_config));

    let accept_sessions = Arc::clone(&sessions);
    tokio::spawn(accept_loop(listener, state, accept_sessions, session_config));

    Ok((port, sessions))
}

async fn accept_loop(
    listener: TcpListener,
    state: AppState,
    sessions: Arc<SessionTable>,
    session_config: Arc<StdMutex<SessionConfig>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = state.clone();
                let sessions = Arc::clone(&sessions);
                let session_config = Arc::clone(&session_config);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, sessions, session_config).await {
                        warn!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

fn reject(code: u16, message: &str) -> ErrorResponse {
    http::Response::builder()
        .status(code)
        .body(Some(message.to_string()))
        .expect("building a rejection response never fails")
}

async fn handle_connection(
    stream: TcpStream,
    state: AppState,
    sessions: Arc<SessionTable>,
    session_config: Arc<StdMutex<SessionConfig>>,
) -> anyhow::Result<()> {
    let token = Arc::clone(&state.auth_token);

    let callback = move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != "/ws" {
            return Err(reject(404, "not found"));
        }
        let origin = req
            .headers()
            .get(http::header::ORIGIN)
            .and_then(|v| v.to_str().ok());
        if check_origin(origin).is_err() {
            return Err(reject(401, "origin not allowed"));
        }
        let proto = req
            .headers()
            .get(http::header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        match check_token(proto, &token) {
            Ok(matched) => {
                let mut response = response;
                if let Ok(value) = matched.parse() {
                    response
                        .headers_mut()
                        .insert(http::header::SEC_WEBSOCKET_PROTOCOL, value);
                }
                Ok(response)
            }
            Err(_) => Err(reject(401, "unauthorized")),
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return Ok(()),
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let ctx = Context {
        state,
        sessions,
        writer: tx,
        session_config,
    };

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => dispatch(&ctx, msg).await,
                Err(e) => {
                    let _ = ctx
                        .writer
                        .send(ServerMessage::error(ErrorCode::BadRequest, e.to_string()));
                }
            },
            Ok(Message::Binary(_)) => {
                let _ = ctx.writer.send(ServerMessage::error(
                    ErrorCode::BadRequest,
                    "binary frames are not supported",
                ));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                info!(error = %e, "read loop ending");
                break;
            }
        }
    }

    drop(ctx);
    let _ = writer_task.await;
    Ok(())
}

/// Process-level shutdown: terminate every still-live session. Per-connection
/// disconnects never reach this path — sessions are left running so a
/// reconnect can adopt them.
pub async fn shutdown_all_sessions(sessions: &SessionTable) {
    for entry in sessions.drain() {
        entry.session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_builds_the_requested_status_code() {
        let resp = reject(401, "nope");
        assert_eq!(resp.status(), 401);
    }
}
