use super::{ provided_api_key, Shared };
use crate::models::chat::ChatSettings;
use crate::models::session::Session;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::rag::stream::stream_predict;

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use chrono::Utc;
use futures::stream::SplitSink;
use futures::{ SinkExt, StreamExt };
use log::{ debug, error, info, warn };

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap()));
}

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

pub async fn start_ws_server(
    addr: &str,
    shared: Shared,
    api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let shared = shared.clone();
        let required_api_key = api_key.clone();

        tokio::spawn(async move {
            if let Err(e) = process_connection(peer, stream, shared, required_api_key).await {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

fn handshake_api_key(req: &Request) -> Option<String> {
    let header = req.headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());
    provided_api_key(header, req.uri().query())
}

fn unauthorized() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("Unauthorized".to_string()));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    shared: Shared,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        info!("Handshake from {}", peer);
        if let Some(ref required) = required_api_key {
            if handshake_api_key(req).as_deref() != Some(required.as_str()) {
                warn!("{}: bad or missing API key", peer);
                return Err(unauthorized());
            }
            info!("{} authenticated", peer);
        } else {
            debug!("{} no API key required", peer);
        }
        Ok(response)
    };

    match accept_hdr_async(stream, auth_callback).await {
        Ok(ws) => {
            handle_connection(peer, ws, shared).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

async fn send_message<S>(
    tx: &mut WsSink<S>,
    message: &ServerMessage
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let json = serde_json::to_string(message)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

/// Relays every snapshot of one answer, then keeps the final history and metrics.
async fn answer<S>(
    tx: &mut WsSink<S>,
    shared: &Shared,
    session: &mut Session,
    question: String,
    settings: ChatSettings
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    send_message(tx, &ServerMessage::Processing).await?;

    let mut snapshots = stream_predict(
        shared.client.clone(),
        shared.catalog.clone(),
        settings,
        question,
        session.metrics.clone(),
        session.history.clone()
    );

    let mut last = None;
    while let Some(snapshot) = snapshots.next().await {
        send_message(tx, &ServerMessage::Snapshot(snapshot.clone())).await?;
        last = Some(snapshot);
    }

    match last {
        Some(snapshot) => session.adopt(&snapshot),
        None => warn!("Session {} received no snapshots for its question", session.id),
    }
    send_message(tx, &ServerMessage::Done { timestamp: Utc::now().timestamp() }).await
}

pub async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>, shared: Shared)
    where S: AsyncRead + AsyncWrite + Unpin
{
    let (mut tx, mut rx) = websocket.split();
    let mut session = Session::new();
    info!("Assigned session ID {} to {}", session.id, peer);

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                match e {
                    | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::Protocol(_)
                    | tokio_tungstenite::tungstenite::Error::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                        io_err.kind() == std::io::ErrorKind::ConnectionReset
                    => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds size limit ({} > {})",
                peer,
                message.len(),
                MAX_MESSAGE_SIZE
            );
            let too_large = ServerMessage::Error { message: "Message too large".to_string() };
            if let Err(e) = send_message(&mut tx, &too_large).await {
                error!("Failed to send size limit error to {}: {}", peer, e);
            }
            break;
        }

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Ping(data) => {
                if tx.send(Message::Pong(data)).await.is_err() {
                    error!("Failed to send pong to {}", peer);
                    break;
                }
                continue;
            }
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
                continue;
            }
            Message::Pong(_) | Message::Frame(_) => {
                continue;
            }
        };

        let result = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Chat { content, settings }) => {
                info!("Session {} asked a question ({})", session.id, settings.inference_mode);
                answer(&mut tx, &shared, &mut session, content, settings).await
            }
            Ok(ClientMessage::Clear) => {
                info!("Clearing chat history for session {}", session.id);
                session.clear();
                send_message(&mut tx, &ServerMessage::Cleared).await
            }
            Err(e) => {
                warn!("Failed to parse message from {}: {}", peer, e);
                let parse_error = ServerMessage::Error {
                    message: format!("Failed to parse message: {}", e),
                };
                send_message(&mut tx, &parse_error).await
            }
        };

        if let Err(e) = result {
            error!("Error sending to {}: {}", peer, e);
            break;
        }
    }
    info!("WebSocket connection closed for {} (Session ID: {})", peer, session.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_key_from_header_or_query() {
        let header = Request::builder()
            .uri("/chat")
            .header("X-API-Key", "secret")
            .body(())
            .unwrap();
        assert_eq!(handshake_api_key(&header).as_deref(), Some("secret"));

        let query = Request::builder().uri("/chat?foo=1&api_key=s%20k").body(()).unwrap();
        assert_eq!(handshake_api_key(&query).as_deref(), Some("s k"));

        let none = Request::builder().uri("/chat").body(()).unwrap();
        assert_eq!(handshake_api_key(&none), None);
    }

    #[test]
    fn unauthorized_response_status() {
        assert_eq!(unauthorized().status(), StatusCode::UNAUTHORIZED);
    }
}
