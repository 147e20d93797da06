//! Length-prefixed request/response transport over TCP
//!
//! # Wire Format (big endian)
//! ```text
//! on accept: [server public key: 32 bytes]
//! request:   [len: u32][method_len: u16][method: utf-8][payload]
//! response:  [len: u32][status: u8][body]   // status 0 = ok, 1 = error
//! ```
//!
//! An error body is a JSON [`RpcError`]. A connection carries any number of
//! sequential requests.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{RpcError, RpcErrorKind, TransportError};
use crate::identity::PublicKey;

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

/// Method handler: raw request payload in, raw response body out
pub type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, RpcError>> + Send + Sync>;

/// Method name to handler table
#[derive(Clone, Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `method` to `handler`, replacing any previous binding
    pub fn respond<F, Fut>(&mut self, method: &str, handler: F)
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, RpcError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload: Vec<u8>| handler(payload).boxed());
        self.handlers.insert(method.to_string(), handler);
    }

    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    pub async fn dispatch(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        match self.handlers.get(method) {
            Some(handler) => handler(payload).await,
            None => Err(RpcError::unknown_method(method)),
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<(), TransportError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Next frame body, or `None` if the peer closed between frames
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    method: &str,
    payload: &[u8],
) -> Result<(), TransportError> {
    let method_len = u16::try_from(method.len())
        .map_err(|_| TransportError::Protocol(format!("method name of {} bytes", method.len())))?;

    let mut body = Vec::with_capacity(2 + method.len() + payload.len());
    body.extend_from_slice(&method_len.to_be_bytes());
    body.extend_from_slice(method.as_bytes());
    body.extend_from_slice(payload);
    write_frame(writer, &body).await
}

/// Next `(method, payload)`, or `None` once the peer is done
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<(String, Vec<u8>)>, TransportError> {
    let Some(body) = read_frame(reader).await? else {
        return Ok(None);
    };

    if body.len() < 2 {
        return Err(TransportError::Protocol("request frame without method".to_string()));
    }
    let method_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() < 2 + method_len {
        return Err(TransportError::Protocol(format!(
            "method length {} overruns frame of {} bytes",
            method_len,
            body.len()
        )));
    }

    // A non UTF-8 name can only miss the routing table
    let method = String::from_utf8_lossy(&body[2..2 + method_len]).into_owned();
    let payload = body[2 + method_len..].to_vec();
    Ok(Some((method, payload)))
}

fn response_frame(result: &Result<Vec<u8>, RpcError>) -> Result<Vec<u8>, TransportError> {
    let mut frame = Vec::new();
    match result {
        Ok(payload) => {
            frame.reserve(1 + payload.len());
            frame.push(STATUS_OK);
            frame.extend_from_slice(payload);
        }
        Err(e) => {
            frame.push(STATUS_ERROR);
            serde_json::to_writer(&mut frame, e).map_err(|e| TransportError::Protocol(e.to_string()))?;
        }
    }
    Ok(frame)
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    result: &Result<Vec<u8>, RpcError>,
) -> Result<(), TransportError> {
    write_frame(writer, &response_frame(result)?).await
}

/// Response frame for `result`, or an internal error if it would not fit
fn bounded_response(method: &str, result: &Result<Vec<u8>, RpcError>) -> Result<Vec<u8>, TransportError> {
    let frame = response_frame(result)?;
    if frame.len() <= MAX_FRAME_LEN {
        return Ok(frame);
    }

    warn!(%method, bytes = frame.len(), "Response exceeds frame limit");
    response_frame(&Err(RpcError::new(
        RpcErrorKind::Internal,
        format!(
            "response of {} bytes exceeds frame limit of {} bytes",
            frame.len(),
            MAX_FRAME_LEN
        ),
    )))
}

pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Result<Vec<u8>, RpcError>, TransportError> {
    let body = read_frame(reader)
        .await?
        .ok_or_else(|| TransportError::Protocol("connection closed before response".to_string()))?;

    match body.split_first() {
        Some((&STATUS_OK, payload)) => Ok(Ok(payload.to_vec())),
        Some((&STATUS_ERROR, payload)) => {
            let error = serde_json::from_slice(payload).unwrap_or_else(|_| {
                RpcError::new(
                    RpcErrorKind::Internal,
                    String::from_utf8_lossy(payload).into_owned(),
                )
            });
            Ok(Err(error))
        }
        Some((status, _)) => Err(TransportError::Protocol(format!("unknown status {}", status))),
        None => Err(TransportError::Protocol("empty response frame".to_string())),
    }
}

/// TCP listener answering requests through a [`Router`]
pub struct RpcServer {
    listener: TcpListener,
    public_key: PublicKey,
    router: Arc<Router>,
}

impl RpcServer {
    pub async fn bind(addr: &str, public_key: PublicKey, router: Router) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            public_key,
            router: Arc::new(router),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips or its sender is dropped.
    ///
    /// Open connections are closed at their next frame boundary.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("RPC server accepting on {:?} as {}", self.listener.local_addr().ok(), self.public_key);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let router = Arc::clone(&self.router);
                        let public_key = self.public_key;
                        let conn_shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            debug!(%peer, "Connection opened");
                            match serve_connection(stream, public_key, router, conn_shutdown).await {
                                Ok(()) => debug!(%peer, "Connection closed"),
                                Err(e) => debug!(%peer, "Connection dropped: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        info!("RPC server stopped accepting");
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    public_key: PublicKey,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    stream.write_all(public_key.as_bytes()).await?;

    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            request = read_request(&mut stream) => request?,
        };
        let Some((method, payload)) = request else {
            return Ok(());
        };

        let result = router.dispatch(&method, payload).await;
        match &result {
            Ok(body) => debug!(%method, bytes = body.len(), "Request served"),
            Err(e) => debug!(%method, "Request failed: {}", e),
        }
        write_frame(&mut stream, &bounded_response(&method, &result)?).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_frame_layout() {
        let mut buf = Vec::new();
        write_request(&mut buf, "ping", b"{}").await.unwrap();

        assert_eq!(&buf[..4], &8u32.to_be_bytes());
        assert_eq!(&buf[4..6], &4u16.to_be_bytes());
        assert_eq!(&buf[6..10], b"ping");
        assert_eq!(&buf[10..], b"{}");

        let mut reader = buf.as_slice();
        let (method, payload) = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(method, "ping");
        assert_eq!(payload, b"{}");
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let mut buf = Vec::new();
        let err = RpcError::unknown_method("nope");
        write_response(&mut buf, &Err(err.clone())).await.unwrap();

        assert_eq!(buf[4], STATUS_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&buf[5..]).unwrap();
        assert_eq!(body["error"], "UnknownMethod");

        let mut reader = buf.as_slice();
        assert_eq!(read_response(&mut reader).await.unwrap(), Err(err));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let mut reader = buf.as_slice();
        assert!(matches!(
            read_request(&mut reader).await,
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_method_overrunning_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&10u16.to_be_bytes());
        buf.push(b'p');
        let mut reader = buf.as_slice();
        assert!(matches!(
            read_request(&mut reader).await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_response_becomes_error() {
        let frame = bounded_response("big", &Ok(vec![0u8; MAX_FRAME_LEN + 10])).unwrap();
        assert_eq!(frame[0], STATUS_ERROR);

        let err: RpcError = serde_json::from_slice(&frame[1..]).unwrap();
        assert_eq!(err.kind, RpcErrorKind::Internal);
        assert!(err.message.contains("exceeds frame limit"));

        let frame = bounded_response("small", &Ok(b"ok".to_vec())).unwrap();
        assert_eq!(frame, [&[STATUS_OK][..], &b"ok"[..]].concat());
    }

    #[tokio::test]
    async fn test_router_dispatch() {
        let mut router = Router::new();
        router.respond("echo", |payload| async move { Ok(payload) });

        assert_eq!(router.dispatch("echo", b"hi".to_vec()).await.unwrap(), b"hi");
        let err = router.dispatch("missing", Vec::new()).await.unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::UnknownMethod);
        assert_eq!(router.methods(), vec!["echo"]);
    }
}
