//! RPC client addressing peers by public key

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::codec::{
    self, HistoricalPricesRequest, HistoricalPricesResponse, LatestPricesRequest,
    LatestPricesResponse, PingRequest, PingResponse, GET_HISTORICAL_PRICES, GET_LATEST_PRICES,
    PING,
};
use crate::discovery::Discovery;
use crate::error::TransportError;
use crate::identity::{PublicKey, PUBLIC_KEY_LEN};
use crate::transport::{read_response, write_request};

/// An open connection to one verified peer
pub struct Connection {
    stream: TcpStream,
    remote: PublicKey,
    timeout: Duration,
}

impl Connection {
    /// Connect to `addr` and check that it speaks for `expected`
    pub async fn open(
        addr: SocketAddr,
        expected: PublicKey,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let handshake = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;

            let mut announced = [0u8; PUBLIC_KEY_LEN];
            stream.read_exact(&mut announced).await?;
            Ok::<_, TransportError>((stream, PublicKey::from_bytes(announced)))
        };

        let (stream, actual) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        if actual != expected {
            return Err(TransportError::IdentityMismatch { expected, actual });
        }

        debug!("Connected to {} at {}", expected, addr);
        Ok(Self {
            stream,
            remote: actual,
            timeout,
        })
    }

    pub fn remote(&self) -> PublicKey {
        self.remote
    }

    /// Send raw bytes to `method` and wait for the response body.
    ///
    /// An error response from the peer becomes [`TransportError::Remote`];
    /// the connection stays usable.
    pub async fn request(&mut self, method: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let limit = self.timeout;
        let stream = &mut self.stream;

        let exchange = async {
            write_request(stream, method, payload).await?;
            read_response(stream).await
        };

        tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| TransportError::Timeout(limit))??
            .map_err(TransportError::Remote)
    }

    /// JSON request/response round trip
    pub async fn call<Req, Resp>(&mut self, method: &str, request: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = codec::encode(request).map_err(|e| TransportError::Decode(e.to_string()))?;
        let body = self.request(method, &payload).await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Resolves peers through discovery and talks to them
#[derive(Clone)]
pub struct RpcClient {
    discovery: Arc<dyn Discovery>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(discovery: Arc<dyn Discovery>, timeout: Duration) -> Self {
        Self { discovery, timeout }
    }

    pub async fn connect(&self, public_key: &PublicKey) -> Result<Connection, TransportError> {
        let addr = self.discovery.resolve(public_key).await?;
        Connection::open(addr, *public_key, self.timeout).await
    }

    /// One request on a fresh connection
    pub async fn request(
        &self,
        public_key: &PublicKey,
        method: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.connect(public_key).await?.request(method, payload).await
    }

    pub async fn ping(&self, public_key: &PublicKey, nonce: i64) -> Result<i64, TransportError> {
        let response: PingResponse = self
            .connect(public_key)
            .await?
            .call(PING, &PingRequest { nonce })
            .await?;
        Ok(response.nonce)
    }

    pub async fn get_latest_prices(
        &self,
        public_key: &PublicKey,
        pairs: &[String],
    ) -> Result<LatestPricesResponse, TransportError> {
        let request = LatestPricesRequest {
            pairs: pairs.to_vec(),
        };
        self.connect(public_key)
            .await?
            .call(GET_LATEST_PRICES, &request)
            .await
    }

    pub async fn get_historical_prices(
        &self,
        public_key: &PublicKey,
        pairs: &[String],
        from: u64,
        to: u64,
    ) -> Result<HistoricalPricesResponse, TransportError> {
        let request = HistoricalPricesRequest::new(pairs.to_vec(), from, to);
        self.connect(public_key)
            .await?
            .call(GET_HISTORICAL_PRICES, &request)
            .await
    }
}
