//! RPC gateway - lifecycle and method bindings of the node's endpoint

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use oracle_core::RpcConfig;
use oracle_query::QueryService;
use oracle_store::{IdentityStore, TimeSeriesStore};

use crate::codec::{
    self, HistoricalPricesRequest, LatestPricesRequest, PingRequest, PingResponse,
    GET_HISTORICAL_PRICES, GET_LATEST_PRICES, PING,
};
use crate::discovery::{Announcement, Discovery};
use crate::error::{GatewayError, RpcError, RpcErrorKind};
use crate::identity::{NodeIdentity, PublicKey};
use crate::transport::{Router, RpcServer};

/// Gateway lifecycle: `Created -> Ready -> Serving -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Created,
    Ready,
    Serving,
    Closed,
}

fn encode_response<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, RpcError> {
    codec::encode(value).map_err(|e| RpcError::new(RpcErrorKind::Internal, e.to_string()))
}

/// Bind the node's methods to `query`
pub fn build_router(query: QueryService) -> Router {
    let mut router = Router::new();

    router.respond(PING, |payload| async move {
        let request: PingRequest = codec::decode(&payload)?;
        encode_response(&PingResponse::answer(request))
    });

    let latest = query.clone();
    router.respond(GET_LATEST_PRICES, move |payload| {
        let query = latest.clone();
        async move {
            let request: LatestPricesRequest = codec::decode(&payload)?;
            let prices = query.resolve_latest(&request.pairs)?;
            encode_response(&prices)
        }
    });

    router.respond(GET_HISTORICAL_PRICES, move |payload| {
        let query = query.clone();
        async move {
            let request: HistoricalPricesRequest = codec::decode(&payload)?;
            let (from, to) = request.window();
            let prices = query.resolve_historical(&request.pairs, from, to)?;
            encode_response(&prices)
        }
    });

    router
}

struct Serving {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
}

/// The node's RPC endpoint.
///
/// Transitions are strictly ordered; calling one out of order fails with
/// [`GatewayError::InvalidTransition`] and leaves the state unchanged.
pub struct RpcGateway {
    state: GatewayState,
    config: RpcConfig,
    identities: IdentityStore,
    store: TimeSeriesStore,
    discovery: Arc<dyn Discovery>,
    identity: Option<NodeIdentity>,
    serving: Option<Serving>,
}

impl RpcGateway {
    pub fn new(
        config: RpcConfig,
        identities: IdentityStore,
        store: TimeSeriesStore,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        Self {
            state: GatewayState::Created,
            config,
            identities,
            store,
            discovery,
            identity: None,
            serving: None,
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// RPC public key, known once the gateway is ready
    pub fn public_key(&self) -> Option<PublicKey> {
        self.identity.as_ref().map(|id| id.rpc.public_key())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().map(|s| s.address)
    }

    fn expect_state(&self, expected: GatewayState, action: &'static str) -> Result<(), GatewayError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GatewayError::InvalidTransition {
                from: self.state,
                action,
            })
        }
    }

    /// `Created -> Ready`: resolve both identities
    pub async fn prepare(&mut self) -> Result<(), GatewayError> {
        self.expect_state(GatewayState::Created, "prepare")?;

        let identity = NodeIdentity::load(&self.identities).await?;
        self.identity = Some(identity);
        self.state = GatewayState::Ready;
        Ok(())
    }

    /// `Ready -> Serving`: listen and announce the RPC key to discovery
    pub async fn serve(&mut self) -> Result<SocketAddr, GatewayError> {
        self.expect_state(GatewayState::Ready, "serve")?;
        let Some(identity) = self.identity.as_ref() else {
            return Err(GatewayError::InvalidTransition {
                from: self.state,
                action: "serve",
            });
        };

        let public_key = identity.rpc.public_key();
        let router = build_router(QueryService::new(self.store.clone()));
        let server = RpcServer::bind(&self.config.address(), public_key, router).await?;
        let address = server.local_addr()?;

        let announcement = Announcement::signed(public_key, address, &identity.discovery);
        self.discovery.register(announcement).await?;

        let (shutdown, rx) = watch::channel(false);
        let server = tokio::spawn(server.run(rx));

        info!(
            target: "audit",
            public_key = %public_key,
            address = %address,
            "RPC gateway serving"
        );

        self.serving = Some(Serving {
            address,
            shutdown,
            server,
        });
        self.state = GatewayState::Serving;
        Ok(address)
    }

    /// `Serving -> Closed`: withdraw the announcement and stop accepting.
    ///
    /// The gateway closes even if discovery cannot be reached; that failure
    /// is logged.
    pub async fn close(&mut self) -> Result<(), GatewayError> {
        self.expect_state(GatewayState::Serving, "close")?;

        if let Some(public_key) = self.public_key() {
            if let Err(e) = self.discovery.unregister(&public_key).await {
                warn!("Failed to withdraw announcement for {}: {}", public_key, e);
            }
        }

        if let Some(serving) = self.serving.take() {
            let _ = serving.shutdown.send(true);
            if let Err(e) = serving.server.await {
                warn!("RPC server task ended abnormally: {}", e);
            }
        }

        self.state = GatewayState::Closed;
        info!(target: "audit", "RPC gateway closed");
        Ok(())
    }
}
