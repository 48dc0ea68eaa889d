// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! The RPC transport: per-store gRPC clients behind an address-keyed pool.

mod client;
mod errors;
mod request;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use tokio::sync::OnceCell;
use tokio::sync::RwLock;

pub use self::client::KvClient;
pub use self::client::KvConnect;
pub use self::client::KvRpcClient;
pub use self::client::RangeKvConnect;
pub use self::errors::HasRegionError;
pub use self::errors::HasStrError;
pub use self::errors::SetRegionError;
pub use self::request::KvRequest;
pub use self::request::Request;
use crate::Result;
use crate::SecurityManager;

/// The shared transport: resolves a store address to a pooled connection and
/// dispatches one request on it.
#[async_trait]
pub trait KvTransport: Send + Sync + 'static {
    async fn dispatch(
        &self,
        address: &str,
        req: &dyn Request,
        timeout: Duration,
    ) -> Result<Box<dyn Any + Send>>;

    /// Drop pooled connections. Idempotent.
    async fn close(&self);
}

/// The production transport over gRPC, one lazily-dialed client per store
/// address.
pub struct RpcClient<KvC: KvConnect = RangeKvConnect> {
    kv_connect: KvC,
    kv_client_cache: RwLock<HashMap<String, Arc<OnceCell<KvC::KvClient>>>>,
}

impl RpcClient<RangeKvConnect> {
    pub fn new(security_mgr: Arc<SecurityManager>, connect_timeout: Duration) -> Self {
        RpcClient {
            kv_connect: RangeKvConnect::new(security_mgr, connect_timeout),
            kv_client_cache: RwLock::new(HashMap::new()),
        }
    }
}

impl<KvC: KvConnect> RpcClient<KvC> {
    async fn kv_client(&self, address: &str) -> Result<KvC::KvClient> {
        // Avoid repeated concurrent dial attempts for the same address.
        let cached = { self.kv_client_cache.read().await.get(address).cloned() };
        let cell = match cached {
            Some(cell) => cell,
            None => {
                let new = Arc::new(OnceCell::new());
                self.kv_client_cache
                    .write()
                    .await
                    .entry(address.to_owned())
                    .or_insert_with(|| new.clone())
                    .clone()
            }
        };

        let client = cell
            .get_or_try_init(|| async {
                info!("connect to kv store endpoint: {:?}", address);
                self.kv_connect.connect(address).await
            })
            .await?;
        Ok(client.clone())
    }
}

#[async_trait]
impl<KvC: KvConnect> KvTransport for RpcClient<KvC> {
    async fn dispatch(
        &self,
        address: &str,
        req: &dyn Request,
        timeout: Duration,
    ) -> Result<Box<dyn Any + Send>> {
        let client = self.kv_client(address).await?;
        client.dispatch(req, timeout).await
    }

    async fn close(&self) {
        self.kv_client_cache.write().await.clear();
    }
}
