// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_new::new;

use super::Request;
use crate::proto::rangekvpb::range_kv_client::RangeKvClient;
use crate::Result;
use crate::SecurityManager;

/// A trait for dialing KV stores.
#[async_trait]
pub trait KvConnect: Sized + Send + Sync + 'static {
    type KvClient: KvClient + Clone + Send + Sync + 'static;

    async fn connect(&self, address: &str) -> Result<Self::KvClient>;
}

#[derive(new, Clone)]
pub struct RangeKvConnect {
    security_mgr: Arc<SecurityManager>,
    connect_timeout: Duration,
}

#[async_trait]
impl KvConnect for RangeKvConnect {
    type KvClient = KvRpcClient;

    async fn connect(&self, address: &str) -> Result<KvRpcClient> {
        self.security_mgr
            .connect(address, self.connect_timeout, RangeKvClient::new)
            .await
            .map(KvRpcClient::new)
    }
}

/// Handles requests for a single store, with a per-attempt timeout supplied
/// by the dispatch layer.
#[async_trait]
pub trait KvClient {
    async fn dispatch(&self, req: &dyn Request, timeout: Duration) -> Result<Box<dyn Any + Send>>;
}

/// This client handles requests for a single store node. It converts the
/// client program's data types into the grpc data types.
#[derive(new, Clone)]
pub struct KvRpcClient {
    rpc_client: RangeKvClient,
}

#[async_trait]
impl KvClient for KvRpcClient {
    async fn dispatch(&self, request: &dyn Request, timeout: Duration) -> Result<Box<dyn Any + Send>> {
        request.dispatch(&self.rpc_client, timeout).await
    }
}
