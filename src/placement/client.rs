// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use log::warn;
use tokio::time::sleep;

use super::PlacementClient;
use crate::config::PlacementRetryConfig;
use crate::proto::metapb;
use crate::proto::placementpb;
use crate::proto::placementpb::placement_client::PlacementClient as PlacementGrpcClient;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::Error;
use crate::Result;
use crate::SecurityManager;

/// A connected placement directory client.
///
/// Connecting walks the endpoint list under [`PlacementRetryConfig`] until a
/// member answers `GetMembers`; the cluster id from that response is attached
/// to every later request.
pub struct PlacementRpcClient {
    grpc: PlacementGrpcClient,
    cluster_id: u64,
    closed: AtomicBool,
}

impl PlacementRpcClient {
    pub async fn connect(
        endpoints: &[String],
        security_mgr: &SecurityManager,
        connect_timeout: Duration,
        retry: PlacementRetryConfig,
    ) -> Result<PlacementRpcClient> {
        let mut last_error = Error::StringError("no placement endpoints provided".to_owned());
        for attempt in 0..retry.max_reconnect_attempts.max(1) {
            for endpoint in endpoints {
                match Self::try_connect(endpoint, security_mgr, connect_timeout).await {
                    Ok(client) => {
                        info!(
                            "connected to placement directory {} (cluster {})",
                            endpoint, client.cluster_id
                        );
                        return Ok(client);
                    }
                    Err(e) => {
                        warn!("failed to connect to placement directory {endpoint}: {e}");
                        last_error = e;
                    }
                }
            }
            if attempt + 1 < retry.max_reconnect_attempts {
                sleep(retry.reconnect_interval).await;
            }
        }
        Err(last_error)
    }

    async fn try_connect(
        endpoint: &str,
        security_mgr: &SecurityManager,
        connect_timeout: Duration,
    ) -> Result<PlacementRpcClient> {
        let mut grpc = security_mgr
            .connect(endpoint, connect_timeout, PlacementGrpcClient::new)
            .await?;
        let resp = grpc
            .get_members(placementpb::GetMembersRequest::default())
            .await?
            .into_inner();
        let cluster_id = resp.header.map(|h| h.cluster_id).unwrap_or_default();
        Ok(PlacementRpcClient {
            grpc,
            cluster_id,
            closed: AtomicBool::new(false),
        })
    }

    fn header(&self) -> Option<placementpb::RequestHeader> {
        Some(placementpb::RequestHeader {
            cluster_id: self.cluster_id,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }
        Ok(())
    }

    fn to_region_with_leader(
        key: &[u8],
        resp: placementpb::GetRegionResponse,
    ) -> Result<RegionWithLeader> {
        let region = resp.region.ok_or_else(|| Error::RegionForKeyNotFound {
            key: key.to_vec(),
        })?;
        Ok(RegionWithLeader {
            region,
            leader: resp.leader,
        })
    }
}

#[async_trait]
impl PlacementClient for PlacementRpcClient {
    async fn get_region(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader> {
        self.check_open()?;
        let req = placementpb::GetRegionRequest {
            header: self.header(),
            key: key.clone(),
        };
        let resp = self.grpc.clone().get_region(req).await?.into_inner();
        Self::to_region_with_leader(&key, resp)
    }

    async fn get_prev_region(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader> {
        self.check_open()?;
        let req = placementpb::GetRegionRequest {
            header: self.header(),
            key: key.clone(),
        };
        let resp = self.grpc.clone().get_prev_region(req).await?.into_inner();
        Self::to_region_with_leader(&key, resp)
    }

    async fn get_store(self: Arc<Self>, id: StoreId) -> Result<metapb::Store> {
        self.check_open()?;
        let req = placementpb::GetStoreRequest {
            header: self.header(),
            store_id: id,
        };
        let resp = self.grpc.clone().get_store(req).await?.into_inner();
        resp.store
            .ok_or_else(|| crate::internal_err!("store {} missing from directory response", id))
    }

    fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
