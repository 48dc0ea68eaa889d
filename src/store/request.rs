// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use tonic::IntoRequest;

use super::errors::HasRegionError;
use super::errors::SetRegionError;
use crate::proto::kvrpcpb;
use crate::proto::rangekvpb::range_kv_client::RangeKvClient;
use crate::region::RegionWithLeader;
use crate::Error;
use crate::Result;

/// An object-safe wire request: carries its routing context and knows how to
/// dispatch itself on a store connection.
#[async_trait]
pub trait Request: Any + Sync + Send + 'static {
    async fn dispatch(&self, client: &RangeKvClient, timeout: Duration) -> Result<Box<dyn Any + Send>>;
    fn label(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn context_mut(&mut self) -> &mut kvrpcpb::Context;
    fn set_leader(&mut self, leader: &RegionWithLeader) -> Result<()>;

    /// Hint the server-side execution budget. Write-kind requests set this to
    /// the transport's write budget before sending.
    fn set_max_execution_duration(&mut self, duration: Duration) {
        let ctx = self.context_mut();
        ctx.max_execution_duration_ms = duration.as_millis() as u64;
    }
}

/// A typed request, tying a [`Request`] to its response message.
pub trait KvRequest: Request + Clone {
    type Response: HasRegionError + SetRegionError + Default + Send + 'static;
}

macro_rules! impl_request {
    ($req: ident, $resp: ident, $fun: ident, $label: literal) => {
        #[async_trait]
        impl Request for kvrpcpb::$req {
            async fn dispatch(
                &self,
                client: &RangeKvClient,
                timeout: Duration,
            ) -> Result<Box<dyn Any + Send>> {
                let mut req = self.clone().into_request();
                req.set_timeout(timeout);
                let resp = client.clone().$fun(req).await.map_err(Error::GrpcApi)?;
                Ok(Box::new(resp.into_inner()) as Box<dyn Any + Send>)
            }

            fn label(&self) -> &'static str {
                $label
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn context_mut(&mut self) -> &mut kvrpcpb::Context {
                self.context.get_or_insert(kvrpcpb::Context::default())
            }

            fn set_leader(&mut self, leader: &RegionWithLeader) -> Result<()> {
                let leader_peer = leader.leader.clone().ok_or(Error::LeaderNotFound {
                    region: leader.ver_id(),
                })?;
                let region_id = leader.region.id;
                let region_epoch = leader.region.region_epoch;
                let ctx = self.context_mut();
                ctx.region_id = region_id;
                ctx.region_epoch = region_epoch;
                ctx.peer = Some(leader_peer);
                Ok(())
            }
        }

        impl KvRequest for kvrpcpb::$req {
            type Response = kvrpcpb::$resp;
        }
    };
}

impl_request!(RawGetRequest, RawGetResponse, raw_get, "raw_get");
impl_request!(
    RawBatchGetRequest,
    RawBatchGetResponse,
    raw_batch_get,
    "raw_batch_get"
);
impl_request!(
    RawGetKeyTtlRequest,
    RawGetKeyTtlResponse,
    raw_get_key_ttl,
    "raw_get_key_ttl"
);
impl_request!(RawPutRequest, RawPutResponse, raw_put, "raw_put");
impl_request!(
    RawBatchPutRequest,
    RawBatchPutResponse,
    raw_batch_put,
    "raw_batch_put"
);
impl_request!(RawDeleteRequest, RawDeleteResponse, raw_delete, "raw_delete");
impl_request!(
    RawBatchDeleteRequest,
    RawBatchDeleteResponse,
    raw_batch_delete,
    "raw_batch_delete"
);
impl_request!(
    RawDeleteRangeRequest,
    RawDeleteRangeResponse,
    raw_delete_range,
    "raw_delete_range"
);
impl_request!(RawScanRequest, RawScanResponse, raw_scan, "raw_scan");
impl_request!(
    RawCasRequest,
    RawCasResponse,
    raw_compare_and_swap,
    "raw_compare_and_swap"
);
