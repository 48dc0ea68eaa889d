// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Per-region request dispatch.
//!
//! A [`RegionRequestSender`] resolves a routing token to the region's leader
//! store through the routing cache and sends one request on the shared
//! transport. Callers inspect the response for a region error and drive
//! backoff-and-retry themselves; [`RegionRequestSender::on_region_error`] is
//! the shared "repair cache, charge backoff" step they all use.

use std::sync::Arc;
use std::time::Duration;

use derive_new::new;
use log::debug;

use crate::backoff::Backoffer;
use crate::backoff::BackofferError;
use crate::backoff::BO_REGION_MISS;
use crate::backoff::BO_SERVER_BUSY;
use crate::placement::PlacementClient;
use crate::proto::errorpb;
use crate::region::RegionVerId;
use crate::region_cache::RegionCache;
use crate::store::KvRequest;
use crate::store::KvTransport;
use crate::store::SetRegionError;
use crate::Error;
use crate::Result;

#[derive(new)]
pub(crate) struct RegionRequestSender<C: PlacementClient> {
    cache: Arc<RegionCache<C>>,
    transport: Arc<dyn KvTransport>,
}

impl<C: PlacementClient> RegionRequestSender<C> {
    /// Send `req` to the leader of the region identified by `region`.
    ///
    /// When the token no longer resolves in the cache (a concurrent
    /// invalidation won), a synthetic region error is returned so the caller
    /// re-resolves instead of failing. Transport failures invalidate the
    /// routing entry before propagating. The in-flight wait is raced against
    /// the budget's cancellation so sibling failures abort it promptly.
    pub(crate) async fn send_req<R: KvRequest>(
        &self,
        bo: &mut Backoffer,
        req: &mut R,
        region: &RegionVerId,
        timeout: Duration,
    ) -> Result<R::Response> {
        let Some(region_with_leader) = self.cache.get_region_by_ver_id(region).await else {
            let mut resp = R::Response::default();
            resp.set_region_error(errorpb::Error {
                message: format!("routing token {region:?} is no longer cached"),
                epoch_not_match: Some(errorpb::EpochNotMatch::default()),
                ..Default::default()
            });
            return Ok(resp);
        };

        req.set_leader(&region_with_leader)?;
        let store_id = region_with_leader.get_store_id()?;
        let store = self.cache.get_store_by_id(bo, store_id).await?;

        let label = req.label();
        let result = tokio::select! {
            r = self.transport.dispatch(&store.address, &*req, timeout) => r,
            _ = bo.canceled() => Err(Error::Backoff(BackofferError::Canceled {
                message: format!("{label} canceled while in flight"),
            })),
        };

        match result {
            Ok(resp) => {
                // A success envelope with the wrong (or no) body is fatal for
                // the operation.
                match resp.downcast::<R::Response>() {
                    Ok(resp) => Ok(*resp),
                    Err(_) => {
                        debug!("{label}: response body missing or mistyped");
                        Err(Error::BodyMissing)
                    }
                }
            }
            Err(e) => {
                if !e.is_canceled() {
                    self.cache.invalidate_region_cache(region).await;
                    if e.is_transient() {
                        self.cache.invalidate_store_cache(store_id).await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Repair the routing cache for `e` and charge one backoff sleep.
    ///
    /// Region errors are absorbed here: the caller loops on success and
    /// surfaces the budget error (exhaustion or cancellation) otherwise.
    pub(crate) async fn on_region_error(
        &self,
        bo: &mut Backoffer,
        region: &RegionVerId,
        e: errorpb::Error,
    ) -> Result<()> {
        self.cache.on_region_error(&e, region).await;
        let cfg = if e.server_is_busy.is_some() {
            &BO_SERVER_BUSY
        } else {
            &BO_REGION_MISS
        };
        bo.backoff(cfg, format!("{e:?}")).await?;
        Ok(())
    }
}
