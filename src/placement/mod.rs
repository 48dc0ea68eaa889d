// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! The placement directory client.
//!
//! The directory maps keys to regions and tracks region leaders and store
//! addresses. The routing cache consumes this module through the
//! [`PlacementClient`] trait so tests can substitute a mock directory.

mod client;

use std::sync::Arc;

use async_trait::async_trait;

pub use client::PlacementRpcClient;

use crate::proto::metapb;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::Result;

#[async_trait]
pub trait PlacementClient: Send + Sync + 'static {
    /// The region containing `key`.
    async fn get_region(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader>;

    /// The region immediately before the one containing `key`. Used to
    /// resolve a key acting as an exclusive end bound that falls exactly on a
    /// region boundary.
    async fn get_prev_region(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader>;

    /// The store's current address and metadata.
    async fn get_store(self: Arc<Self>, id: StoreId) -> Result<metapb::Store>;

    /// The cluster this directory serves, learned at connect time.
    fn cluster_id(&self) -> u64;

    /// Stop issuing directory requests. Idempotent.
    fn close(&self);
}
