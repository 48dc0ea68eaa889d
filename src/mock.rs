// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Test doubles for the placement directory and the transport.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::placement::PlacementClient;
use crate::proto::metapb;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::store::KvClient;
use crate::store::KvTransport;
use crate::store::Request;
use crate::Error;
use crate::Result;

pub(crate) type DispatchHook = Arc<dyn Fn(&dyn Any) -> Result<Box<dyn Any + Send>> + Send + Sync>;

/// A transport whose dispatch is a closure over the typed request.
///
/// Doubles as a per-node `KvClient` for connection-pool tests.
#[derive(Clone, Default)]
pub(crate) struct MockKvClient {
    pub(crate) addr: String,
    dispatch: Option<DispatchHook>,
}

impl MockKvClient {
    pub(crate) fn new(addr: String, dispatch: Option<DispatchHook>) -> Self {
        Self { addr, dispatch }
    }

    pub(crate) fn with_dispatch_hook<F>(dispatch: F) -> Self
    where
        F: Fn(&dyn Any) -> Result<Box<dyn Any + Send>> + Send + Sync + 'static,
    {
        Self {
            addr: String::new(),
            dispatch: Some(Arc::new(dispatch)),
        }
    }

    fn run_hook(&self, req: &dyn Request) -> Result<Box<dyn Any + Send>> {
        match &self.dispatch {
            Some(hook) => hook(req.as_any()),
            None => Err(Error::StringError(
                "no dispatch hook set for MockKvClient".to_owned(),
            )),
        }
    }
}

#[async_trait]
impl KvClient for MockKvClient {
    async fn dispatch(&self, req: &dyn Request, _timeout: Duration) -> Result<Box<dyn Any + Send>> {
        self.run_hook(req)
    }
}

#[async_trait]
impl KvTransport for MockKvClient {
    async fn dispatch(
        &self,
        _address: &str,
        req: &dyn Request,
        _timeout: Duration,
    ) -> Result<Box<dyn Any + Send>> {
        self.run_hook(req)
    }

    async fn close(&self) {}
}

/// A directory serving a fixed region layout.
///
/// The default layout splits the keyspace at `[10]` and `[250, 250]` into
/// three regions with ids 1, 2, 3, led by stores 41, 42, 43.
pub(crate) struct MockPlacement {
    regions: Vec<RegionWithLeader>,
}

impl Default for MockPlacement {
    fn default() -> Self {
        Self::with_boundaries(vec![vec![10], vec![250, 250]])
    }
}

impl MockPlacement {
    /// A layout of `boundaries.len() + 1` regions cut at the given split
    /// keys, which must be sorted and non-empty.
    pub(crate) fn with_boundaries(boundaries: Vec<Vec<u8>>) -> Self {
        let mut bounds = vec![Vec::new()];
        bounds.extend(boundaries);
        bounds.push(Vec::new());

        let regions = bounds
            .windows(2)
            .enumerate()
            .map(|(i, window)| {
                let id = i as u64 + 1;
                RegionWithLeader {
                    region: metapb::Region {
                        id,
                        start_key: window[0].clone(),
                        end_key: window[1].clone(),
                        region_epoch: Some(metapb::RegionEpoch::default()),
                        peers: vec![metapb::Peer {
                            id,
                            store_id: 40 + id,
                        }],
                    },
                    leader: Some(metapb::Peer {
                        id,
                        store_id: 40 + id,
                    }),
                }
            })
            .collect();
        Self { regions }
    }

    pub(crate) fn region(&self, id: u64) -> RegionWithLeader {
        self.regions
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .unwrap_or_else(|| panic!("no mock region with id {id}"))
    }
}

#[async_trait]
impl PlacementClient for MockPlacement {
    async fn get_region(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader> {
        self.regions
            .iter()
            .find(|r| r.contains(&key.clone().into()))
            .cloned()
            .ok_or(Error::RegionForKeyNotFound { key })
    }

    async fn get_prev_region(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader> {
        self.regions
            .iter()
            .find(|r| r.contains_by_end(&key.clone().into()))
            .cloned()
            .ok_or(Error::RegionForKeyNotFound { key })
    }

    async fn get_store(self: Arc<Self>, id: StoreId) -> Result<metapb::Store> {
        Ok(metapb::Store {
            id,
            address: format!("store-{id}"),
            ..Default::default()
        })
    }

    fn cluster_id(&self) -> u64 {
        0
    }

    fn close(&self) {}
}
