// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;

use crate::backoff::Backoffer;
use crate::backoff::BO_PLACEMENT_RPC;
use crate::placement::PlacementClient;
use crate::proto::errorpb;
use crate::proto::metapb;
use crate::region::KeyLocation;
use crate::region::RegionId;
use crate::region::RegionVerId;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::Error;
use crate::Key;
use crate::Result;

/// The cached region entry along with its expiry deadline.
///
/// `expires_at_sec` is an epoch timestamp in seconds, slid forward on access
/// to approximate an "idle TTL" (hot regions stay cached).
struct CachedRegion {
    region: RegionWithLeader,
    expires_at_sec: AtomicI64,
}

impl CachedRegion {
    fn new(region: RegionWithLeader, expires_at_sec: i64) -> CachedRegion {
        CachedRegion {
            region,
            expires_at_sec: AtomicI64::new(expires_at_sec),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RegionCacheTtl {
    base_sec: i64,
    jitter_sec: i64,
}

impl RegionCacheTtl {
    fn new(base: Duration, jitter: Duration) -> RegionCacheTtl {
        let base_sec = i64::try_from(base.as_secs()).unwrap_or(i64::MAX);
        let jitter_sec = i64::try_from(jitter.as_secs()).unwrap_or(i64::MAX);
        RegionCacheTtl {
            base_sec,
            jitter_sec,
        }
    }

    fn is_enabled(&self) -> bool {
        self.base_sec > 0
    }

    /// A new deadline for an entry touched at `now_epoch_sec`.
    fn fresh_deadline(self, now_epoch_sec: i64) -> i64 {
        if !self.is_enabled() {
            return i64::MAX;
        }
        let mut ttl = self.base_sec;
        if self.jitter_sec > 0 {
            ttl = ttl.saturating_add(rand::thread_rng().gen_range(0..self.jitter_sec));
        }
        now_epoch_sec.saturating_add(ttl)
    }

    /// Whether the entry is still live at `now_epoch_sec`, sliding its
    /// deadline forward on access.
    fn touch(self, expires_at_sec: &AtomicI64, now_epoch_sec: i64) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let deadline = expires_at_sec.load(Ordering::Relaxed);
        if deadline < now_epoch_sec {
            return false;
        }
        // Slide lazily, once the deadline has burned down into its final
        // base window, so hot entries do not take an RMW on every hit.
        // `fetch_max` keeps the furthest deadline under concurrent readers.
        if deadline - now_epoch_sec <= self.base_sec {
            expires_at_sec.fetch_max(self.fresh_deadline(now_epoch_sec), Ordering::Relaxed);
        }
        true
    }
}

fn now_epoch_sec() -> i64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    )
    .unwrap_or(0)
}

struct RegionCacheMap {
    /// RegionVerId -> region. The concrete region entries.
    /// A `RegionVerId` is the unique identifier of a region *across time*.
    ///
    /// Entries are removed by explicit invalidation or replaced by
    /// `add_region`; a soft TTL keeps cold/stale regions from living forever.
    ver_id_to_region: HashMap<RegionVerId, CachedRegion>,
    /// start_key -> RegionVerId.
    ///
    /// Invariant: there are no intersecting regions in the map at any time.
    key_to_ver_id: BTreeMap<Key, RegionVerId>,
    /// RegionId -> RegionVerId. Regions with identical ids are not
    /// necessarily the same region across time.
    id_to_ver_id: HashMap<RegionId, RegionVerId>,
}

impl RegionCacheMap {
    fn new() -> RegionCacheMap {
        RegionCacheMap {
            ver_id_to_region: HashMap::new(),
            key_to_ver_id: BTreeMap::new(),
            id_to_ver_id: HashMap::new(),
        }
    }
}

/// The client-side routing cache over the placement directory.
///
/// Resolution prefers cached entries and reads through to the directory on a
/// miss, charging directory retries to the caller's budget. Entries are
/// dropped on region errors so the next resolution refreshes them.
pub struct RegionCache<C = crate::placement::PlacementRpcClient> {
    region_cache: RwLock<RegionCacheMap>,
    store_cache: RwLock<HashMap<StoreId, metapb::Store>>,
    inner: Arc<C>,
    ttl: RegionCacheTtl,
}

impl<C> RegionCache<C> {
    pub fn new_with_ttl(
        inner: Arc<C>,
        region_cache_ttl: Duration,
        region_cache_ttl_jitter: Duration,
    ) -> RegionCache<C> {
        RegionCache {
            region_cache: RwLock::new(RegionCacheMap::new()),
            store_cache: RwLock::new(HashMap::new()),
            inner,
            ttl: RegionCacheTtl::new(region_cache_ttl, region_cache_ttl_jitter),
        }
    }
}

impl<C: PlacementClient> RegionCache<C> {
    /// Resolve the region covering `key`.
    pub(crate) async fn locate_key(&self, bo: &mut Backoffer, key: &Key) -> Result<KeyLocation> {
        let now = now_epoch_sec();
        {
            let guard = self.region_cache.read().await;
            if let Some((_, candidate)) = guard.key_to_ver_id.range(..=key).next_back() {
                if let Some(cached) = guard.ver_id_to_region.get(candidate) {
                    if self.ttl.touch(&cached.expires_at_sec, now) && cached.region.contains(key) {
                        return Ok((&cached.region).into());
                    }
                }
            }
        }
        let region = self.read_through_region(bo, key, false).await?;
        Ok((&region).into())
    }

    /// Resolve the region covering the keys just below `key`, for `key` used
    /// as an exclusive end bound (reverse scans).
    pub(crate) async fn locate_end_key(
        &self,
        bo: &mut Backoffer,
        key: &Key,
    ) -> Result<KeyLocation> {
        let now = now_epoch_sec();
        {
            let guard = self.region_cache.read().await;
            if let Some((_, candidate)) = guard.key_to_ver_id.range(..key).next_back() {
                if let Some(cached) = guard.ver_id_to_region.get(candidate) {
                    if self.ttl.touch(&cached.expires_at_sec, now)
                        && cached.region.contains_by_end(key)
                    {
                        return Ok((&cached.region).into());
                    }
                }
            }
        }

        // The containing region covers the bound unless the bound sits
        // exactly on its start key; then the previous region does.
        let region = self.read_through_region(bo, key, false).await?;
        if region.contains_by_end(key) {
            return Ok((&region).into());
        }
        let region = self.read_through_region(bo, key, true).await?;
        if region.contains_by_end(key) {
            Ok((&region).into())
        } else {
            Err(Error::RegionForKeyNotFound {
                key: key.clone().into(),
            })
        }
    }

    /// Group `keys` by the region covering each, preserving the caller's key
    /// order within every group.
    pub(crate) async fn group_keys_by_region(
        &self,
        bo: &mut Backoffer,
        keys: &[Key],
    ) -> Result<HashMap<RegionVerId, Vec<Key>>> {
        let mut groups: HashMap<RegionVerId, Vec<Key>> = HashMap::new();
        for key in keys {
            let location = self.locate_key(bo, key).await?;
            groups.entry(location.region).or_default().push(key.clone());
        }
        Ok(groups)
    }

    /// The cached region for a routing token, if the token is still current.
    pub(crate) async fn get_region_by_ver_id(
        &self,
        ver_id: &RegionVerId,
    ) -> Option<RegionWithLeader> {
        let guard = self.region_cache.read().await;
        guard
            .ver_id_to_region
            .get(ver_id)
            .map(|cached| cached.region.clone())
    }

    pub(crate) async fn get_store_by_id(
        &self,
        bo: &mut Backoffer,
        id: StoreId,
    ) -> Result<metapb::Store> {
        let store = self.store_cache.read().await.get(&id).cloned();
        match store {
            Some(store) => Ok(store),
            None => self.read_through_store_by_id(bo, id).await,
        }
    }

    /// Repair routing state for a region error returned by a store. The next
    /// resolution refreshes whatever was dropped.
    pub(crate) async fn on_region_error(&self, e: &errorpb::Error, ver_id: &RegionVerId) {
        if let Some(not_leader) = &e.not_leader {
            if let Some(leader) = &not_leader.leader {
                self.update_leader(ver_id.clone(), leader.clone()).await;
            } else {
                // The peer does not know the current leader, usually because
                // the group is mid-election. Reload from the directory.
                self.invalidate_region_cache(ver_id).await;
            }
        } else if let Some(store_not_match) = &e.store_not_match {
            self.invalidate_region_cache(ver_id).await;
            self.invalidate_store_cache(store_not_match.request_store_id)
                .await;
        } else if e.server_is_busy.is_some() {
            // Routing is correct; the store wants the client to wait.
        } else {
            // Splits, merges, stale epochs, or unknown errors: drop the entry
            // and re-resolve.
            self.invalidate_region_cache(ver_id).await;
        }
    }

    async fn read_through_region(
        &self,
        bo: &mut Backoffer,
        key: &Key,
        prev: bool,
    ) -> Result<RegionWithLeader> {
        loop {
            let attempt = if prev {
                self.inner.clone().get_prev_region(key.clone().into()).await
            } else {
                self.inner.clone().get_region(key.clone().into()).await
            };
            match attempt {
                Ok(region) => {
                    self.add_region(region.clone()).await;
                    return Ok(region);
                }
                Err(e) if e.is_transient() => {
                    bo.backoff(&BO_PLACEMENT_RPC, e.to_string()).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_through_store_by_id(
        &self,
        bo: &mut Backoffer,
        id: StoreId,
    ) -> Result<metapb::Store> {
        loop {
            match self.inner.clone().get_store(id).await {
                Ok(store) => {
                    self.store_cache.write().await.insert(id, store.clone());
                    return Ok(store);
                }
                Err(e) if e.is_transient() => {
                    bo.backoff(&BO_PLACEMENT_RPC, e.to_string()).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) async fn add_region(&self, region: RegionWithLeader) {
        // Keep the critical section small: the write lock guards the
        // no-intersection invariant, so avoid any `.await` while holding it.
        let mut cache = self.region_cache.write().await;

        let expires_at_sec = self.ttl.fresh_deadline(now_epoch_sec());
        let new_start = region.start_key();
        let new_end = region.end_key();
        let new_ver = region.ver_id();

        // Everything the new range invalidates forms one contiguous run of
        // the start-key index, because cached ranges are disjoint: the run
        // begins at the last entry starting at or before `new_start` (doomed
        // only when it reaches past it) and extends while entry starts stay
        // below `new_end` (empty meaning unbounded). Entries whose region
        // record is already gone are swept along with the run.
        let run_start = cache
            .key_to_ver_id
            .range(..=&new_start)
            .next_back()
            .map(|(start, _)| start.clone())
            .unwrap_or_else(|| new_start.clone());
        let mut doomed: Vec<(Key, RegionVerId)> = Vec::new();
        for (start, ver) in cache.key_to_ver_id.range(run_start..) {
            if !new_end.is_empty() && *start >= new_end {
                break;
            }
            let invalidated = *start >= new_start
                || cache.ver_id_to_region.get(ver).is_none_or(|cached| {
                    let end = cached.region.region.end_key.as_slice();
                    end.is_empty() || end > new_start.as_ref()
                });
            if invalidated {
                doomed.push((start.clone(), ver.clone()));
            }
        }

        // An older incarnation of the same region id may live outside the
        // run (its range moved); retire it as well.
        if let Some(old_ver) = cache.id_to_ver_id.get(&region.id()) {
            if *old_ver != new_ver {
                if let Some(old) = cache.ver_id_to_region.get(old_ver) {
                    doomed.push((old.region.start_key(), old_ver.clone()));
                }
            }
        }

        for (start, ver) in doomed {
            if cache.key_to_ver_id.get(&start) == Some(&ver) {
                cache.key_to_ver_id.remove(&start);
            }
            if let Some(removed) = cache.ver_id_to_region.remove(&ver) {
                let id = removed.region.id();
                if cache.id_to_ver_id.get(&id) == Some(&ver) {
                    cache.id_to_ver_id.remove(&id);
                }
            }
        }

        cache.key_to_ver_id.insert(new_start, new_ver.clone());
        cache.id_to_ver_id.insert(region.id(), new_ver.clone());
        cache
            .ver_id_to_region
            .insert(new_ver, CachedRegion::new(region, expires_at_sec));
    }

    pub(crate) async fn update_leader(&self, ver_id: RegionVerId, leader: metapb::Peer) {
        let mut cache = self.region_cache.write().await;
        if let Some(cached) = cache.ver_id_to_region.get_mut(&ver_id) {
            cached.region.leader = Some(leader);
            cached
                .expires_at_sec
                .store(self.ttl.fresh_deadline(now_epoch_sec()), Ordering::Relaxed);
        }
    }

    pub(crate) async fn invalidate_region_cache(&self, ver_id: &RegionVerId) {
        let mut cache = self.region_cache.write().await;
        if let Some(region) = cache.ver_id_to_region.get(ver_id) {
            let id = region.region.id();
            let start_key = region.region.start_key();
            cache.ver_id_to_region.remove(ver_id);
            cache.id_to_ver_id.remove(&id);
            cache.key_to_ver_id.remove(&start_key);
        }
    }

    pub(crate) async fn invalidate_store_cache(&self, store_id: StoreId) {
        let mut cache = self.store_cache.write().await;
        cache.remove(&store_id);
    }

    /// Drop all cached routing state. Idempotent.
    pub(crate) async fn close(&self) {
        let mut cache = self.region_cache.write().await;
        cache.ver_id_to_region.clear();
        cache.key_to_ver_id.clear();
        cache.id_to_ver_id.clear();
        drop(cache);
        self.store_cache.write().await.clear();
    }
}
