// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use log::error;
use tokio::sync::mpsc;

use super::batch::BatchCommand;
use super::lowering::*;
use crate::backoff::BackoffContext;
use crate::backoff::Backoffer;
use crate::config::Config;
use crate::config::MAX_WRITE_EXECUTION_TIME;
use crate::config::READ_TIMEOUT_SHORT;
use crate::placement::PlacementClient;
use crate::placement::PlacementRpcClient;
use crate::proto::kvrpcpb;
use crate::region::KeyLocation;
use crate::region_cache::RegionCache;
use crate::request::RegionRequestSender;
use crate::stats;
use crate::store::HasRegionError;
use crate::store::HasStrError;
use crate::store::KvRequest;
use crate::store::KvTransport;
use crate::store::Request;
use crate::store::RpcClient;
use crate::Error;
use crate::Key;
use crate::KvPair;
use crate::Result;
use crate::SecurityManager;
use crate::Value;

const MAX_RAW_KV_SCAN_LIMIT: u32 = 10240;

/// The cumulative sleep budget for one raw operation, in milliseconds.
const RAW_MAX_BACKOFF_MS: u64 = 20_000;

/// The RangeKV raw `Client` is used to interact with the store using raw
/// (non-transactional) requests.
///
/// Each request is immediately processed once executed; there is no
/// cross-request atomicity. The client routes every command to the region
/// leader(s) covering the touched keys and absorbs region-topology changes by
/// refreshing its routing cache and retrying under a bounded backoff budget.
pub struct Client<C: PlacementClient = PlacementRpcClient> {
    pub(super) cluster_id: u64,
    pub(super) placement: Arc<C>,
    pub(super) cache: Arc<RegionCache<C>>,
    pub(super) transport: Arc<dyn KvTransport>,
    /// Whether writes and deletes take the store's single-row atomic path.
    /// See [`Client::set_atomic_for_cas`].
    pub(super) atomic: bool,
}

impl<C: PlacementClient> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            cluster_id: self.cluster_id,
            placement: self.placement.clone(),
            cache: self.cache.clone(),
            transport: self.transport.clone(),
            atomic: self.atomic,
        }
    }
}

impl Client<PlacementRpcClient> {
    /// Create a raw [`Client`] and connect to the cluster.
    ///
    /// Because the cluster is managed by a placement directory, the endpoints
    /// for the directory must be provided, not the store nodes. Include more
    /// than one endpoint if possible to avoid a single point of failure.
    ///
    /// # Examples
    /// ```rust,no_run
    /// # use rangekv_client::{Client, Result};
    /// # async fn example() -> Result<()> {
    /// let _client = Client::new(vec!["192.168.0.100:2379"]).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new<S: Into<String>>(placement_endpoints: Vec<S>) -> Result<Self> {
        Self::new_with_config(placement_endpoints, Config::default()).await
    }

    /// Create a raw [`Client`] with a custom configuration.
    ///
    /// # Examples
    /// ```rust,no_run
    /// # use rangekv_client::{Client, Config, Result};
    /// # use std::time::Duration;
    /// # async fn example() -> Result<()> {
    /// let _client = Client::new_with_config(
    ///     vec!["192.168.0.100:2379"],
    ///     Config::default().with_timeout(Duration::from_secs(60)),
    /// )
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new_with_config<S: Into<String>>(
        placement_endpoints: Vec<S>,
        config: Config,
    ) -> Result<Self> {
        let security_mgr = Arc::new(
            if let (Some(ca_path), Some(cert_path), Some(key_path)) =
                (&config.ca_path, &config.cert_path, &config.key_path)
            {
                SecurityManager::load(ca_path, cert_path, key_path)?
            } else {
                SecurityManager::default()
            },
        );

        let endpoints: Vec<String> = placement_endpoints.into_iter().map(Into::into).collect();
        let placement = Arc::new(
            PlacementRpcClient::connect(
                &endpoints,
                &security_mgr,
                config.timeout,
                config.placement_retry,
            )
            .await?,
        );
        let cluster_id = placement.cluster_id();
        let cache = Arc::new(RegionCache::new_with_ttl(
            placement.clone(),
            config.region_cache_ttl,
            config.region_cache_ttl_jitter,
        ));
        let transport: Arc<dyn KvTransport> =
            Arc::new(RpcClient::new(security_mgr, config.timeout));
        Ok(Client {
            cluster_id,
            placement,
            cache,
            transport,
            atomic: false,
        })
    }
}

impl<C: PlacementClient> Client<C> {
    /// Returns the cluster ID this client is connected to.
    #[must_use]
    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    /// Set the atomic mode for [`compare_and_swap`](Client::compare_and_swap).
    ///
    /// In atomic mode writes and deletes are tagged to take the store's
    /// single-row atomic path, so they serialize with CAS. This makes them
    /// more expensive. Mixing atomic and non-atomic clients on the same keys
    /// breaks linearizability; keeping the modes consistent is up to the
    /// callers, and the flag must not be flipped while operations are in
    /// flight.
    pub fn set_atomic_for_cas(&mut self, atomic: bool) -> &mut Self {
        self.atomic = atomic;
        self
    }

    /// A clone of this client with atomic mode enabled.
    #[must_use]
    pub fn with_atomic_for_cas(&self) -> Self {
        let mut clone = self.clone();
        clone.atomic = true;
        clone
    }

    /// Close the client, releasing the placement client, the routing cache,
    /// and the transport, in that order. Idempotent.
    pub async fn close(&self) {
        self.placement.close();
        self.cache.close().await;
        self.transport.close().await;
    }

    /// Create a new 'get' request.
    ///
    /// Returning `Ok(None)` indicates the key does not exist.
    ///
    /// # Examples
    /// ```rust,no_run
    /// # use rangekv_client::{Client, Result, Value};
    /// # async fn example() -> Result<()> {
    /// # let client = Client::new(vec!["192.168.0.100:2379"]).await?;
    /// let result: Option<Value> = client.get("canary".to_owned()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        debug!("invoking raw get request");
        let _timer = stats::observe_cmd_duration("get");
        let key = key.into();
        let mut bo = self.backoffer();
        let mut req = new_raw_get_request(key.clone());
        let (mut resp, _) = self.send_req(&mut bo, &key, &mut req, false).await?;
        if let Some(message) = resp.str_error() {
            return Err(Error::KvError { message });
        }
        if resp.not_found || resp.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(resp.value))
    }

    /// Create a new 'batch get' request.
    ///
    /// The returned values align with the input keys: `values[i]` is the
    /// stored value for `keys[i]`, or `None` when the key does not exist.
    /// Duplicate input keys get the same value.
    pub async fn batch_get(
        &self,
        keys: impl IntoIterator<Item = impl Into<Key>>,
    ) -> Result<Vec<Option<Value>>> {
        debug!("invoking raw batch_get request");
        let _timer = stats::observe_cmd_duration("batch_get");
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let mut bo = self.backoffer();
        let pairs = self
            .send_batch_req(&mut bo, keys.clone(), BatchCommand::Get)
            .await?;

        let mut by_key: HashMap<Vec<u8>, Value> = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            by_key.insert(pair.key, pair.value);
        }
        Ok(keys
            .iter()
            .map(|key| by_key.get(key.as_ref()).cloned())
            .collect())
    }

    /// Create a new 'get key TTL' request.
    ///
    /// Returns `Ok(None)` when the key does not exist; otherwise the
    /// remaining time-to-live in seconds (zero for "no TTL").
    pub async fn get_key_ttl(&self, key: impl Into<Key>) -> Result<Option<u64>> {
        debug!("invoking raw get_key_ttl request");
        let _timer = stats::observe_cmd_duration("get_key_ttl");
        let key = key.into();
        stats::observe_key_size("get_key_ttl", key.len());
        let mut bo = self.backoffer();
        let mut req = new_raw_get_key_ttl_request(key.clone());
        let (mut resp, _) = self.send_req(&mut bo, &key, &mut req, false).await?;
        if let Some(message) = resp.str_error() {
            return Err(Error::KvError { message });
        }
        if resp.not_found {
            return Ok(None);
        }
        Ok(Some(resp.ttl))
    }

    /// Create a new 'put' request, storing a value without TTL.
    ///
    /// # Examples
    /// ```rust,no_run
    /// # use rangekv_client::{Client, Result};
    /// # async fn example() -> Result<()> {
    /// # let client = Client::new(vec!["192.168.0.100:2379"]).await?;
    /// client.put("key".to_owned(), b"value".to_vec()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.put_with_ttl(key, value, 0).await
    }

    /// Same as [`put`](Client::put) with a time-to-live in seconds; `ttl_secs
    /// == 0` means no TTL.
    pub async fn put_with_ttl(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        ttl_secs: u64,
    ) -> Result<()> {
        debug!("invoking raw put request");
        let _timer = stats::observe_cmd_duration("put");
        let key = key.into();
        let value = value.into();
        stats::observe_key_size("put", key.len());
        stats::observe_value_size("put", value.len());
        if value.is_empty() {
            return Err(Error::EmptyValue);
        }

        let mut bo = self.backoffer();
        let mut req = new_raw_put_request(key.clone(), value, ttl_secs, self.atomic);
        req.set_max_execution_duration(MAX_WRITE_EXECUTION_TIME);
        let (mut resp, _) = self.send_req(&mut bo, &key, &mut req, false).await?;
        if let Some(message) = resp.str_error() {
            return Err(Error::KvError { message });
        }
        Ok(())
    }

    /// Create a new 'batch put' request.
    ///
    /// `keys` and `values` must have equal length; `ttls` must be empty (no
    /// TTLs) or match them. Empty values are rejected.
    pub async fn batch_put(
        &self,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        values: impl IntoIterator<Item = impl Into<Value>>,
        ttls: impl IntoIterator<Item = u64>,
    ) -> Result<()> {
        debug!("invoking raw batch_put request");
        let _timer = stats::observe_cmd_duration("batch_put");
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let ttls: Vec<u64> = ttls.into_iter().collect();

        if keys.len() != values.len() {
            return Err(Error::InvalidArguments {
                message: format!(
                    "the number of keys ({}) does not match the number of values ({})",
                    keys.len(),
                    values.len()
                ),
            });
        }
        if !ttls.is_empty() && ttls.len() != keys.len() {
            return Err(Error::InvalidArguments {
                message: format!(
                    "the number of TTLs ({}) does not match the number of keys ({})",
                    ttls.len(),
                    keys.len()
                ),
            });
        }
        if values.iter().any(|value| value.is_empty()) {
            return Err(Error::EmptyValue);
        }

        let mut bo = self.backoffer();
        self.send_batch_put(&mut bo, keys, values, ttls).await
    }

    /// Create a new 'delete' request.
    ///
    /// Deleting a key that does not exist is not an error.
    pub async fn delete(&self, key: impl Into<Key>) -> Result<()> {
        debug!("invoking raw delete request");
        let _timer = stats::observe_cmd_duration("delete");
        let key = key.into();
        let mut bo = self.backoffer();
        let mut req = new_raw_delete_request(key.clone(), self.atomic);
        req.set_max_execution_duration(MAX_WRITE_EXECUTION_TIME);
        let (mut resp, _) = self.send_req(&mut bo, &key, &mut req, false).await?;
        if let Some(message) = resp.str_error() {
            return Err(Error::KvError { message });
        }
        Ok(())
    }

    /// Create a new 'batch delete' request.
    ///
    /// Missing keys are skipped; the others are deleted.
    pub async fn batch_delete(&self, keys: impl IntoIterator<Item = impl Into<Key>>) -> Result<()> {
        debug!("invoking raw batch_delete request");
        let _timer = stats::observe_cmd_duration("batch_delete");
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let mut bo = self.backoffer();
        self.send_batch_req(&mut bo, keys, BatchCommand::Delete)
            .await?;
        Ok(())
    }

    /// Create a new 'delete range' request, deleting all keys in
    /// `[start, end)`.
    ///
    /// The walk issues one region-scoped delete per covering region,
    /// advancing the start key by each region's end until the range is
    /// exhausted. An empty `end` means "to the end of the keyspace".
    pub async fn delete_range(&self, start: impl Into<Key>, end: impl Into<Key>) -> Result<()> {
        debug!("invoking raw delete_range request");
        let mut timer = stats::observe_cmd_duration("delete_range");
        let res = self.delete_range_inner(start.into(), end.into()).await;
        if res.is_err() {
            timer.fail();
        }
        res
    }

    async fn delete_range_inner(&self, mut start: Key, end: Key) -> Result<()> {
        if !end.is_empty() && start >= end {
            // An empty range is a no-op rather than a round-trip the store
            // would reject.
            return Ok(());
        }
        while start != end {
            let mut bo = self.backoffer();
            let (mut resp, actual_end) = self.send_delete_range_step(&mut bo, &start, &end).await?;
            if let Some(message) = resp.str_error() {
                return Err(Error::KvError { message });
            }
            start = actual_end;
        }
        Ok(())
    }

    /// Create a new batched 'delete range' request.
    ///
    /// The range is walked like [`delete_range`](Client::delete_range), but
    /// up to `batch_size` consecutive per-region slices are collected and
    /// deleted concurrently under one forked budget. The walk continues past
    /// a failed round (logging it) and the first captured error is returned
    /// at the end.
    pub async fn batch_delete_range(
        &self,
        start: impl Into<Key>,
        end: impl Into<Key>,
        batch_size: usize,
    ) -> Result<()> {
        debug!("invoking raw batch_delete_range request");
        let mut timer = stats::observe_cmd_duration("delete_range");
        let res = self
            .batch_delete_range_inner(start.into(), end.into(), batch_size)
            .await;
        if res.is_err() {
            timer.fail();
        }
        res
    }

    async fn batch_delete_range_inner(
        &self,
        mut start: Key,
        end: Key,
        batch_size: usize,
    ) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::InvalidArguments {
                message: "batch_size must be at least 1".to_owned(),
            });
        }
        if !end.is_empty() && start >= end {
            return Ok(());
        }

        let mut bo = self.backoffer();
        let mut first_error: Option<Error> = None;
        while start != end {
            let mut locations: Vec<KeyLocation> = Vec::with_capacity(batch_size);
            while locations.len() < batch_size && start != end {
                let location = self.cache.locate_key(&mut bo, &start).await?;
                let actual_end = actual_end_key(&location.end_key, &end);
                locations.push(KeyLocation {
                    start_key: start.clone(),
                    end_key: actual_end.clone(),
                    region: location.region,
                });
                start = actual_end;
            }

            let (group_bo, cancel_group) = bo.fork();
            let (tx, mut rx) = mpsc::channel(locations.len());
            for location in locations {
                let client = self.clone();
                let (mut task_bo, task_cancel) = group_bo.fork();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let res = client.delete_range_covering(&mut task_bo, location).await;
                    task_cancel.cancel();
                    let _ = tx.send(res).await;
                });
            }
            drop(tx);

            let mut batch_error: Option<Error> = None;
            while let Some(res) = rx.recv().await {
                if let Err(e) = res {
                    cancel_group.cancel();
                    if batch_error.is_none() {
                        batch_error = Some(e);
                    }
                }
            }
            cancel_group.cancel();

            if let Some(e) = batch_error {
                error!("batched delete-range round failed: {e}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete the whole `[location.start_key, location.end_key)` slice,
    /// re-resolving regions as needed (the slice may span several regions
    /// after a split).
    async fn delete_range_covering(
        &self,
        bo: &mut Backoffer,
        location: KeyLocation,
    ) -> Result<()> {
        let mut start = location.start_key;
        let end = location.end_key;
        while start != end {
            let (mut resp, actual_end) = self.send_delete_range_step(bo, &start, &end).await?;
            if let Some(message) = resp.str_error() {
                return Err(Error::KvError { message });
            }
            start = actual_end;
        }
        Ok(())
    }

    /// One region-scoped delete-range step: locate `start`, clamp the range
    /// end to the region boundary, and send. Returns the response and the key
    /// the walk resumes from.
    async fn send_delete_range_step(
        &self,
        bo: &mut Backoffer,
        start: &Key,
        end: &Key,
    ) -> Result<(kvrpcpb::RawDeleteRangeResponse, Key)> {
        let sender = self.sender();
        loop {
            let location = self.cache.locate_key(bo, start).await?;
            let actual_end = actual_end_key(&location.end_key, end);

            let mut req = new_raw_delete_range_request(start.clone(), actual_end.clone());
            req.set_max_execution_duration(MAX_WRITE_EXECUTION_TIME);
            let mut resp = sender
                .send_req(bo, &mut req, &location.region, READ_TIMEOUT_SHORT)
                .await?;
            if let Some(region_err) = resp.region_error() {
                sender
                    .on_region_error(bo, &location.region, region_err)
                    .await?;
                continue;
            }
            return Ok((resp, actual_end));
        }
    }

    /// Create a new 'scan' request over `[start, end)`, returning up to
    /// `limit` pairs in ascending key order.
    ///
    /// An empty `end` means unbounded. To exclude the start key or include
    /// the end key, push a zero byte ([`Key::next_key`]).
    pub async fn scan(
        &self,
        start: impl Into<Key>,
        end: impl Into<Key>,
        limit: u32,
    ) -> Result<Vec<KvPair>> {
        debug!("invoking raw scan request");
        let _timer = stats::observe_cmd_duration("scan");
        self.scan_inner(start.into(), end.into(), limit, false).await
    }

    /// Create a new 'reverse scan' request over `[end, start)`, returning up
    /// to `limit` pairs in descending key order, from `start` down to `end`.
    ///
    /// To include the start key or exclude the end key, push a zero byte
    /// ([`Key::next_key`]). Scanning from an empty `start` is not supported,
    /// because locating the last region of the keyspace is not.
    pub async fn reverse_scan(
        &self,
        start: impl Into<Key>,
        end: impl Into<Key>,
        limit: u32,
    ) -> Result<Vec<KvPair>> {
        debug!("invoking raw reverse scan request");
        let _timer = stats::observe_cmd_duration("reverse_scan");
        self.scan_inner(start.into(), end.into(), limit, true).await
    }

    async fn scan_inner(
        &self,
        mut start: Key,
        end: Key,
        limit: u32,
        reverse: bool,
    ) -> Result<Vec<KvPair>> {
        if limit > MAX_RAW_KV_SCAN_LIMIT {
            return Err(Error::MaxScanLimitExceeded {
                limit,
                max_limit: MAX_RAW_KV_SCAN_LIMIT,
            });
        }
        if reverse && start.is_empty() {
            return Err(Error::InvalidArguments {
                message: "reverse scan from an empty start key is not supported".to_owned(),
            });
        }

        let mut pairs: Vec<KvPair> = Vec::new();
        loop {
            let in_range = if reverse {
                start > end
            } else {
                end.is_empty() || start < end
            };
            if !in_range || (pairs.len() as u32) >= limit {
                break;
            }

            let mut bo = self.backoffer();
            let remaining = limit - pairs.len() as u32;
            let mut req =
                new_raw_scan_request(start.clone(), end.clone(), remaining, reverse);
            let (resp, location) = self.send_req(&mut bo, &start, &mut req, reverse).await?;
            pairs.extend(resp.kvs.into_iter().map(KvPair::from));

            // Hop to the next region in the walk direction.
            start = if reverse {
                location.start_key
            } else {
                location.end_key
            };
            if start.is_empty() {
                break;
            }
        }

        // The limit is enforced client-side as well, in case a server
        // returns more than asked.
        pairs.truncate(limit as usize);
        Ok(pairs)
    }

    /// Create a new *atomic* 'compare and swap' request.
    ///
    /// If the currently stored value equals `previous_value` (`None` meaning
    /// "the key must not exist"), `new_value` is written. Returns the
    /// previous value and whether the swap happened.
    ///
    /// Requires atomic mode (see [`set_atomic_for_cas`](Client::set_atomic_for_cas));
    /// without it the call fails before issuing any RPC.
    pub async fn compare_and_swap(
        &self,
        key: impl Into<Key>,
        previous_value: impl Into<Option<Value>>,
        new_value: impl Into<Value>,
    ) -> Result<(Option<Value>, bool)> {
        debug!("invoking raw compare_and_swap request");
        let _timer = stats::observe_cmd_duration("compare_and_swap");
        if !self.atomic {
            return Err(Error::UnsupportedMode);
        }
        let new_value = new_value.into();
        if new_value.is_empty() {
            return Err(Error::EmptyValue);
        }

        let key = key.into();
        let mut bo = self.backoffer();
        let mut req = new_cas_request(key.clone(), new_value, previous_value.into());
        req.set_max_execution_duration(MAX_WRITE_EXECUTION_TIME);
        let (mut resp, _) = self.send_req(&mut bo, &key, &mut req, false).await?;
        if let Some(message) = resp.str_error() {
            return Err(Error::KvError { message });
        }
        if resp.previous_not_exist {
            Ok((None, resp.succeed))
        } else {
            Ok((Some(resp.previous_value), resp.succeed))
        }
    }

    fn backoffer(&self) -> Backoffer {
        let (ctx, _cancel) = BackoffContext::new();
        Backoffer::new(ctx, RAW_MAX_BACKOFF_MS)
    }

    pub(super) fn sender(&self) -> RegionRequestSender<C> {
        RegionRequestSender::new(self.cache.clone(), self.transport.clone())
    }

    /// The single-key dispatcher: resolve the region covering `key` (by end
    /// key for reverse scans), send, and absorb region errors by refreshing
    /// the cache and retrying under the budget. Returns the response together
    /// with the location it was served from.
    pub(super) async fn send_req<R: KvRequest>(
        &self,
        bo: &mut Backoffer,
        key: &Key,
        req: &mut R,
        reverse: bool,
    ) -> Result<(R::Response, KeyLocation)> {
        let sender = self.sender();
        loop {
            let location = if reverse {
                self.cache.locate_end_key(bo, key).await?
            } else {
                self.cache.locate_key(bo, key).await?
            };
            let mut resp = sender
                .send_req(bo, req, &location.region, READ_TIMEOUT_SHORT)
                .await?;
            if let Some(region_err) = resp.region_error() {
                sender
                    .on_region_error(bo, &location.region, region_err)
                    .await?;
                continue;
            }
            return Ok((resp, location));
        }
    }
}

/// Clamp a walk's target `end` to the located region's end key. An empty
/// region end key or a region end at or past `end` makes this the final
/// region of the walk.
fn actual_end_key(location_end: &Key, end: &Key) -> Key {
    if !location_end.is_empty() && (end.is_empty() || location_end < end) {
        location_end.clone()
    } else {
        end.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::mock::MockKvClient;
    use crate::mock::MockPlacement;
    use crate::proto::errorpb;

    type SharedStore = Arc<Mutex<BTreeMap<Vec<u8>, (Vec<u8>, u64)>>>;

    fn mock_client(
        placement: Arc<MockPlacement>,
        hook: impl Fn(&dyn Any) -> Result<Box<dyn Any + Send>> + Send + Sync + 'static,
    ) -> Client<MockPlacement> {
        let cache = Arc::new(RegionCache::new_with_ttl(
            placement.clone(),
            Duration::from_secs(600),
            Duration::from_secs(60),
        ));
        Client {
            cluster_id: 0,
            placement,
            cache,
            transport: Arc::new(MockKvClient::with_dispatch_hook(hook)),
            atomic: false,
        }
    }

    /// A client backed by an in-memory ordered store that honors region
    /// boundaries, for end-to-end command semantics.
    fn store_client(
        placement: Arc<MockPlacement>,
    ) -> (Client<MockPlacement>, SharedStore, Arc<AtomicUsize>) {
        let data: SharedStore = Arc::new(Mutex::new(BTreeMap::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = store_hook(placement.clone(), data.clone(), calls.clone());
        (mock_client(placement, hook), data, calls)
    }

    fn min_end(a: &[u8], b: &[u8]) -> Vec<u8> {
        // Empty means unbounded.
        if a.is_empty() {
            b.to_vec()
        } else if b.is_empty() || a <= b {
            a.to_vec()
        } else {
            b.to_vec()
        }
    }

    fn store_hook(
        placement: Arc<MockPlacement>,
        data: SharedStore,
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(&dyn Any) -> Result<Box<dyn Any + Send>> + Send + Sync + 'static {
        move |req: &dyn Any| {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut data = data.lock().unwrap();
            if let Some(req) = req.downcast_ref::<kvrpcpb::RawGetRequest>() {
                let resp = match data.get(&req.key) {
                    Some((value, _)) => kvrpcpb::RawGetResponse {
                        value: value.clone(),
                        ..Default::default()
                    },
                    None => kvrpcpb::RawGetResponse {
                        not_found: true,
                        ..Default::default()
                    },
                };
                Ok(Box::new(resp) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawGetKeyTtlRequest>() {
                let resp = match data.get(&req.key) {
                    Some((_, ttl)) => kvrpcpb::RawGetKeyTtlResponse {
                        ttl: *ttl,
                        ..Default::default()
                    },
                    None => kvrpcpb::RawGetKeyTtlResponse {
                        not_found: true,
                        ..Default::default()
                    },
                };
                Ok(Box::new(resp) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawBatchGetRequest>() {
                let pairs = req
                    .keys
                    .iter()
                    .filter_map(|key| {
                        data.get(key).map(|(value, _)| kvrpcpb::KvPair {
                            key: key.clone(),
                            value: value.clone(),
                        })
                    })
                    .collect();
                Ok(Box::new(kvrpcpb::RawBatchGetResponse {
                    pairs,
                    ..Default::default()
                }) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawPutRequest>() {
                data.insert(req.key.clone(), (req.value.clone(), req.ttl));
                Ok(Box::new(kvrpcpb::RawPutResponse::default()) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawBatchPutRequest>() {
                for (i, pair) in req.pairs.iter().enumerate() {
                    let ttl = req.ttls.get(i).copied().unwrap_or_default();
                    data.insert(pair.key.clone(), (pair.value.clone(), ttl));
                }
                Ok(Box::new(kvrpcpb::RawBatchPutResponse::default()) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawDeleteRequest>() {
                data.remove(&req.key);
                Ok(Box::new(kvrpcpb::RawDeleteResponse::default()) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawBatchDeleteRequest>() {
                for key in &req.keys {
                    data.remove(key);
                }
                Ok(Box::new(kvrpcpb::RawBatchDeleteResponse::default()) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawDeleteRangeRequest>() {
                let doomed: Vec<Vec<u8>> = data
                    .range(req.start_key.clone()..)
                    .take_while(|(k, _)| req.end_key.is_empty() || k.as_slice() < &req.end_key[..])
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in doomed {
                    data.remove(&key);
                }
                Ok(Box::new(kvrpcpb::RawDeleteRangeResponse::default()) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawScanRequest>() {
                let ctx = req.context.as_ref().expect("context must be set");
                let region = placement.region(ctx.region_id);
                let region_start = region.region.start_key.clone();
                let region_end = region.region.end_key.clone();

                let mut kvs = Vec::new();
                if req.reverse {
                    let upper = min_end(&region_end, &req.start_key);
                    let lower = std::cmp::max(req.end_key.clone(), region_start);
                    for (k, (v, _)) in data.iter().rev() {
                        if !upper.is_empty() && k.as_slice() >= upper.as_slice() {
                            continue;
                        }
                        if k.as_slice() < lower.as_slice() {
                            break;
                        }
                        kvs.push(kvrpcpb::KvPair {
                            key: k.clone(),
                            value: v.clone(),
                        });
                        if kvs.len() >= req.limit as usize {
                            break;
                        }
                    }
                } else {
                    let lower = std::cmp::max(req.start_key.clone(), region_start);
                    let upper = min_end(&req.end_key, &region_end);
                    for (k, (v, _)) in data.range(lower..) {
                        if !upper.is_empty() && k.as_slice() >= upper.as_slice() {
                            break;
                        }
                        kvs.push(kvrpcpb::KvPair {
                            key: k.clone(),
                            value: v.clone(),
                        });
                        if kvs.len() >= req.limit as usize {
                            break;
                        }
                    }
                }
                Ok(Box::new(kvrpcpb::RawScanResponse {
                    kvs,
                    ..Default::default()
                }) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawCasRequest>() {
                let current = data.get(&req.key).map(|(value, _)| value.clone());
                let resp = match (&current, req.previous_not_exist) {
                    (None, true) => {
                        data.insert(req.key.clone(), (req.value.clone(), 0));
                        kvrpcpb::RawCasResponse {
                            succeed: true,
                            previous_not_exist: true,
                            ..Default::default()
                        }
                    }
                    (None, false) => kvrpcpb::RawCasResponse {
                        previous_not_exist: true,
                        ..Default::default()
                    },
                    (Some(value), true) => kvrpcpb::RawCasResponse {
                        previous_value: value.clone(),
                        ..Default::default()
                    },
                    (Some(value), false) => {
                        let succeed = *value == req.previous_value;
                        if succeed {
                            data.insert(req.key.clone(), (req.value.clone(), 0));
                        }
                        kvrpcpb::RawCasResponse {
                            succeed,
                            previous_value: value.clone(),
                            ..Default::default()
                        }
                    }
                };
                Ok(Box::new(resp) as Box<dyn Any + Send>)
            } else {
                unreachable!("unexpected request type: {:?}", req.type_id());
            }
        }
    }

    fn region_miss_error() -> errorpb::Error {
        errorpb::Error {
            message: "epoch not match".to_owned(),
            epoch_not_match: Some(errorpb::EpochNotMatch::default()),
            ..Default::default()
        }
    }

    #[test]
    fn cluster_id_accessor() {
        let placement = Arc::new(MockPlacement::default());
        let mut client = mock_client(placement, |_| unreachable!("no rpc expected"));
        client.cluster_id = 42;
        assert_eq!(client.cluster_id(), 42);
    }

    #[tokio::test]
    async fn put_get_roundtrip_and_missing_key_is_absent() -> Result<()> {
        let (client, _, _) = store_client(Arc::new(MockPlacement::with_boundaries(vec![
            b"m".to_vec(),
        ])));

        client.put("a".to_owned(), b"1".to_vec()).await?;
        client.put("z".to_owned(), b"9".to_vec()).await?;
        assert_eq!(client.get("a".to_owned()).await?, Some(b"1".to_vec()));
        assert_eq!(client.get("z".to_owned()).await?, Some(b"9".to_vec()));
        assert_eq!(client.get("unknown".to_owned()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn empty_values_are_rejected_before_any_rpc() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cloned = calls.clone();
        let placement = Arc::new(MockPlacement::default());
        let mut client = mock_client(placement, move |_| {
            calls_cloned.fetch_add(1, Ordering::SeqCst);
            unreachable!("write with empty value must not reach the transport");
        });

        let err = client.put("k".to_owned(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyValue), "{err:?}");

        let err = client
            .put_with_ttl("k".to_owned(), Vec::new(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyValue));

        let err = client
            .batch_put(
                vec!["a".to_owned(), "b".to_owned()],
                vec![b"1".to_vec(), Vec::new()],
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyValue));

        client.set_atomic_for_cas(true);
        let err = client
            .compare_and_swap("k".to_owned(), None, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyValue));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_put_validates_lengths_before_any_rpc() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cloned = calls.clone();
        let client = mock_client(Arc::new(MockPlacement::default()), move |_| {
            calls_cloned.fetch_add(1, Ordering::SeqCst);
            unreachable!("mismatched batch must not reach the transport");
        });

        let err = client
            .batch_put(
                vec!["a".to_owned(), "b".to_owned()],
                vec![b"1".to_vec()],
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_argument_error(), "{err:?}");

        let err = client
            .batch_put(
                vec!["a".to_owned(), "b".to_owned()],
                vec![b"1".to_vec(), b"2".to_vec()],
                vec![1],
            )
            .await
            .unwrap_err();
        assert!(err.is_argument_error(), "{err:?}");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scan_limit_above_cap_fails_before_any_rpc() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cloned = calls.clone();
        let client = mock_client(Arc::new(MockPlacement::default()), move |_| {
            calls_cloned.fetch_add(1, Ordering::SeqCst);
            unreachable!("over-limit scan must not reach the transport");
        });

        for reverse in [false, true] {
            let res = if reverse {
                client
                    .reverse_scan("z".to_owned(), "a".to_owned(), MAX_RAW_KV_SCAN_LIMIT + 1)
                    .await
            } else {
                client
                    .scan("a".to_owned(), "z".to_owned(), MAX_RAW_KV_SCAN_LIMIT + 1)
                    .await
            };
            let err = res.unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::MaxScanLimitExceeded {
                        limit: 10241,
                        max_limit: 10240
                    }
                ),
                "{err:?}"
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deleted_key_reads_back_absent() -> Result<()> {
        let (client, _, _) = store_client(Arc::new(MockPlacement::with_boundaries(vec![
            b"m".to_vec(),
        ])));

        client.put_with_ttl("k".to_owned(), b"v".to_vec(), 42).await?;
        assert_eq!(client.get_key_ttl("k".to_owned()).await?, Some(42));

        client.delete("k".to_owned()).await?;
        assert_eq!(client.get("k".to_owned()).await?, None);
        assert_eq!(client.get_key_ttl("k".to_owned()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn batch_get_aligns_values_with_input_keys() -> Result<()> {
        let placement = Arc::new(MockPlacement::with_boundaries(vec![b"m".to_vec()]));
        let (client, _, calls) = store_client(placement);

        client
            .batch_put(
                vec!["a".to_owned(), "n".to_owned(), "z".to_owned()],
                vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()],
                Vec::new(),
            )
            .await?;
        // One batch-put RPC per covering region.
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let values = client
            .batch_get(vec![
                "z".to_owned(),
                "a".to_owned(),
                "n".to_owned(),
                "x".to_owned(),
                "a".to_owned(),
            ])
            .await?;
        assert_eq!(
            values,
            vec![
                Some(b"3".to_vec()),
                Some(b"1".to_vec()),
                Some(b"2".to_vec()),
                None,
                Some(b"1".to_vec()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn batch_get_without_keys_issues_no_rpc() -> Result<()> {
        let (client, _, calls) = store_client(Arc::new(MockPlacement::default()));
        let values = client.batch_get(Vec::<String>::new()).await?;
        assert!(values.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn scan_concatenates_regions_in_key_order() -> Result<()> {
        let placement = Arc::new(MockPlacement::with_boundaries(vec![b"m".to_vec()]));
        let (client, _, calls) = store_client(placement);

        for (k, v) in [("a", "1"), ("c", "3"), ("m", "2"), ("x", "4")] {
            client.put(k.to_owned(), v.as_bytes().to_vec()).await?;
        }
        calls.store(0, Ordering::SeqCst);

        let pairs = client.scan("a".to_owned(), "z".to_owned(), 100).await?;
        let keys: Vec<Vec<u8>> = pairs.iter().map(|p| p.key.clone().into()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"m".to_vec(), b"x".to_vec()]);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        // One scan RPC per region hop.
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The limit binds across region hops.
        let pairs = client.scan("a".to_owned(), "z".to_owned(), 3).await?;
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs.last().unwrap().key, Key::from("m".to_owned()));
        Ok(())
    }

    #[tokio::test]
    async fn reverse_scan_returns_descending_keys() -> Result<()> {
        let placement = Arc::new(MockPlacement::with_boundaries(vec![b"m".to_vec()]));
        let (client, _, _) = store_client(placement);

        for (k, v) in [("a", "1"), ("c", "3"), ("m", "2"), ("x", "4")] {
            client.put(k.to_owned(), v.as_bytes().to_vec()).await?;
        }

        let pairs = client
            .reverse_scan("z".to_owned(), "a".to_owned(), 100)
            .await?;
        let keys: Vec<Vec<u8>> = pairs.iter().map(|p| p.key.clone().into()).collect();
        assert_eq!(keys, vec![b"x".to_vec(), b"m".to_vec(), b"c".to_vec(), b"a".to_vec()]);
        assert!(keys.windows(2).all(|w| w[0] > w[1]));

        let pairs = client
            .reverse_scan("z".to_owned(), "a".to_owned(), 2)
            .await?;
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].key, Key::from("m".to_owned()));
        Ok(())
    }

    #[tokio::test]
    async fn empty_scan_range_issues_no_rpc() -> Result<()> {
        let (client, _, calls) = store_client(Arc::new(MockPlacement::default()));
        let pairs = client.scan("a".to_owned(), "a".to_owned(), 1).await?;
        assert!(pairs.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reverse_scan_from_empty_start_is_rejected() {
        let (client, _, calls) = store_client(Arc::new(MockPlacement::default()));
        let err = client
            .reverse_scan(Key::EMPTY, "x".to_owned(), 1)
            .await
            .unwrap_err();
        assert!(err.is_argument_error(), "{err:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_range_walks_region_by_region() -> Result<()> {
        let placement = Arc::new(MockPlacement::with_boundaries(vec![b"m".to_vec()]));
        let data: SharedStore = Arc::new(Mutex::new(BTreeMap::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let ranges: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

        let inner = store_hook(placement.clone(), data.clone(), calls.clone());
        let ranges_cloned = ranges.clone();
        let client = mock_client(placement, move |req| {
            if let Some(req) = req.downcast_ref::<kvrpcpb::RawDeleteRangeRequest>() {
                ranges_cloned
                    .lock()
                    .unwrap()
                    .push((req.start_key.clone(), req.end_key.clone()));
            }
            inner(req)
        });

        for k in ["a", "c", "m", "x"] {
            client.put(k.to_owned(), b"v".to_vec()).await?;
        }
        client.put("zz".to_owned(), b"keep".to_vec()).await?;

        client.delete_range("a".to_owned(), "z".to_owned()).await?;

        let seen = ranges.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"m".to_vec()),
                (b"m".to_vec(), b"z".to_vec()),
            ]
        );
        let data = data.lock().unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.contains_key(&b"zz".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn delete_range_with_empty_range_is_a_no_op() -> Result<()> {
        let (client, _, calls) = store_client(Arc::new(MockPlacement::default()));
        client.delete_range("a".to_owned(), "a".to_owned()).await?;
        client.delete_range("b".to_owned(), "a".to_owned()).await?;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn batch_delete_range_covers_every_region_slice() -> Result<()> {
        let placement = Arc::new(MockPlacement::with_boundaries(vec![
            b"f".to_vec(),
            b"m".to_vec(),
            b"t".to_vec(),
        ]));
        let data: SharedStore = Arc::new(Mutex::new(BTreeMap::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let ranges: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

        let inner = store_hook(placement.clone(), data.clone(), calls.clone());
        let ranges_cloned = ranges.clone();
        let client = mock_client(placement, move |req| {
            if let Some(req) = req.downcast_ref::<kvrpcpb::RawDeleteRangeRequest>() {
                ranges_cloned
                    .lock()
                    .unwrap()
                    .push((req.start_key.clone(), req.end_key.clone()));
            }
            inner(req)
        });

        for k in ["a", "g", "n", "u"] {
            client.put(k.to_owned(), b"v".to_vec()).await?;
        }
        client.put("zz".to_owned(), b"keep".to_vec()).await?;

        client
            .batch_delete_range("a".to_owned(), "z".to_owned(), 2)
            .await?;

        let mut seen = ranges.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"f".to_vec()),
                (b"f".to_vec(), b"m".to_vec()),
                (b"m".to_vec(), b"t".to_vec()),
                (b"t".to_vec(), b"z".to_vec()),
            ]
        );
        let data = data.lock().unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.contains_key(&b"zz".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn batch_delete_range_rejects_zero_batch_size() {
        let (client, _, _) = store_client(Arc::new(MockPlacement::default()));
        let err = client
            .batch_delete_range("a".to_owned(), "z".to_owned(), 0)
            .await
            .unwrap_err();
        assert!(err.is_argument_error(), "{err:?}");
    }

    #[tokio::test]
    async fn batch_delete_removes_keys_across_regions() -> Result<()> {
        let placement = Arc::new(MockPlacement::with_boundaries(vec![b"m".to_vec()]));
        let (client, data, _) = store_client(placement);

        client
            .batch_put(
                vec!["a".to_owned(), "n".to_owned(), "z".to_owned()],
                vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()],
                Vec::new(),
            )
            .await?;
        client
            .batch_delete(vec!["a".to_owned(), "z".to_owned()])
            .await?;

        let data = data.lock().unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.contains_key(&b"n".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn compare_and_swap_requires_atomic_mode() {
        let (client, _, calls) = store_client(Arc::new(MockPlacement::default()));
        let err = client
            .compare_and_swap("k".to_owned(), None, b"v".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMode));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn compare_and_swap_creates_swaps_and_reports_previous() -> Result<()> {
        let (mut client, _, _) = store_client(Arc::new(MockPlacement::with_boundaries(vec![
            b"m".to_vec(),
        ])));
        client.set_atomic_for_cas(true);

        // Create iff absent.
        let (previous, swapped) = client
            .compare_and_swap("k".to_owned(), None, b"v1".to_vec())
            .await?;
        assert_eq!(previous, None);
        assert!(swapped);

        // Swap iff the current value matches.
        let (previous, swapped) = client
            .compare_and_swap("k".to_owned(), b"v1".to_vec(), b"v2".to_vec())
            .await?;
        assert_eq!(previous, Some(b"v1".to_vec()));
        assert!(swapped);

        // A stale expectation fails and reports the live value.
        let (previous, swapped) = client
            .compare_and_swap("k".to_owned(), b"v1".to_vec(), b"v3".to_vec())
            .await?;
        assert_eq!(previous, Some(b"v2".to_vec()));
        assert!(!swapped);

        // Create-if-absent on an existing key fails.
        let (previous, swapped) = client
            .compare_and_swap("k".to_owned(), None, b"v4".to_vec())
            .await?;
        assert_eq!(previous, Some(b"v2".to_vec()));
        assert!(!swapped);
        Ok(())
    }

    #[tokio::test]
    async fn atomic_mode_tags_writes_and_deletes() -> Result<()> {
        let placement = Arc::new(MockPlacement::default());
        let mut client = mock_client(placement, move |req: &dyn Any| {
            if let Some(req) = req.downcast_ref::<kvrpcpb::RawPutRequest>() {
                assert!(req.for_cas);
                assert!(req.context.as_ref().unwrap().max_execution_duration_ms > 0);
                Ok(Box::new(kvrpcpb::RawPutResponse::default()) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawDeleteRequest>() {
                assert!(req.for_cas);
                Ok(Box::new(kvrpcpb::RawDeleteResponse::default()) as Box<dyn Any + Send>)
            } else if let Some(req) = req.downcast_ref::<kvrpcpb::RawBatchDeleteRequest>() {
                assert!(req.for_cas);
                Ok(Box::new(kvrpcpb::RawBatchDeleteResponse::default()) as Box<dyn Any + Send>)
            } else {
                unreachable!()
            }
        });
        client.set_atomic_for_cas(true);

        client.put(vec![1u8], b"v".to_vec()).await?;
        client.delete(vec![1u8]).await?;
        client.batch_delete(vec![vec![1u8], vec![100u8]]).await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn region_error_is_absorbed_by_retry() -> Result<()> {
        let placement = Arc::new(MockPlacement::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_cloned = attempts.clone();
        let client = mock_client(placement, move |req: &dyn Any| {
            assert!(req.downcast_ref::<kvrpcpb::RawGetRequest>().is_some());
            let attempt = attempts_cloned.fetch_add(1, Ordering::SeqCst);
            let resp = if attempt == 0 {
                kvrpcpb::RawGetResponse {
                    region_error: Some(region_miss_error()),
                    ..Default::default()
                }
            } else {
                kvrpcpb::RawGetResponse {
                    value: b"1".to_vec(),
                    ..Default::default()
                }
            };
            Ok(Box::new(resp) as Box<dyn Any + Send>)
        });

        let value = client.get(vec![1u8]).await?;
        assert_eq!(value, Some(b"1".to_vec()));
        // The stale attempt plus the retried one; the error never surfaced.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_region_errors_exhaust_the_budget() {
        let placement = Arc::new(MockPlacement::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_cloned = attempts.clone();
        let client = mock_client(placement, move |_req: &dyn Any| {
            attempts_cloned.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(kvrpcpb::RawGetResponse {
                region_error: Some(region_miss_error()),
                ..Default::default()
            }) as Box<dyn Any + Send>)
        });

        let started = tokio::time::Instant::now();
        let err = client.get(vec![1u8]).await.unwrap_err();
        assert!(err.is_retry_exhausted(), "{err:?}");
        // The budget admits ~20s of cumulative sleep before giving up.
        assert!(started.elapsed() >= Duration::from_secs(19));
        assert!(attempts.load(Ordering::SeqCst) > 40);
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_returns_first_error_and_cancels_siblings() {
        let placement = Arc::new(MockPlacement::with_boundaries(vec![b"m".to_vec()]));
        let client = mock_client(placement, move |req: &dyn Any| {
            let req = req
                .downcast_ref::<kvrpcpb::RawBatchGetRequest>()
                .expect("only batch gets expected");
            let ctx = req.context.as_ref().expect("context must be set");
            match ctx.region_id {
                // Region 1 fails outright.
                1 => Err(Error::StringError("injected failure".to_owned())),
                // Region 2 never stops returning stale routing, so its task
                // sits in backoff sleeps until it is cancelled.
                _ => Ok(Box::new(kvrpcpb::RawBatchGetResponse {
                    region_error: Some(region_miss_error()),
                    ..Default::default()
                }) as Box<dyn Any + Send>),
            }
        });

        let started = tokio::time::Instant::now();
        let err = client
            .batch_get(vec!["a".to_owned(), "x".to_owned()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"), "{err:?}");
        // Far less than the 20s budget: the sibling was cancelled, not
        // drained to exhaustion.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (client, _, _) = store_client(Arc::new(MockPlacement::default()));
        client.close().await;
        client.close().await;
    }
}
