// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Batch planning and fan-out execution for multi-key commands.
//!
//! Planning is pure: keys are grouped by region through the routing cache and
//! each group is cut into sub-batches within the per-batch caps. Execution
//! fans the sub-batches out concurrently under one forked retry budget; the
//! first failure cancels the remaining sub-batches and wins.
//!
//! A sub-batch that hits a region error cannot simply be retried against the
//! same routing token: the region may have changed shape. After charging
//! backoff, the sub-batch's keys re-enter the planner under the refreshed
//! cache, bounded only by the shared budget.

use std::collections::HashMap;

use async_recursion::async_recursion;
use tokio::sync::mpsc;

use super::client::Client;
use super::lowering::new_raw_batch_delete_request;
use super::lowering::new_raw_batch_get_request;
use super::lowering::new_raw_batch_put_request;
use crate::backoff::Backoffer;
use crate::config::MAX_WRITE_EXECUTION_TIME;
use crate::config::READ_TIMEOUT_SHORT;
use crate::placement::PlacementClient;
use crate::proto::kvrpcpb;
use crate::region::RegionVerId;
use crate::store::HasRegionError;
use crate::store::HasStrError;
use crate::store::Request;
use crate::Error;
use crate::Key;
use crate::Result;
use crate::Value;

/// Maximum cumulative `key + value` payload per batch-put sub-batch.
pub(crate) const RAW_BATCH_PUT_SIZE: usize = 16 * 1024;
/// Maximum pair count per batch-get/batch-delete sub-batch.
pub(crate) const RAW_BATCH_PAIR_COUNT: usize = 512;

/// One per-region slice of a batched command, within the per-batch caps.
///
/// `values` and `ttls` are populated for put batches only, in lockstep with
/// `keys`.
#[derive(Clone, Debug)]
pub(crate) struct Batch {
    pub(crate) region: RegionVerId,
    pub(crate) keys: Vec<Key>,
    pub(crate) values: Vec<Value>,
    pub(crate) ttls: Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BatchCommand {
    Get,
    Put,
    Delete,
}

/// Cut one region's keys into sub-batches of at most `limit` pairs.
pub(crate) fn append_key_batches(
    batches: &mut Vec<Batch>,
    region: &RegionVerId,
    keys: Vec<Key>,
    limit: usize,
) {
    for chunk in keys.chunks(limit) {
        batches.push(Batch {
            region: region.clone(),
            keys: chunk.to_vec(),
            values: Vec::new(),
            ttls: Vec::new(),
        });
    }
}

/// Cut one region's pairs into sub-batches, cutting once the cumulative
/// `key + value` size reaches `limit` bytes. The cap bounds the payload, not
/// the pair count.
pub(crate) fn append_put_batches(
    batches: &mut Vec<Batch>,
    region: &RegionVerId,
    keys: Vec<Key>,
    kv: &HashMap<Key, (Value, u64)>,
    limit: usize,
) {
    let mut batch = Batch {
        region: region.clone(),
        keys: Vec::new(),
        values: Vec::new(),
        ttls: Vec::new(),
    };
    let mut size = 0;
    for key in keys {
        let Some((value, ttl)) = kv.get(&key) else {
            continue;
        };
        size += key.len() + value.len();
        batch.keys.push(key);
        batch.values.push(value.clone());
        batch.ttls.push(*ttl);
        if size >= limit {
            let full = std::mem::replace(
                &mut batch,
                Batch {
                    region: region.clone(),
                    keys: Vec::new(),
                    values: Vec::new(),
                    ttls: Vec::new(),
                },
            );
            batches.push(full);
            size = 0;
        }
    }
    if !batch.keys.is_empty() {
        batches.push(batch);
    }
}

impl<C: PlacementClient> Client<C> {
    /// Plan and execute a batch-get or batch-delete over `keys`.
    ///
    /// For batch-get the returned pairs are the union of per-region results
    /// in no particular order; the façade restores per-key association.
    #[async_recursion]
    pub(super) async fn send_batch_req(
        &self,
        bo: &mut Backoffer,
        keys: Vec<Key>,
        cmd: BatchCommand,
    ) -> Result<Vec<kvrpcpb::KvPair>> {
        debug_assert!(matches!(cmd, BatchCommand::Get | BatchCommand::Delete));
        let groups = self.cache.group_keys_by_region(bo, &keys).await?;
        let mut batches = Vec::new();
        for (region, group_keys) in groups {
            append_key_batches(&mut batches, &region, group_keys, RAW_BATCH_PAIR_COUNT);
        }
        self.execute_batches(bo, batches, cmd).await
    }

    /// Plan and execute a batch-put over parallel `keys`/`values`/`ttls`
    /// slices (`ttls` may be empty for "no TTLs").
    #[async_recursion]
    pub(super) async fn send_batch_put(
        &self,
        bo: &mut Backoffer,
        keys: Vec<Key>,
        values: Vec<Value>,
        ttls: Vec<u64>,
    ) -> Result<()> {
        let mut kv: HashMap<Key, (Value, u64)> = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let ttl = ttls.get(i).copied().unwrap_or_default();
            kv.insert(key.clone(), (values[i].clone(), ttl));
        }

        let groups = self.cache.group_keys_by_region(bo, &keys).await?;
        let mut batches = Vec::new();
        for (region, group_keys) in groups {
            append_put_batches(&mut batches, &region, group_keys, &kv, RAW_BATCH_PUT_SIZE);
        }
        self.execute_batches(bo, batches, BatchCommand::Put).await?;
        Ok(())
    }

    /// Fan the sub-batches out concurrently under one forked budget.
    ///
    /// The first task failure cancels the group (aborting siblings' pending
    /// sleeps and in-flight waits) and is returned; the collector still
    /// drains every task so none outlives the call.
    async fn execute_batches(
        &self,
        bo: &mut Backoffer,
        batches: Vec<Batch>,
        cmd: BatchCommand,
    ) -> Result<Vec<kvrpcpb::KvPair>> {
        if batches.is_empty() {
            return Ok(Vec::new());
        }

        let (group_bo, cancel_group) = bo.fork();
        let (tx, mut rx) = mpsc::channel(batches.len());
        for batch in batches {
            let client = self.clone();
            let (mut task_bo, task_cancel) = group_bo.fork();
            let tx = tx.clone();
            tokio::spawn(async move {
                let res = client.do_batch_req(&mut task_bo, batch, cmd).await;
                task_cancel.cancel();
                let _ = tx.send(res).await;
            });
        }
        drop(tx);

        let mut first_error = None;
        let mut pairs = Vec::new();
        while let Some(res) = rx.recv().await {
            match res {
                Ok(mut batch_pairs) => pairs.append(&mut batch_pairs),
                Err(e) => {
                    cancel_group.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        cancel_group.cancel();

        match first_error {
            Some(e) => Err(e),
            None => Ok(pairs),
        }
    }

    /// One sub-batch step: build the per-kind wire message, send it to the
    /// sub-batch's region, and merge the typed response.
    #[async_recursion]
    async fn do_batch_req(
        &self,
        bo: &mut Backoffer,
        batch: Batch,
        cmd: BatchCommand,
    ) -> Result<Vec<kvrpcpb::KvPair>> {
        let sender = self.sender();
        match cmd {
            BatchCommand::Get => {
                let mut req = new_raw_batch_get_request(batch.keys.clone());
                let mut resp = sender
                    .send_req(bo, &mut req, &batch.region, READ_TIMEOUT_SHORT)
                    .await?;
                if let Some(region_err) = resp.region_error() {
                    sender.on_region_error(bo, &batch.region, region_err).await?;
                    return self.send_batch_req(bo, batch.keys, cmd).await;
                }
                Ok(resp.pairs)
            }
            BatchCommand::Delete => {
                let mut req = new_raw_batch_delete_request(batch.keys.clone(), self.atomic);
                req.set_max_execution_duration(MAX_WRITE_EXECUTION_TIME);
                let mut resp = sender
                    .send_req(bo, &mut req, &batch.region, READ_TIMEOUT_SHORT)
                    .await?;
                if let Some(region_err) = resp.region_error() {
                    sender.on_region_error(bo, &batch.region, region_err).await?;
                    return self.send_batch_req(bo, batch.keys, cmd).await;
                }
                if let Some(message) = resp.str_error() {
                    return Err(Error::KvError { message });
                }
                Ok(Vec::new())
            }
            BatchCommand::Put => {
                let pairs = batch
                    .keys
                    .iter()
                    .cloned()
                    .zip(batch.values.iter().cloned())
                    .map(|(key, value)| kvrpcpb::KvPair {
                        key: key.into(),
                        value,
                    })
                    .collect();
                let mut req = new_raw_batch_put_request(pairs, batch.ttls.clone(), self.atomic);
                req.set_max_execution_duration(MAX_WRITE_EXECUTION_TIME);
                let mut resp = sender
                    .send_req(bo, &mut req, &batch.region, READ_TIMEOUT_SHORT)
                    .await?;
                if let Some(region_err) = resp.region_error() {
                    sender.on_region_error(bo, &batch.region, region_err).await?;
                    self.send_batch_put(bo, batch.keys, batch.values, batch.ttls)
                        .await?;
                    return Ok(Vec::new());
                }
                if let Some(message) = resp.str_error() {
                    return Err(Error::KvError { message });
                }
                Ok(Vec::new())
            }
        }
    }
}
