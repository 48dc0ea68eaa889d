// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Constructors for raw wire requests.
//!
//! This module puts the gap between the client API and the wire messages in
//! one place: the façade hands over crate types and gets typed requests back.

use crate::proto::kvrpcpb;
use crate::Key;
use crate::Value;

pub fn new_raw_get_request(key: Key) -> kvrpcpb::RawGetRequest {
    kvrpcpb::RawGetRequest {
        key: key.into(),
        ..Default::default()
    }
}

pub fn new_raw_batch_get_request(keys: Vec<Key>) -> kvrpcpb::RawBatchGetRequest {
    kvrpcpb::RawBatchGetRequest {
        keys: keys.into_iter().map(Into::into).collect(),
        ..Default::default()
    }
}

pub fn new_raw_get_key_ttl_request(key: Key) -> kvrpcpb::RawGetKeyTtlRequest {
    kvrpcpb::RawGetKeyTtlRequest {
        key: key.into(),
        ..Default::default()
    }
}

pub fn new_raw_put_request(
    key: Key,
    value: Value,
    ttl: u64,
    for_cas: bool,
) -> kvrpcpb::RawPutRequest {
    kvrpcpb::RawPutRequest {
        key: key.into(),
        value,
        ttl,
        for_cas,
        ..Default::default()
    }
}

pub fn new_raw_batch_put_request(
    pairs: Vec<kvrpcpb::KvPair>,
    ttls: Vec<u64>,
    for_cas: bool,
) -> kvrpcpb::RawBatchPutRequest {
    kvrpcpb::RawBatchPutRequest {
        pairs,
        ttls,
        for_cas,
        ..Default::default()
    }
}

pub fn new_raw_delete_request(key: Key, for_cas: bool) -> kvrpcpb::RawDeleteRequest {
    kvrpcpb::RawDeleteRequest {
        key: key.into(),
        for_cas,
        ..Default::default()
    }
}

pub fn new_raw_batch_delete_request(
    keys: Vec<Key>,
    for_cas: bool,
) -> kvrpcpb::RawBatchDeleteRequest {
    kvrpcpb::RawBatchDeleteRequest {
        keys: keys.into_iter().map(Into::into).collect(),
        for_cas,
        ..Default::default()
    }
}

pub fn new_raw_delete_range_request(
    start_key: Key,
    end_key: Key,
) -> kvrpcpb::RawDeleteRangeRequest {
    kvrpcpb::RawDeleteRangeRequest {
        start_key: start_key.into(),
        end_key: end_key.into(),
        ..Default::default()
    }
}

pub fn new_raw_scan_request(
    start_key: Key,
    end_key: Key,
    limit: u32,
    reverse: bool,
) -> kvrpcpb::RawScanRequest {
    kvrpcpb::RawScanRequest {
        start_key: start_key.into(),
        end_key: end_key.into(),
        limit,
        reverse,
        ..Default::default()
    }
}

pub fn new_cas_request(
    key: Key,
    new_value: Value,
    previous_value: Option<Value>,
) -> kvrpcpb::RawCasRequest {
    let mut req = kvrpcpb::RawCasRequest {
        key: key.into(),
        value: new_value,
        ..Default::default()
    };
    match previous_value {
        Some(previous_value) => req.previous_value = previous_value,
        None => req.previous_not_exist = true,
    }
    req
}
