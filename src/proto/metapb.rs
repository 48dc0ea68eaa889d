// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Cluster topology messages shared by the placement directory and the stores.

/// A contiguous key range `[start_key, end_key)` served by one replica group.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Region {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Inclusive lower bound. Empty means the beginning of the keyspace.
    #[prost(bytes = "vec", tag = "2")]
    pub start_key: Vec<u8>,
    /// Exclusive upper bound. Empty means the end of the keyspace.
    #[prost(bytes = "vec", tag = "3")]
    pub end_key: Vec<u8>,
    /// Bumped on every split/merge (`version`) or peer-membership change
    /// (`conf_ver`). Stale epochs are rejected by the serving store.
    #[prost(message, optional, tag = "4")]
    pub region_epoch: Option<RegionEpoch>,
    #[prost(message, repeated, tag = "5")]
    pub peers: Vec<Peer>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct RegionEpoch {
    #[prost(uint64, tag = "1")]
    pub conf_ver: u64,
    #[prost(uint64, tag = "2")]
    pub version: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Peer {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub store_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Store {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// The address the store serves KV RPCs on.
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(enumeration = "StoreState", tag = "3")]
    pub state: i32,
    #[prost(message, repeated, tag = "4")]
    pub labels: Vec<StoreLabel>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreLabel {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StoreState {
    Up = 0,
    Offline = 1,
    Tombstone = 2,
}
