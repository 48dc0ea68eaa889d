// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Region-level errors returned inside otherwise-successful responses.
//!
//! A populated [`Error`] means the routing information used for the request
//! was stale (or the serving store wants the client to wait); it is never a
//! logical failure of the command itself.

use super::metapb;

/// The store serving the region is not its current leader.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NotLeader {
    #[prost(uint64, tag = "1")]
    pub region_id: u64,
    /// The leader the store believes in, if it knows one.
    #[prost(message, optional, tag = "2")]
    pub leader: Option<metapb::Peer>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegionNotFound {
    #[prost(uint64, tag = "1")]
    pub region_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyNotInRegion {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub region_id: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub start_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub end_key: Vec<u8>,
}

/// The request's region epoch is behind (split/merge) or ahead of the store's.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EpochNotMatch {
    /// The regions currently covering the requested range, as the store sees
    /// them. May be empty when the store cannot tell.
    #[prost(message, repeated, tag = "1")]
    pub current_regions: Vec<metapb::Region>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerIsBusy {
    #[prost(string, tag = "1")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StaleCommand {}

/// The request was delivered to a store that no longer hosts the peer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreNotMatch {
    #[prost(uint64, tag = "1")]
    pub request_store_id: u64,
    #[prost(uint64, tag = "2")]
    pub actual_store_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(message, optional, tag = "2")]
    pub not_leader: Option<NotLeader>,
    #[prost(message, optional, tag = "3")]
    pub region_not_found: Option<RegionNotFound>,
    #[prost(message, optional, tag = "4")]
    pub key_not_in_region: Option<KeyNotInRegion>,
    #[prost(message, optional, tag = "5")]
    pub epoch_not_match: Option<EpochNotMatch>,
    #[prost(message, optional, tag = "6")]
    pub server_is_busy: Option<ServerIsBusy>,
    #[prost(message, optional, tag = "7")]
    pub stale_command: Option<StaleCommand>,
    #[prost(message, optional, tag = "8")]
    pub store_not_match: Option<StoreNotMatch>,
}
