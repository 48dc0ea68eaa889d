// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! This crate provides an easy-to-use client for RangeKV, a sharded,
//! range-partitioned key-value store.
//!
//! The store is organized as a set of contiguous key ranges called *regions*,
//! each served by a replica group; a separate *placement directory* maps keys
//! to the current region and leader. The client turns user-level operations
//! (point reads and writes, batched reads/writes/deletes, scans in both
//! directions, range deletes, compare-and-swap) into one or more per-region
//! RPCs against the correct region leaders, absorbing region-topology changes
//! transparently through its routing cache and bounded retry.
//!
//! Requests are raw: there is no wrapping transaction and no multi-key
//! atomicity. Each request is processed as soon as it is executed, and a
//! batched operation reports only aggregate success or its first failure.
//!
//! ## Usage
//!
//! Create a [`Client`] from the placement directory endpoints (not the store
//! nodes), optionally with a [`Config`] for TLS and timeouts, then call the
//! operation methods on it.
//!
//! ```rust,no_run
//! # use rangekv_client::{Client, Result};
//! # async fn example() -> Result<()> {
//! let client = Client::new(vec!["127.0.0.1:2379"]).await?;
//! client.put("key".to_owned(), b"value".to_vec()).await?;
//! let _value = client.get("key".to_owned()).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! Since this crate provides an async API, you need an async runtime
//! (Tokio-only).

mod backoff;
mod common;
mod config;
mod kv;
mod placement;
#[doc(hidden)]
pub mod proto;
mod raw;
mod region;
mod region_cache;
mod request;
mod stats;
mod store;

#[cfg(test)]
mod mock;

#[doc(inline)]
pub use common::Error;
#[doc(inline)]
pub use common::Result;
#[doc(inline)]
pub use common::SecurityManager;
#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use config::PlacementRetryConfig;

#[doc(inline)]
pub use crate::backoff::BackoffErrorKind;
#[doc(inline)]
pub use crate::backoff::BackofferError;
#[doc(inline)]
pub use crate::kv::Key;
#[doc(inline)]
pub use crate::kv::KvPair;
#[doc(inline)]
pub use crate::kv::Value;
#[doc(inline)]
pub use crate::placement::PlacementClient;
#[doc(inline)]
pub use crate::placement::PlacementRpcClient;
#[doc(inline)]
pub use crate::raw::lowering as raw_lowering;
#[doc(inline)]
pub use crate::raw::Client;
#[doc(inline)]
pub use crate::region::KeyLocation;
#[doc(inline)]
pub use crate::region::RegionId;
#[doc(inline)]
pub use crate::region::RegionVerId;
#[doc(inline)]
pub use crate::region::RegionWithLeader;
#[doc(inline)]
pub use crate::region::StoreId;
