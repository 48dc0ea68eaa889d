// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use crate::common::Error;
use crate::common::Result;
use crate::proto::metapb;
use crate::Key;

pub type RegionId = u64;
pub type StoreId = u64;

/// The routing token for a region: its id plus the epoch it was observed at.
///
/// A `RegionVerId` uniquely identifies a region *across time*; it goes stale
/// when the region splits, merges, or changes membership, at which point the
/// serving store rejects requests carrying it with a region error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RegionVerId {
    pub id: RegionId,
    pub conf_ver: u64,
    pub ver: u64,
}

/// A region as the placement directory reports it, together with the peer it
/// says is the leader.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionWithLeader {
    pub region: metapb::Region,
    pub leader: Option<metapb::Peer>,
}

impl RegionWithLeader {
    pub fn id(&self) -> RegionId {
        self.region.id
    }

    pub fn start_key(&self) -> Key {
        self.region.start_key.clone().into()
    }

    pub fn end_key(&self) -> Key {
        self.region.end_key.clone().into()
    }

    pub fn ver_id(&self) -> RegionVerId {
        let epoch = self.region.region_epoch.as_ref();
        RegionVerId {
            id: self.region.id,
            conf_ver: epoch.map(|e| e.conf_ver).unwrap_or_default(),
            ver: epoch.map(|e| e.version).unwrap_or_default(),
        }
    }

    /// Whether `key` lies in `[start_key, end_key)`.
    pub fn contains(&self, key: &Key) -> bool {
        let key: &[u8] = key.into();
        let start_key = self.region.start_key.as_slice();
        let end_key = self.region.end_key.as_slice();
        key >= start_key && (key < end_key || end_key.is_empty())
    }

    /// Whether `key` lies in `(start_key, end_key]`.
    ///
    /// This is the containment test for a key used as an *exclusive end
    /// bound*: the region holding the keys just below `key`.
    pub fn contains_by_end(&self, key: &Key) -> bool {
        let key: &[u8] = key.into();
        let start_key = self.region.start_key.as_slice();
        let end_key = self.region.end_key.as_slice();
        key > start_key && (key <= end_key || end_key.is_empty())
    }

    pub fn get_store_id(&self) -> Result<StoreId> {
        self.leader
            .as_ref()
            .map(|l| l.store_id)
            .ok_or_else(|| Error::LeaderNotFound {
                region: self.ver_id(),
            })
    }
}

/// The resolution of a key (or range bound) against the routing cache: the
/// covering region's bounds and its routing token.
///
/// A location may be stale; the serving store rejects requests routed with a
/// stale token and the dispatch layer re-resolves.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyLocation {
    pub start_key: Key,
    pub end_key: Key,
    pub region: RegionVerId,
}

impl From<&RegionWithLeader> for KeyLocation {
    fn from(region: &RegionWithLeader) -> Self {
        KeyLocation {
            start_key: region.start_key(),
            end_key: region.end_key(),
            region: region.ver_id(),
        }
    }
}
