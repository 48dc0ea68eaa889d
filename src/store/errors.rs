// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use crate::proto::errorpb;
use crate::proto::kvrpcpb;

/// Responses that can carry a region error.
pub trait HasRegionError {
    fn region_error(&mut self) -> Option<errorpb::Error>;
}

/// Allows setting a region error on a response type.
///
/// Used internally to trigger a region-level retry when a request must be
/// re-routed (e.g. the routing token no longer resolves in the cache).
pub trait SetRegionError {
    fn set_region_error(&mut self, error: errorpb::Error);
}

/// Responses whose command-level failures are a plain error string.
pub trait HasStrError {
    fn str_error(&mut self) -> Option<String>;
}

macro_rules! has_region_error {
    ($type:ty) => {
        impl HasRegionError for $type {
            fn region_error(&mut self) -> Option<errorpb::Error> {
                self.region_error.take()
            }
        }
    };
}

has_region_error!(kvrpcpb::RawGetResponse);
has_region_error!(kvrpcpb::RawBatchGetResponse);
has_region_error!(kvrpcpb::RawGetKeyTtlResponse);
has_region_error!(kvrpcpb::RawPutResponse);
has_region_error!(kvrpcpb::RawBatchPutResponse);
has_region_error!(kvrpcpb::RawDeleteResponse);
has_region_error!(kvrpcpb::RawBatchDeleteResponse);
has_region_error!(kvrpcpb::RawDeleteRangeResponse);
has_region_error!(kvrpcpb::RawScanResponse);
has_region_error!(kvrpcpb::RawCasResponse);

macro_rules! set_region_error {
    ($type:ty) => {
        impl SetRegionError for $type {
            fn set_region_error(&mut self, error: errorpb::Error) {
                self.region_error = Some(error);
            }
        }
    };
}

set_region_error!(kvrpcpb::RawGetResponse);
set_region_error!(kvrpcpb::RawBatchGetResponse);
set_region_error!(kvrpcpb::RawGetKeyTtlResponse);
set_region_error!(kvrpcpb::RawPutResponse);
set_region_error!(kvrpcpb::RawBatchPutResponse);
set_region_error!(kvrpcpb::RawDeleteResponse);
set_region_error!(kvrpcpb::RawBatchDeleteResponse);
set_region_error!(kvrpcpb::RawDeleteRangeResponse);
set_region_error!(kvrpcpb::RawScanResponse);
set_region_error!(kvrpcpb::RawCasResponse);

macro_rules! has_str_error {
    ($type:ty) => {
        impl HasStrError for $type {
            fn str_error(&mut self) -> Option<String> {
                if self.error.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.error))
                }
            }
        }
    };
}

has_str_error!(kvrpcpb::RawGetResponse);
has_str_error!(kvrpcpb::RawGetKeyTtlResponse);
has_str_error!(kvrpcpb::RawPutResponse);
has_str_error!(kvrpcpb::RawBatchPutResponse);
has_str_error!(kvrpcpb::RawDeleteResponse);
has_str_error!(kvrpcpb::RawBatchDeleteResponse);
has_str_error!(kvrpcpb::RawDeleteRangeResponse);
has_str_error!(kvrpcpb::RawCasResponse);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_error_is_taken_once() {
        let mut resp = kvrpcpb::RawGetResponse {
            region_error: Some(errorpb::Error::default()),
            ..Default::default()
        };
        assert!(resp.region_error().is_some());
        assert!(resp.region_error().is_none());
    }

    #[test]
    fn str_error_is_taken_once() {
        let mut resp = kvrpcpb::RawCasResponse {
            error: "boom".to_owned(),
            ..Default::default()
        };
        assert_eq!(resp.str_error().as_deref(), Some("boom"));
        assert!(resp.str_error().is_none());
    }

    #[test]
    fn synthesized_region_error_round_trips() {
        let mut resp = kvrpcpb::RawScanResponse::default();
        resp.set_region_error(errorpb::Error {
            message: "stale".to_owned(),
            ..Default::default()
        });
        let e = resp.region_error().unwrap();
        assert_eq!(e.message, "stale");
    }
}
