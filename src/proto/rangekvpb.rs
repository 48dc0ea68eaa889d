// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Client binding for the `rangekvpb.RangeKv` store service.

pub mod range_kv_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::transport::Channel;

    use crate::proto::kvrpcpb;

    macro_rules! unary {
        ($name:ident, $req:ty, $resp:ty, $path:literal) => {
            pub async fn $name(
                &mut self,
                request: impl tonic::IntoRequest<$req>,
            ) -> Result<tonic::Response<$resp>, tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::unavailable(format!("service was not ready: {e}"))
                })?;
                let codec: tonic::codec::ProstCodec<$req, $resp> =
                    tonic::codec::ProstCodec::default();
                self.inner
                    .unary(
                        request.into_request(),
                        PathAndQuery::from_static($path),
                        codec,
                    )
                    .await
            }
        };
    }

    /// Unary client for the raw command endpoints of a single store.
    #[derive(Clone)]
    pub struct RangeKvClient {
        inner: tonic::client::Grpc<Channel>,
    }

    impl RangeKvClient {
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        unary!(
            raw_get,
            kvrpcpb::RawGetRequest,
            kvrpcpb::RawGetResponse,
            "/rangekvpb.RangeKv/RawGet"
        );
        unary!(
            raw_batch_get,
            kvrpcpb::RawBatchGetRequest,
            kvrpcpb::RawBatchGetResponse,
            "/rangekvpb.RangeKv/RawBatchGet"
        );
        unary!(
            raw_get_key_ttl,
            kvrpcpb::RawGetKeyTtlRequest,
            kvrpcpb::RawGetKeyTtlResponse,
            "/rangekvpb.RangeKv/RawGetKeyTTL"
        );
        unary!(
            raw_put,
            kvrpcpb::RawPutRequest,
            kvrpcpb::RawPutResponse,
            "/rangekvpb.RangeKv/RawPut"
        );
        unary!(
            raw_batch_put,
            kvrpcpb::RawBatchPutRequest,
            kvrpcpb::RawBatchPutResponse,
            "/rangekvpb.RangeKv/RawBatchPut"
        );
        unary!(
            raw_delete,
            kvrpcpb::RawDeleteRequest,
            kvrpcpb::RawDeleteResponse,
            "/rangekvpb.RangeKv/RawDelete"
        );
        unary!(
            raw_batch_delete,
            kvrpcpb::RawBatchDeleteRequest,
            kvrpcpb::RawBatchDeleteResponse,
            "/rangekvpb.RangeKv/RawBatchDelete"
        );
        unary!(
            raw_delete_range,
            kvrpcpb::RawDeleteRangeRequest,
            kvrpcpb::RawDeleteRangeResponse,
            "/rangekvpb.RangeKv/RawDeleteRange"
        );
        unary!(
            raw_scan,
            kvrpcpb::RawScanRequest,
            kvrpcpb::RawScanResponse,
            "/rangekvpb.RangeKv/RawScan"
        );
        unary!(
            raw_compare_and_swap,
            kvrpcpb::RawCasRequest,
            kvrpcpb::RawCasResponse,
            "/rangekvpb.RangeKv/RawCompareAndSwap"
        );
    }
}
