// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Messages and client binding for the `placementpb.Placement` directory
//! service.

use super::metapb;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestHeader {
    /// The cluster the request is meant for. Zero is accepted by
    /// `GetMembers` only (the caller does not know the id yet).
    #[prost(uint64, tag = "1")]
    pub cluster_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseHeader {
    #[prost(uint64, tag = "1")]
    pub cluster_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Member {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub client_urls: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMembersRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMembersResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, repeated, tag = "2")]
    pub members: Vec<Member>,
    #[prost(message, optional, tag = "3")]
    pub leader: Option<Member>,
}

/// Used by both `GetRegion` (the region containing `key`) and
/// `GetPrevRegion` (the region immediately before the one containing `key`).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRegionRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(bytes = "vec", tag = "2")]
    pub key: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRegionResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    /// Absent when no region covers the requested key.
    #[prost(message, optional, tag = "2")]
    pub region: Option<metapb::Region>,
    #[prost(message, optional, tag = "3")]
    pub leader: Option<metapb::Peer>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStoreRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<RequestHeader>,
    #[prost(uint64, tag = "2")]
    pub store_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStoreResponse {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ResponseHeader>,
    #[prost(message, optional, tag = "2")]
    pub store: Option<metapb::Store>,
}

pub mod placement_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::transport::Channel;

    use crate::proto::placementpb;

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

    /// Unary client for the `placementpb.Placement` service.
    #[derive(Clone)]
    pub struct PlacementClient {
        inner: tonic::client::Grpc<Channel>,
    }

    impl PlacementClient {
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        unary!(
            get_members,
            placementpb::GetMembersRequest,
            placementpb::GetMembersResponse,
            "/placementpb.Placement/GetMembers"
        );
        unary!(
            get_region,
            placementpb::GetRegionRequest,
            placementpb::GetRegionResponse,
            "/placementpb.Placement/GetRegion"
        );
        unary!(
            get_prev_region,
            placementpb::GetRegionRequest,
            placementpb::GetRegionResponse,
            "/placementpb.Placement/GetPrevRegion"
        );
        unary!(
            get_store,
            placementpb::GetStoreRequest,
            placementpb::GetStoreResponse,
            "/placementpb.Placement/GetStore"
        );
    }
}
