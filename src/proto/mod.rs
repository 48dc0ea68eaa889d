// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Wire messages and hand-bound gRPC clients.
//!
//! The message definitions mirror the protobuf schemas served by the cluster
//! (`metapb`, `errorpb`, `kvrpcpb`, `placementpb`); the service bindings in
//! [`rangekvpb`] and [`placementpb`] are thin unary wrappers over
//! `tonic::client::Grpc`.

pub mod errorpb;
pub mod kvrpcpb;
pub mod metapb;
pub mod placementpb;
pub mod rangekvpb;
