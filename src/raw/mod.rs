// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! The raw client: non-transactional point, batch, range, and scan commands.

mod batch;
mod client;
pub mod lowering;

pub use client::Client;
