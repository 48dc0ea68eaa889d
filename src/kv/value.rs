// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

/// The value part of a key/value pair.
///
/// Values are opaque byte strings. The store rejects empty values on every
/// write path, so a returned empty value is indistinguishable from an absent
/// key and the client collapses it to "absent".
pub type Value = Vec<u8>;
