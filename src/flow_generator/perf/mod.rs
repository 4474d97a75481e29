/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

mod l7_rrt;
mod stitching_cache;

use serde::Deserialize;

pub use l7_rrt::IdStitchingCache;
pub use stitching_cache::StitchingCache;

// ring capacity of every connection without a session id
pub const STITCHING_CACHE_CAPACITY: usize = 8;

/// One pending request or response.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<T> {
    pub value: T,
    pub time_ns: u64,
    // payload bytes as seen on the wire
    pub size: u32,
}

impl<T> Slot<T> {
    pub fn new(value: T, time_ns: u64, size: u32) -> Self {
        Self {
            value,
            time_ns,
            size,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StitchPolicy {
    // n-th pending request pairs with the n-th pending response
    #[default]
    Fifo,
    // a response pairs with the newest request not later than itself
    Closest,
}

/// Counters shared by both cache flavours.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StitchStats {
    pub stitched: u64,
    // pushed out of a full ring or refused by a full map
    pub evicted: u64,
    // responses older than every pending request
    pub discarded: u64,
    // removed by garbage collection
    pub expired: u64,
}
