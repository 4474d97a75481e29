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

use ahash::AHashMap;

use super::{Slot, StitchStats};

/// Pairs requests and responses carrying a session id (dns transaction id, kafka correlation
/// id, dubbo request id), so arrival order does not matter.
///
/// Each side holds at most `max_entries` pending values, inserts beyond that are refused.
pub struct IdStitchingCache<Req, Resp> {
    requests: AHashMap<u64, Slot<Req>>,
    responses: AHashMap<u64, Slot<Resp>>,
    max_entries: usize,
    stats: StitchStats,
}

impl<Req, Resp> IdStitchingCache<Req, Resp> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            requests: AHashMap::new(),
            responses: AHashMap::new(),
            max_entries,
            stats: StitchStats::default(),
        }
    }

    pub fn requests_len(&self) -> usize {
        self.requests.len()
    }

    pub fn responses_len(&self) -> usize {
        self.responses.len()
    }

    pub fn cached_size(&self) -> usize {
        self.requests.len() + self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.responses.is_empty()
    }

    pub fn stats(&self) -> &StitchStats {
        &self.stats
    }

    /// Stitches with a pending response of the same id or keeps the request.
    ///
    /// Returns false only when the request was refused because the cache is full.
    pub fn insert_request<F>(&mut self, id: u64, slot: Slot<Req>, convert: F) -> bool
    where
        F: FnOnce(&Slot<Req>, &Slot<Resp>) -> bool,
    {
        if let Some(resp) = self.responses.remove(&id) {
            self.stats.stitched += 1;
            convert(&slot, &resp);
            return true;
        }
        if self.requests.len() >= self.max_entries && !self.requests.contains_key(&id) {
            self.stats.evicted += 1;
            return false;
        }
        // a retransmitted id replaces the pending one
        if self.requests.insert(id, slot).is_some() {
            self.stats.evicted += 1;
        }
        true
    }

    pub fn insert_response<F>(&mut self, id: u64, slot: Slot<Resp>, convert: F) -> bool
    where
        F: FnOnce(&Slot<Req>, &Slot<Resp>) -> bool,
    {
        if let Some(req) = self.requests.remove(&id) {
            self.stats.stitched += 1;
            convert(&req, &slot);
            return true;
        }
        if self.responses.len() >= self.max_entries && !self.responses.contains_key(&id) {
            self.stats.evicted += 1;
            return false;
        }
        if self.responses.insert(id, slot).is_some() {
            self.stats.evicted += 1;
        }
        true
    }

    /// Drops every pending entry older than `expire_ns`, returns whether the cache is empty.
    pub fn garbage_collection(&mut self, expire_ns: u64) -> bool {
        let before = self.cached_size();
        self.requests.retain(|_, s| s.time_ns >= expire_ns);
        self.responses.retain(|_, s| s.time_ns >= expire_ns);
        self.stats.expired += (before - self.cached_size()) as u64;
        self.is_empty()
    }
}
