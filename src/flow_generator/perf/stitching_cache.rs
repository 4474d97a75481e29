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

use std::array;

use log::trace;

use super::{Slot, StitchPolicy, StitchStats};

/// Pairs requests and responses of protocols without a session id.
///
/// Two rings of capacity `N` are addressed by ever increasing head and tail counters, `head`
/// starts at 0 and `tail` at -1 so that `len = tail - head + 1`. Pushing into a full ring
/// overwrites the oldest pending entry, which is counted as evicted and never reported.
pub struct StitchingCache<Req, Resp, const N: usize> {
    requests: [Option<Slot<Req>>; N],
    responses: [Option<Slot<Resp>>; N],

    head_request: i64,
    tail_request: i64,
    head_response: i64,
    tail_response: i64,

    policy: StitchPolicy,
    stats: StitchStats,
}

impl<Req, Resp, const N: usize> Default for StitchingCache<Req, Resp, N> {
    fn default() -> Self {
        Self::new(StitchPolicy::default())
    }
}

impl<Req, Resp, const N: usize> StitchingCache<Req, Resp, N> {
    pub fn new(policy: StitchPolicy) -> Self {
        assert!(N > 0);
        Self {
            requests: array::from_fn(|_| None),
            responses: array::from_fn(|_| None),
            head_request: 0,
            tail_request: -1,
            head_response: 0,
            tail_response: -1,
            policy,
            stats: StitchStats::default(),
        }
    }

    fn index(i: i64) -> usize {
        i as usize % N
    }

    pub fn head_request(&self) -> i64 {
        self.head_request
    }

    pub fn tail_request(&self) -> i64 {
        self.tail_request
    }

    pub fn head_response(&self) -> i64 {
        self.head_response
    }

    pub fn tail_response(&self) -> i64 {
        self.tail_response
    }

    pub fn requests_len(&self) -> usize {
        (self.tail_request - self.head_request + 1) as usize
    }

    pub fn responses_len(&self) -> usize {
        (self.tail_response - self.head_response + 1) as usize
    }

    pub fn cached_size(&self) -> usize {
        self.requests_len() + self.responses_len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached_size() == 0
    }

    pub fn stats(&self) -> &StitchStats {
        &self.stats
    }

    pub fn insert_request(&mut self, slot: Slot<Req>) {
        self.tail_request += 1;
        if self.tail_request - self.head_request == N as i64 {
            self.requests[Self::index(self.head_request)] = None;
            self.head_request += 1;
            self.stats.evicted += 1;
        }
        self.requests[Self::index(self.tail_request)] = Some(slot);
    }

    pub fn insert_response(&mut self, slot: Slot<Resp>) {
        self.tail_response += 1;
        if self.tail_response - self.head_response == N as i64 {
            self.responses[Self::index(self.head_response)] = None;
            self.head_response += 1;
            self.stats.evicted += 1;
        }
        self.responses[Self::index(self.tail_response)] = Some(slot);
    }

    fn front_request_time(&self) -> Option<u64> {
        if self.requests_len() == 0 {
            return None;
        }
        self.requests[Self::index(self.head_request)]
            .as_ref()
            .map(|s| s.time_ns)
    }

    fn front_response_time(&self) -> Option<u64> {
        if self.responses_len() == 0 {
            return None;
        }
        self.responses[Self::index(self.head_response)]
            .as_ref()
            .map(|s| s.time_ns)
    }

    fn pop_request(&mut self) -> Option<Slot<Req>> {
        if self.requests_len() == 0 {
            return None;
        }
        let slot = self.requests[Self::index(self.head_request)].take();
        self.head_request += 1;
        slot
    }

    fn pop_response(&mut self) -> Option<Slot<Resp>> {
        if self.responses_len() == 0 {
            return None;
        }
        let slot = self.responses[Self::index(self.head_response)].take();
        self.head_response += 1;
        slot
    }

    fn stitch_front<F>(&mut self, convert: F) -> bool
    where
        F: FnOnce(&Slot<Req>, &Slot<Resp>) -> bool,
    {
        match (self.pop_request(), self.pop_response()) {
            (Some(req), Some(resp)) => {
                self.stats.stitched += 1;
                if !convert(&req, &resp) {
                    trace!("stitched pair dropped by convert");
                }
                true
            }
            _ => false,
        }
    }

    /// Called after a request is inserted.
    ///
    /// Responses older than the oldest pending request belong to calls this cache never saw and
    /// are discarded, then the oldest request is paired with the oldest remaining response.
    /// Returns whether a pair was handed to `convert`.
    pub fn try_stitch_by_request<F>(&mut self, convert: F) -> bool
    where
        F: FnOnce(&Slot<Req>, &Slot<Resp>) -> bool,
    {
        let req_time = match self.front_request_time() {
            Some(t) => t,
            None => return false,
        };
        while let Some(resp_time) = self.front_response_time() {
            if resp_time >= req_time {
                break;
            }
            self.pop_response();
            self.stats.discarded += 1;
        }
        if self.responses_len() == 0 {
            return false;
        }
        self.stitch_front(convert)
    }

    /// Called after a response is inserted.
    pub fn try_stitch_by_response<F>(&mut self, convert: F) -> bool
    where
        F: FnOnce(&Slot<Req>, &Slot<Resp>) -> bool,
    {
        let (req_time, resp_time) = match (self.front_request_time(), self.front_response_time()) {
            (Some(req), Some(resp)) => (req, resp),
            _ => return false,
        };
        match self.policy {
            StitchPolicy::Fifo => {
                if resp_time < req_time {
                    self.pop_response();
                    self.stats.discarded += 1;
                    return false;
                }
            }
            StitchPolicy::Closest => {
                // newest request not later than the response, ties keep the later insertion
                let mut matched = None;
                for i in self.head_request..=self.tail_request {
                    match self.requests[Self::index(i)].as_ref() {
                        Some(s) if s.time_ns <= resp_time => matched = Some(i),
                        _ => (),
                    }
                }
                match matched {
                    Some(i) => {
                        while self.head_request < i {
                            self.pop_request();
                            self.stats.evicted += 1;
                        }
                    }
                    None => {
                        self.pop_response();
                        self.stats.discarded += 1;
                        return false;
                    }
                }
            }
        }
        self.stitch_front(convert)
    }

    /// Drops every pending entry older than `expire_ns`, returns whether both rings are empty.
    pub fn garbage_collection(&mut self, expire_ns: u64) -> bool {
        while let Some(t) = self.front_request_time() {
            if t >= expire_ns {
                break;
            }
            self.pop_request();
            self.stats.expired += 1;
        }
        while let Some(t) = self.front_response_time() {
            if t >= expire_ns {
                break;
            }
            self.pop_response();
            self.stats.expired += 1;
        }
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestCache = StitchingCache<u32, u32, 4>;

    #[derive(Debug, Default, PartialEq)]
    struct Meta {
        head_request: i64,
        tail_request: i64,
        head_response: i64,
        tail_response: i64,
    }

    fn meta(cache: &TestCache) -> Meta {
        Meta {
            head_request: cache.head_request(),
            tail_request: cache.tail_request(),
            head_response: cache.head_response(),
            tail_response: cache.tail_response(),
        }
    }

    #[test]
    fn continuous_requests() {
        let mut cache = TestCache::default();
        for i in 0..16i64 {
            cache.insert_request(Slot::new(i as u32, 1000 + i as u64, 0));
            assert!(!cache.try_stitch_by_request(|_, _| true));
            let head = if i < 4 { 0 } else { i - 3 };
            assert_eq!(
                meta(&cache),
                Meta {
                    head_request: head,
                    tail_request: head + i.min(3),
                    head_response: 0,
                    tail_response: -1,
                }
            );
            assert_eq!(cache.requests_len(), (i.min(3) + 1) as usize);
        }
        assert_eq!(cache.stats().evicted, 12);
    }

    #[test]
    fn continuous_responses() {
        let mut cache = TestCache::default();
        for i in 0..16i64 {
            cache.insert_response(Slot::new(i as u32, 1000 + i as u64, 0));
            assert!(!cache.try_stitch_by_response(|_, _| true));
            let head = if i < 4 { 0 } else { i - 3 };
            assert_eq!(cache.head_response(), head);
            assert_eq!(cache.tail_response(), head + i.min(3));
        }
    }

    #[test]
    fn one_by_one_request_first() {
        let mut cache = TestCache::default();
        let mut count = 0;
        for i in 0..16i64 {
            cache.insert_request(Slot::new(i as u32, 1000 + 10 * i as u64, 0));
            cache.insert_response(Slot::new(i as u32, 1005 + 10 * i as u64, 0));
            assert_eq!(
                meta(&cache),
                Meta {
                    head_request: i,
                    tail_request: i,
                    head_response: i,
                    tail_response: i,
                }
            );
            assert!(cache.try_stitch_by_response(|req, resp| {
                assert_eq!(req.value, resp.value);
                count += 1;
                false
            }));
            assert_eq!(
                meta(&cache),
                Meta {
                    head_request: i + 1,
                    tail_request: i,
                    head_response: i + 1,
                    tail_response: i,
                }
            );
            assert_eq!(count, i + 1);
        }
    }

    #[test]
    fn one_by_one_response_first() {
        let mut cache = TestCache::default();
        let mut count = 0;
        for i in 0..16i64 {
            cache.insert_response(Slot::new(i as u32, 1005 + 10 * i as u64, 0));
            cache.insert_request(Slot::new(i as u32, 1000 + 10 * i as u64, 0));
            assert!(cache.try_stitch_by_request(|_, _| {
                count += 1;
                true
            }));
            assert!(cache.is_empty());
            assert_eq!(cache.head_request(), i + 1);
            assert_eq!(cache.head_response(), i + 1);
            assert_eq!(count, i + 1);
        }
    }

    #[test]
    fn old_response_is_discarded() {
        let mut cache = TestCache::default();
        let time = 1_000_000;
        cache.insert_request(Slot::new(0, time, 0));
        for i in 0..16i64 {
            cache.insert_response(Slot::new(0, time - 2, 0));
            assert!(!cache.try_stitch_by_response(|_, _| panic!("must not stitch")));
            assert_eq!(
                meta(&cache),
                Meta {
                    head_request: 0,
                    tail_request: 0,
                    head_response: i + 1,
                    tail_response: i,
                }
            );
            assert_eq!(cache.requests_len(), 1);
            assert_eq!(cache.responses_len(), 0);
        }
        assert_eq!(cache.stats().discarded, 16);
    }

    #[test]
    fn new_request_discards_older_responses() {
        let mut cache = TestCache::default();
        let time = 1_000_000;
        cache.insert_response(Slot::new(0, time - 3, 0));
        cache.insert_response(Slot::new(1, time - 2, 0));
        cache.insert_request(Slot::new(0, time, 0));
        assert!(!cache.try_stitch_by_request(|_, _| panic!("must not stitch")));
        assert_eq!(cache.requests_len(), 1);
        assert_eq!(cache.responses_len(), 0);
        assert_eq!(
            meta(&cache),
            Meta {
                head_request: 0,
                tail_request: 0,
                head_response: 2,
                tail_response: 1,
            }
        );
    }

    #[test]
    fn fifo_pairs_oldest_request() {
        let mut cache = TestCache::default();
        for i in 0..4u32 {
            cache.insert_request(Slot::new(i, 100 + i as u64, 0));
        }
        cache.insert_response(Slot::new(0, 200, 0));
        let mut paired = None;
        assert!(cache.try_stitch_by_response(|req, _| {
            paired = Some(req.value);
            true
        }));
        assert_eq!(paired, Some(0));
        assert_eq!(cache.requests_len(), 3);
    }

    #[test]
    fn closest_pairs_newest_earlier_request() {
        let mut cache = TestCache::new(StitchPolicy::Closest);
        let time = 1_000_000;
        cache.insert_request(Slot::new(0, time - 3, 0));
        cache.insert_request(Slot::new(1, time - 2, 0));
        cache.insert_request(Slot::new(2, time + 1, 0));
        cache.insert_response(Slot::new(0, time, 0));
        let mut count = 0;
        assert!(cache.try_stitch_by_response(|req, resp| {
            assert_eq!(resp.time_ns - req.time_ns, 2);
            count += 1;
            true
        }));
        assert_eq!(count, 1);
        assert_eq!(cache.requests_len(), 1);
        assert_eq!(cache.responses_len(), 0);
        assert_eq!(cache.stats().evicted, 1);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let mut cache = TestCache::default();
        cache.insert_request(Slot::new(1, 100, 0));
        cache.insert_request(Slot::new(2, 100, 0));
        cache.insert_response(Slot::new(10, 100, 0));
        cache.insert_response(Slot::new(20, 100, 0));
        let mut pairs = vec![];
        while cache.try_stitch_by_response(|req, resp| {
            pairs.push((req.value, resp.value));
            true
        }) {}
        assert_eq!(pairs, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn garbage_collection() {
        let mut cache = TestCache::default();
        cache.insert_request(Slot::new(0, 10, 0));
        cache.insert_request(Slot::new(1, 30, 0));
        cache.insert_response(Slot::new(0, 5, 0));
        assert!(!cache.garbage_collection(20));
        assert_eq!(cache.requests_len(), 1);
        assert_eq!(cache.responses_len(), 0);
        assert!(!cache.garbage_collection(20));
        assert!(cache.garbage_collection(31));
        assert_eq!(cache.stats().expired, 3);
    }
}
