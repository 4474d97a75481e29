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

use std::time::Instant;

use criterion::*;

use l7_observer::flow_generator::{
    perf::STITCHING_CACHE_CAPACITY, IdStitchingCache, Slot, StitchPolicy, StitchingCache,
};

fn bench_ring(c: &mut Criterion, name: &str, policy: StitchPolicy) {
    c.bench_function(name, |b| {
        b.iter_custom(|iters| {
            let mut cache =
                StitchingCache::<u64, u64, STITCHING_CACHE_CAPACITY>::new(policy);
            let mut stitched = 0u64;
            let start = Instant::now();
            for i in 0..iters {
                let t = i * 10;
                cache.insert_request(Slot::new(i, t, 64));
                cache.try_stitch_by_request(|_, _| true);
                cache.insert_response(Slot::new(i, t + 5, 64));
                if cache.try_stitch_by_response(|_, _| true) {
                    stitched += 1;
                }
            }
            let elapsed = start.elapsed();
            black_box(stitched);
            elapsed
        })
    });
}

pub(super) fn bench(c: &mut Criterion) {
    bench_ring(c, "stitching_cache_fifo", StitchPolicy::Fifo);
    bench_ring(c, "stitching_cache_closest", StitchPolicy::Closest);
    c.bench_function("id_stitching_cache_out_of_order", |b| {
        b.iter_custom(|iters| {
            let mut cache = IdStitchingCache::<u64, u64>::new(1024);
            let start = Instant::now();
            for i in 0..iters {
                // responses arrive before their requests every other call
                if i % 2 == 0 {
                    cache.insert_response(i, Slot::new(i, i * 10 + 5, 64), |_, _| true);
                    cache.insert_request(i, Slot::new(i, i * 10, 64), |_, _| true);
                } else {
                    cache.insert_request(i, Slot::new(i, i * 10, 64), |_, _| true);
                    cache.insert_response(i, Slot::new(i, i * 10 + 5, 64), |_, _| true);
                }
            }
            start.elapsed()
        })
    });
}
