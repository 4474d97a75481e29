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

use std::mem;

use enum_dispatch::enum_dispatch;
use log::debug;

use public::l7_protocol::L7Protocol;

use super::{
    aggregator::{ConnKey, EventInfo},
    error::Error,
    perf::{IdStitchingCache, Slot, StitchPolicy, StitchStats, StitchingCache, STITCHING_CACHE_CAPACITY},
    protocol_logs::{
        DnsLog, DubboLog, HttpLog, KafkaLog, L7ProtocolEvent, MysqlLog, PostgresqlLog,
        ProtocolEventAggregators, RedisLog,
    },
};
use crate::common::{
    l7_protocol_log::{
        ControlKind, L7ParseResult, L7ProtocolInfoInterface, L7ProtocolParserInterface, ParseParam,
    },
    packet_event::{PacketEventData, PacketType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub stitch_policy: StitchPolicy,
    // per direction, reaching it decodes the buffered bytes as truncated
    pub max_buffer_size: usize,
    pub max_id_cache_size: usize,
}

/// What became of one data event.
#[derive(Debug, Clone, PartialEq)]
pub enum DataOutcome {
    Request { stitched: bool },
    Response { stitched: bool },
    Control(ControlKind),
    Buffered,
    Malformed(Error),
}

enum Stitcher<Req, Resp> {
    Ring(StitchingCache<Req, Resp, STITCHING_CACHE_CAPACITY>),
    Id(IdStitchingCache<Req, Resp>),
}

impl<Req: L7ProtocolInfoInterface, Resp: L7ProtocolInfoInterface> Stitcher<Req, Resp> {
    fn request<F>(&mut self, slot: Slot<Req>, convert: F) -> bool
    where
        F: FnOnce(&Slot<Req>, &Slot<Resp>) -> bool,
    {
        match self {
            Stitcher::Ring(c) => {
                c.insert_request(slot);
                c.try_stitch_by_request(convert)
            }
            Stitcher::Id(c) => {
                let id = slot.value.session_id().unwrap_or_default();
                let stitched = c.stats().stitched;
                c.insert_request(id, slot, convert);
                c.stats().stitched > stitched
            }
        }
    }

    fn response<F>(&mut self, slot: Slot<Resp>, convert: F) -> bool
    where
        F: FnOnce(&Slot<Req>, &Slot<Resp>) -> bool,
    {
        match self {
            Stitcher::Ring(c) => {
                c.insert_response(slot);
                c.try_stitch_by_response(convert)
            }
            Stitcher::Id(c) => {
                let id = slot.value.session_id().unwrap_or_default();
                let stitched = c.stats().stitched;
                c.insert_response(id, slot, convert);
                c.stats().stitched > stitched
            }
        }
    }

    fn garbage_collection(&mut self, expire_ns: u64) -> bool {
        match self {
            Stitcher::Ring(c) => c.garbage_collection(expire_ns),
            Stitcher::Id(c) => c.garbage_collection(expire_ns),
        }
    }

    fn cached_size(&self) -> usize {
        match self {
            Stitcher::Ring(c) => c.cached_size(),
            Stitcher::Id(c) => c.cached_size(),
        }
    }

    fn stats(&self) -> StitchStats {
        match self {
            Stitcher::Ring(c) => *c.stats(),
            Stitcher::Id(c) => *c.stats(),
        }
    }
}

// bytes of an incomplete message waiting for the rest
#[derive(Debug, Default)]
struct PendingBuffer {
    data: Vec<u8>,
    // sum of the wire lengths of the buffered packets
    wire_len: u32,
    first_time_ns: u64,
}

/// One decoder and one stitching cache of a connection.
pub struct ProtocolSession<P: L7ProtocolEvent> {
    parser: P,
    stitcher: Stitcher<P::Request, P::Response>,
    pending: [PendingBuffer; 2],
    max_buffer_size: usize,
}

impl<P: L7ProtocolEvent> ProtocolSession<P> {
    pub fn new(config: &SessionConfig) -> Self {
        let stitcher = if P::STITCH_BY_ID {
            Stitcher::Id(IdStitchingCache::new(config.max_id_cache_size))
        } else {
            Stitcher::Ring(StitchingCache::new(config.stitch_policy))
        };
        Self {
            parser: P::default(),
            stitcher,
            pending: Default::default(),
            max_buffer_size: config.max_buffer_size,
        }
    }

    fn direction(pkt_type: PacketType) -> usize {
        match pkt_type {
            PacketType::In => 0,
            PacketType::Out => 1,
        }
    }
}

#[enum_dispatch]
pub trait L7SessionInterface {
    /// Decodes one payload, stitches it and hands a completed call to the protocol aggregator.
    fn on_data(
        &mut self,
        conn: &ConnKey,
        data: &PacketEventData,
        param: &ParseParam,
        aggs: &mut ProtocolEventAggregators,
    ) -> DataOutcome;

    /// Drops pending values and buffers older than `expire_ns`, returns whether nothing is left.
    fn garbage_collection(&mut self, expire_ns: u64) -> bool;

    fn cached_size(&self) -> usize;

    fn stitch_stats(&self) -> StitchStats;

    fn protocol(&self) -> L7Protocol;
}

impl<P: L7ProtocolEvent> L7SessionInterface for ProtocolSession<P> {
    fn on_data(
        &mut self,
        conn: &ConnKey,
        data: &PacketEventData,
        param: &ParseParam,
        aggs: &mut ProtocolEventAggregators,
    ) -> DataOutcome {
        let dir = Self::direction(data.pkt_type);
        let mut param = *param;
        let mut pending = mem::take(&mut self.pending[dir]);
        let payload: &[u8] = if pending.data.is_empty() {
            &data.buffer
        } else {
            pending.data.extend_from_slice(&data.buffer);
            &pending.data
        };
        if payload.len() >= self.max_buffer_size {
            param.truncated = true;
        }
        let wire_len = pending.wire_len.saturating_add(data.real_len());
        let first_time_ns = if pending.data.is_empty() {
            param.time
        } else {
            pending.first_time_ns
        };

        match self.parser.decode(payload, &param) {
            L7ParseResult::Incomplete if !param.truncated => {
                if pending.data.is_empty() {
                    pending.data.extend_from_slice(&data.buffer);
                }
                pending.wire_len = wire_len;
                pending.first_time_ns = first_time_ns;
                self.pending[dir] = pending;
                DataOutcome::Buffered
            }
            L7ParseResult::Incomplete => DataOutcome::Malformed(Error::NeedMoreData),
            L7ParseResult::Malformed(e) => {
                debug!(
                    "{} parse failed on {:?}: {}",
                    self.parser.protocol(),
                    conn,
                    e
                );
                DataOutcome::Malformed(e)
            }
            L7ParseResult::Control(c) => DataOutcome::Control(c),
            L7ParseResult::Request(req) => {
                let slot = Slot::new(req, first_time_ns, wire_len);
                let stitched = self
                    .stitcher
                    .request(slot, |req, resp| convert::<P>(aggs, conn, req, resp));
                DataOutcome::Request { stitched }
            }
            L7ParseResult::Response(resp) => {
                let slot = Slot::new(resp, param.time, wire_len);
                let stitched = self
                    .stitcher
                    .response(slot, |req, resp| convert::<P>(aggs, conn, req, resp));
                DataOutcome::Response { stitched }
            }
        }
    }

    fn garbage_collection(&mut self, expire_ns: u64) -> bool {
        for p in self.pending.iter_mut() {
            if !p.data.is_empty() && p.first_time_ns < expire_ns {
                *p = PendingBuffer::default();
            }
        }
        self.stitcher.garbage_collection(expire_ns) && self.pending.iter().all(|p| p.data.is_empty())
    }

    fn cached_size(&self) -> usize {
        self.stitcher.cached_size()
    }

    fn stitch_stats(&self) -> StitchStats {
        self.stitcher.stats()
    }

    fn protocol(&self) -> L7Protocol {
        self.parser.protocol()
    }
}

fn convert<P: L7ProtocolEvent>(
    aggs: &mut ProtocolEventAggregators,
    conn: &ConnKey,
    req: &Slot<P::Request>,
    resp: &Slot<P::Response>,
) -> bool {
    match P::event_key(req, resp) {
        Some(key) => P::aggregator(aggs).add_event(conn, key, &EventInfo::new(req, resp)),
        None => false,
    }
}

#[enum_dispatch(L7SessionInterface)]
pub enum L7Session {
    Http(ProtocolSession<HttpLog>),
    Mysql(ProtocolSession<MysqlLog>),
    Postgresql(ProtocolSession<PostgresqlLog>),
    Redis(ProtocolSession<RedisLog>),
    Kafka(ProtocolSession<KafkaLog>),
    Dns(ProtocolSession<DnsLog>),
    Dubbo(ProtocolSession<DubboLog>),
}

impl L7Session {
    pub fn new(protocol: L7Protocol, config: &SessionConfig) -> Option<Self> {
        let session = match protocol {
            L7Protocol::Http1 => ProtocolSession::<HttpLog>::new(config).into(),
            L7Protocol::MySQL => ProtocolSession::<MysqlLog>::new(config).into(),
            L7Protocol::PostgreSQL => ProtocolSession::<PostgresqlLog>::new(config).into(),
            L7Protocol::Redis => ProtocolSession::<RedisLog>::new(config).into(),
            L7Protocol::Kafka => ProtocolSession::<KafkaLog>::new(config).into(),
            L7Protocol::DNS => ProtocolSession::<DnsLog>::new(config).into(),
            L7Protocol::Dubbo => ProtocolSession::<DubboLog>::new(config).into(),
            L7Protocol::Unknown => return None,
        };
        Some(session)
    }
}
