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

use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use ahash::AHashMap;
use log::{debug, info, trace};

use public::{
    counter::{Counter, CounterType, CounterValue, RefCountable},
    l7_protocol::L7Protocol,
};

use super::{
    aggregator::{ConnKey, L7Record},
    error::Result,
    perf::StitchStats,
    protocol_logs::{infer_protocol, ProtocolEventAggregators},
    session::{DataOutcome, L7Session, L7SessionInterface, SessionConfig},
};
use crate::{
    common::{
        l7_protocol_log::ParseParam,
        packet_event::{PacketEvent, PacketEventData, PacketEventHeader, PacketEventType},
    },
    config::{ObserverConfig, TimeoutConfig},
};

// a socket is identified by its hash when capture provides one, else by its 4-tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnId {
    sock_hash: u64,
    src_addr: IpAddr,
    src_port: u16,
    dst_addr: IpAddr,
    dst_port: u16,
}

impl ConnId {
    fn new(header: &PacketEventHeader) -> Self {
        Self {
            sock_hash: header.sock_hash,
            src_addr: header.src_addr,
            src_port: header.src_port,
            dst_addr: header.dst_addr,
            dst_port: header.dst_port,
        }
    }
}

struct Connection {
    key: ConnKey,
    session: L7Session,
    last_activity_ns: u64,
    closed: bool,
}

struct Process {
    connections: AHashMap<ConnId, Connection>,
    last_activity_ns: u64,
}

impl Process {
    fn new(now: u64) -> Self {
        Self {
            connections: AHashMap::new(),
            last_activity_ns: now,
        }
    }
}

fn get_or_create_process<'a>(
    processes: &'a mut AHashMap<u32, Process>,
    counter: &FlowMapCounter,
    pid: u32,
    now: u64,
) -> &'a mut Process {
    let process = processes.entry(pid).or_insert_with(|| {
        counter.new_processes.fetch_add(1, Ordering::Relaxed);
        trace!("new process {}", pid);
        Process::new(now)
    });
    process.last_activity_ns = process.last_activity_ns.max(now);
    process
}

#[derive(Clone, Copy, Debug)]
struct TimeoutNs {
    process: u64,
    connection: u64,
    process_no_connection: u64,
    connection_closed: u64,
}

impl From<&TimeoutConfig> for TimeoutNs {
    fn from(t: &TimeoutConfig) -> Self {
        Self {
            process: t.process.as_nanos() as u64,
            connection: t.connection.as_nanos() as u64,
            process_no_connection: t.process_no_connection.as_nanos() as u64,
            connection_closed: t.connection_closed.as_nanos() as u64,
        }
    }
}

/// Engine wide counters, shared with whoever reports them.
#[derive(Default)]
pub struct FlowMapCounter {
    pub events: AtomicU64,
    pub invalid_events: AtomicU64,
    // data without a known or enabled protocol
    pub ignored: AtomicU64,
    pub requests: AtomicU64,
    pub responses: AtomicU64,
    pub controls: AtomicU64,
    pub buffered: AtomicU64,
    pub malformed: AtomicU64,
    pub stitched: AtomicU64,
    pub new_processes: AtomicU64,
    pub new_connections: AtomicU64,
    pub removed_processes: AtomicU64,
    pub removed_connections: AtomicU64,
    // accumulated from the caches of removed connections
    pub evicted: AtomicU64,
    pub discarded: AtomicU64,
    pub expired: AtomicU64,
    pub flushed_records: AtomicU64,
    pub aggregator_dropped: AtomicU64,
    pub concurrent_processes: AtomicU64,
    pub concurrent_connections: AtomicU64,
}

impl FlowMapCounter {
    fn add_stitch_stats(&self, stats: &StitchStats) {
        self.evicted.fetch_add(stats.evicted, Ordering::Relaxed);
        self.discarded.fetch_add(stats.discarded, Ordering::Relaxed);
        self.expired.fetch_add(stats.expired, Ordering::Relaxed);
    }
}

impl RefCountable for FlowMapCounter {
    fn get_counters(&self) -> Vec<Counter> {
        let counted = |name: &'static str, c: &AtomicU64| {
            (
                name,
                CounterType::Counted,
                CounterValue::Unsigned(c.load(Ordering::Relaxed)),
            )
        };
        let gauged = |name: &'static str, c: &AtomicU64| {
            (
                name,
                CounterType::Gauged,
                CounterValue::Unsigned(c.load(Ordering::Relaxed)),
            )
        };
        vec![
            counted("events", &self.events),
            counted("invalid-events", &self.invalid_events),
            counted("ignored", &self.ignored),
            counted("requests", &self.requests),
            counted("responses", &self.responses),
            counted("controls", &self.controls),
            counted("buffered", &self.buffered),
            counted("malformed", &self.malformed),
            counted("stitched", &self.stitched),
            counted("new-processes", &self.new_processes),
            counted("new-connections", &self.new_connections),
            counted("removed-processes", &self.removed_processes),
            counted("removed-connections", &self.removed_connections),
            counted("evicted", &self.evicted),
            counted("discarded", &self.discarded),
            counted("expired", &self.expired),
            counted("flushed-records", &self.flushed_records),
            counted("aggregator-dropped", &self.aggregator_dropped),
            gauged("concurrent-processes", &self.concurrent_processes),
            gauged("concurrent-connections", &self.concurrent_connections),
        ]
    }
}

/// Live connections and cached entries of one protocol, refreshed by garbage collection.
pub struct ProtocolDebugStatistic {
    protocol: L7Protocol,
    connections: AtomicU64,
    cached_size: AtomicU64,
}

impl ProtocolDebugStatistic {
    fn new(protocol: L7Protocol) -> Self {
        Self {
            protocol,
            connections: AtomicU64::new(0),
            cached_size: AtomicU64::new(0),
        }
    }

    pub fn protocol(&self) -> L7Protocol {
        self.protocol
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn cached_size(&self) -> u64 {
        self.cached_size.load(Ordering::Relaxed)
    }
}

impl RefCountable for ProtocolDebugStatistic {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "connections",
                CounterType::Gauged,
                CounterValue::Unsigned(self.connections()),
            ),
            (
                "cached-size",
                CounterType::Gauged,
                CounterValue::Unsigned(self.cached_size()),
            ),
        ]
    }
}

/// Registry of processes and their connections, owning every decoder, stitching cache and
/// aggregator of the engine.
pub struct FlowMap {
    processes: AHashMap<u32, Process>,
    aggregators: ProtocolEventAggregators,

    session_config: SessionConfig,
    timeout: TimeoutNs,
    enabled_protocols: Vec<L7Protocol>,
    tags: Vec<(String, String)>,

    stats_counter: Arc<FlowMapCounter>,
    protocol_stats: Option<Vec<Arc<ProtocolDebugStatistic>>>,
}

impl FlowMap {
    pub fn new(config: &ObserverConfig) -> Self {
        let protocol_stats = if config.protocol_stat {
            Some(
                L7Protocol::SUPPORTED
                    .iter()
                    .map(|p| Arc::new(ProtocolDebugStatistic::new(*p)))
                    .collect(),
            )
        } else {
            None
        };
        Self {
            processes: AHashMap::new(),
            aggregators: ProtocolEventAggregators::new(&config.aggregator),
            session_config: SessionConfig {
                stitch_policy: config.stitch_policy,
                max_buffer_size: config.max_buffer_size,
                max_id_cache_size: config.max_id_cache_size,
            },
            timeout: (&config.timeout).into(),
            enabled_protocols: config.enabled_protocols.clone(),
            tags: config.tags(),
            stats_counter: Arc::new(FlowMapCounter::default()),
            protocol_stats,
        }
    }

    pub fn counter(&self) -> Arc<FlowMapCounter> {
        self.stats_counter.clone()
    }

    /// Empty unless `protocol-stat` is enabled.
    pub fn protocol_stats(&self) -> Vec<Arc<ProtocolDebugStatistic>> {
        self.protocol_stats.clone().unwrap_or_default()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.processes.values().map(|p| p.connections.len()).sum()
    }

    /// Decodes a raw event as delivered by the capture layer.
    pub fn on_raw_event(&mut self, raw: &[u8]) -> Result<()> {
        let event = PacketEvent::decode(raw).map_err(|e| {
            self.stats_counter
                .invalid_events
                .fetch_add(1, Ordering::Relaxed);
            e
        })?;
        self.on_packet_event(&event.header, event.data.as_ref());
        Ok(())
    }

    pub fn on_packet_event(&mut self, header: &PacketEventHeader, data: Option<&PacketEventData>) {
        self.stats_counter.events.fetch_add(1, Ordering::Relaxed);
        let now = header.time_nano;
        match header.event_type {
            PacketEventType::None => {
                self.stats_counter.ignored.fetch_add(1, Ordering::Relaxed);
            }
            PacketEventType::Connected | PacketEventType::Accepted => {
                get_or_create_process(&mut self.processes, &self.stats_counter, header.pid, now);
            }
            PacketEventType::Closed => {
                let process =
                    get_or_create_process(&mut self.processes, &self.stats_counter, header.pid, now);
                if let Some(conn) = process.connections.get_mut(&ConnId::new(header)) {
                    conn.closed = true;
                    conn.last_activity_ns = conn.last_activity_ns.max(now);
                }
            }
            PacketEventType::Data => match data {
                Some(data) => self.on_data(header, data),
                None => {
                    self.stats_counter
                        .invalid_events
                        .fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }

    fn resolve_protocol(
        &self,
        data: &PacketEventData,
        param: &ParseParam,
    ) -> Option<L7Protocol> {
        let protocol = match data.protocol {
            L7Protocol::Unknown => infer_protocol(&data.buffer, param),
            p => p,
        };
        if protocol == L7Protocol::Unknown || !self.enabled_protocols.contains(&protocol) {
            return None;
        }
        Some(protocol)
    }

    fn on_data(&mut self, header: &PacketEventHeader, data: &PacketEventData) {
        let now = header.time_nano;
        let param = ParseParam::new(header, data);
        let conn_id = ConnId::new(header);

        let known = self
            .processes
            .get(&header.pid)
            .and_then(|p| p.connections.get(&conn_id))
            .map(|c| c.session.protocol());
        let protocol = match known {
            Some(p) => p,
            None => match self.resolve_protocol(data, &param) {
                Some(p) => p,
                None => {
                    self.stats_counter.ignored.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            },
        };

        let session_config = self.session_config;
        let counter = self.stats_counter.as_ref();
        let process = get_or_create_process(&mut self.processes, counter, header.pid, now);
        let conn = match process.connections.entry(conn_id) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let Some(session) = L7Session::new(protocol, &session_config) else {
                    counter.ignored.fetch_add(1, Ordering::Relaxed);
                    return;
                };
                counter.new_connections.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "new {} connection of pid {} {}:{} -> {}:{}",
                    protocol,
                    header.pid,
                    header.src_addr,
                    header.src_port,
                    header.dst_addr,
                    header.dst_port
                );
                e.insert(Connection {
                    key: ConnKey::new(header),
                    session,
                    last_activity_ns: now,
                    closed: false,
                })
            }
        };
        conn.last_activity_ns = conn.last_activity_ns.max(now);

        let outcome = conn
            .session
            .on_data(&conn.key, data, &param, &mut self.aggregators);
        match outcome {
            DataOutcome::Request { stitched } => {
                counter.requests.fetch_add(1, Ordering::Relaxed);
                if stitched {
                    counter.stitched.fetch_add(1, Ordering::Relaxed);
                }
            }
            DataOutcome::Response { stitched } => {
                counter.responses.fetch_add(1, Ordering::Relaxed);
                if stitched {
                    counter.stitched.fetch_add(1, Ordering::Relaxed);
                }
            }
            DataOutcome::Control(_) => {
                counter.controls.fetch_add(1, Ordering::Relaxed);
            }
            DataOutcome::Buffered => {
                counter.buffered.fetch_add(1, Ordering::Relaxed);
            }
            DataOutcome::Malformed(_) => {
                counter.malformed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Removes idle connections and processes as of `now`, a timestamp in the clock of the
    /// packet events.
    ///
    /// Calling it again with the same `now` removes nothing more.
    pub fn garbage_collection(&mut self, now: u64) {
        let timeout = self.timeout;
        let counter = &self.stats_counter;
        let mut removed_connections = 0u64;
        let mut removed_processes = 0u64;

        self.processes.retain(|pid, process| {
            process.connections.retain(|_, conn| {
                let idle = now.saturating_sub(conn.last_activity_ns);
                let empty = conn
                    .session
                    .garbage_collection(now.saturating_sub(timeout.connection));
                let remove = idle > timeout.connection
                    || (conn.closed && (empty || idle > timeout.connection_closed));
                if remove {
                    removed_connections += 1;
                    counter.add_stitch_stats(&conn.session.stitch_stats());
                }
                !remove
            });

            let idle = now.saturating_sub(process.last_activity_ns);
            let remove = idle > timeout.process
                || (process.connections.is_empty() && idle > timeout.process_no_connection);
            if remove {
                removed_connections += process.connections.len() as u64;
                for conn in process.connections.values() {
                    counter.add_stitch_stats(&conn.session.stitch_stats());
                }
                removed_processes += 1;
                trace!("process {} removed after {}ns idle", pid, idle);
            }
            !remove
        });

        counter
            .removed_connections
            .fetch_add(removed_connections, Ordering::Relaxed);
        counter
            .removed_processes
            .fetch_add(removed_processes, Ordering::Relaxed);
        counter
            .concurrent_processes
            .store(self.processes.len() as u64, Ordering::Relaxed);
        counter
            .concurrent_connections
            .store(self.connection_count() as u64, Ordering::Relaxed);
        counter
            .aggregator_dropped
            .store(self.aggregators.dropped(), Ordering::Relaxed);
        if removed_connections > 0 || removed_processes > 0 {
            debug!(
                "garbage collection removed {} processes and {} connections, {} processes left",
                removed_processes,
                removed_connections,
                self.processes.len()
            );
        }

        if let Some(stats) = self.protocol_stats.as_ref() {
            let mut connections: AHashMap<L7Protocol, (u64, u64)> = AHashMap::new();
            for conn in self.processes.values().flat_map(|p| p.connections.values()) {
                let entry = connections.entry(conn.session.protocol()).or_default();
                entry.0 += 1;
                entry.1 += conn.session.cached_size() as u64;
            }
            for s in stats.iter() {
                let (n, cached) = connections.get(&s.protocol).copied().unwrap_or_default();
                s.connections.store(n, Ordering::Relaxed);
                s.cached_size.store(cached, Ordering::Relaxed);
            }
        }
    }

    /// Drains every aggregated result into `out`, returns the number of records written.
    ///
    /// Results of processes already removed by garbage collection are included.
    pub fn flush_out_metrics(&mut self, out: &mut Vec<L7Record>) -> usize {
        let n = self.aggregators.flush(out, &self.tags);
        self.stats_counter
            .flushed_records
            .fetch_add(n as u64, Ordering::Relaxed);
        if n > 0 {
            info!("flushed {} l7 records", n);
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    use crate::common::packet_event::{MessageType, PacketRole, PacketType};

    const SEC: u64 = 1_000_000_000;

    fn header(event_type: PacketEventType, time_nano: u64) -> PacketEventHeader {
        PacketEventHeader {
            pid: 42,
            event_type,
            time_nano,
            sock_hash: 7,
            src_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_port: 40000,
            dst_port: 6379,
            role: PacketRole::Client,
        }
    }

    fn redis(pkt_type: PacketType, msg_type: MessageType, buffer: &[u8]) -> PacketEventData {
        PacketEventData {
            pkt_type,
            msg_type,
            protocol: L7Protocol::Redis,
            buffer: buffer.to_vec(),
            real_len: buffer.len() as u32,
        }
    }

    fn config() -> ObserverConfig {
        let mut config = ObserverConfig::default();
        config.timeout.connection = Duration::from_secs(60);
        config.timeout.process = Duration::from_secs(300);
        config.timeout.process_no_connection = Duration::from_secs(30);
        config
    }

    fn call(map: &mut FlowMap, t: u64) {
        map.on_packet_event(
            &header(PacketEventType::Data, t),
            Some(&redis(PacketType::Out, MessageType::Request, b"*1\r\n$4\r\nPING\r\n")),
        );
        map.on_packet_event(
            &header(PacketEventType::Data, t + 100),
            Some(&redis(PacketType::In, MessageType::Response, b"+PONG\r\n")),
        );
    }

    #[test]
    fn data_creates_process_and_connection() {
        let mut map = FlowMap::new(&config());
        call(&mut map, SEC);
        assert_eq!(map.process_count(), 1);
        assert_eq!(map.connection_count(), 1);
        let counter = map.counter();
        assert_eq!(counter.requests.load(Ordering::Relaxed), 1);
        assert_eq!(counter.responses.load(Ordering::Relaxed), 1);
        assert_eq!(counter.stitched.load(Ordering::Relaxed), 1);

        let mut out = vec![];
        assert_eq!(map.flush_out_metrics(&mut out), 1);
        let record = &out[0];
        assert_eq!(record.get("protocol"), Some("redis"));
        assert_eq!(record.get("pid"), Some("42"));
        assert_eq!(record.get("role"), Some("c"));
        assert_eq!(record.get("remote_ip"), Some("10.0.0.2"));
        assert_eq!(record.get("remote_port"), Some("6379"));
        assert_eq!(record.get("query"), Some("PING"));
        assert_eq!(record.get("status"), Some("1"));
        assert_eq!(record.get("count"), Some("1"));
        assert_eq!(record.get("latency_ns"), Some("100"));
    }

    #[test]
    fn control_events() {
        let mut map = FlowMap::new(&config());
        map.on_packet_event(&header(PacketEventType::None, SEC), None);
        assert_eq!(map.process_count(), 0);
        map.on_packet_event(&header(PacketEventType::Connected, SEC), None);
        assert_eq!(map.process_count(), 1);
        assert_eq!(map.connection_count(), 0);
        // data event without data
        map.on_packet_event(&header(PacketEventType::Data, SEC), None);
        assert_eq!(map.counter().invalid_events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn disabled_and_unknown_protocols_are_ignored() {
        let mut config = config();
        config.enabled_protocols = vec![L7Protocol::Http1];
        let mut map = FlowMap::new(&config);
        call(&mut map, SEC);
        assert_eq!(map.connection_count(), 0);
        assert_eq!(map.counter().ignored.load(Ordering::Relaxed), 2);

        let mut map = FlowMap::new(&self::config());
        let mut h = header(PacketEventType::Data, SEC);
        h.dst_port = 1;
        let mut data = redis(PacketType::Out, MessageType::Request, b"\x01\x02\x03");
        data.protocol = L7Protocol::Unknown;
        map.on_packet_event(&h, Some(&data));
        assert_eq!(map.connection_count(), 0);
    }

    #[test]
    fn protocol_is_inferred() {
        let mut map = FlowMap::new(&config());
        let mut h = header(PacketEventType::Data, SEC);
        h.dst_port = 16379;
        let mut data = redis(PacketType::Out, MessageType::Request, b"*1\r\n$4\r\nPING\r\n");
        data.protocol = L7Protocol::Unknown;
        map.on_packet_event(&h, Some(&data));
        assert_eq!(map.connection_count(), 1);
        assert_eq!(map.counter().requests.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn garbage_collection() {
        let mut map = FlowMap::new(&config());
        call(&mut map, SEC);

        // `now` before the last activity reclaims nothing
        map.garbage_collection(0);
        map.garbage_collection(30 * SEC);
        assert_eq!(map.connection_count(), 1);

        // the idle connection goes, then its process left without connections
        map.garbage_collection(62 * SEC);
        assert_eq!(map.connection_count(), 0);
        assert_eq!(map.process_count(), 0);
        let counter = map.counter();
        assert_eq!(counter.removed_connections.load(Ordering::Relaxed), 1);
        assert_eq!(counter.removed_processes.load(Ordering::Relaxed), 1);

        // idempotent
        map.garbage_collection(62 * SEC);
        assert_eq!(counter.removed_connections.load(Ordering::Relaxed), 1);
        assert_eq!(counter.removed_processes.load(Ordering::Relaxed), 1);

        // results of removed processes are still flushed
        let mut out = vec![];
        assert_eq!(map.flush_out_metrics(&mut out), 1);
    }

    #[test]
    fn process_without_connection() {
        let mut map = FlowMap::new(&config());
        map.on_packet_event(&header(PacketEventType::Accepted, SEC), None);
        map.garbage_collection(20 * SEC);
        assert_eq!(map.process_count(), 1);
        map.garbage_collection(32 * SEC);
        assert_eq!(map.process_count(), 0);
        assert_eq!(map.counter().concurrent_processes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn process_timeout_removes_connections() {
        let mut config = config();
        config.timeout.connection = Duration::from_secs(60);
        config.timeout.process = Duration::from_secs(60);
        let mut map = FlowMap::new(&config);
        call(&mut map, SEC);
        map.garbage_collection(62 * SEC);
        assert_eq!(map.process_count(), 0);
        assert_eq!(map.counter().removed_connections.load(Ordering::Relaxed), 1);
        assert_eq!(map.counter().removed_processes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn process_timeout_counts_from_last_activity() {
        let mut config = config();
        config.timeout.connection = Duration::from_secs(300);
        config.timeout.process = Duration::from_secs(60);
        let mut map = FlowMap::new(&config);
        call(&mut map, SEC);
        call(&mut map, 50 * SEC);
        // 61s after creation but only 12s after the last event
        map.garbage_collection(62 * SEC);
        assert_eq!(map.process_count(), 1);
        map.garbage_collection(111 * SEC);
        assert_eq!(map.process_count(), 0);
        assert_eq!(map.counter().removed_processes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn closed_connection() {
        let mut map = FlowMap::new(&config());
        map.on_packet_event(
            &header(PacketEventType::Data, SEC),
            Some(&redis(PacketType::Out, MessageType::Request, b"*1\r\n$4\r\nPING\r\n")),
        );
        map.on_packet_event(&header(PacketEventType::Closed, 2 * SEC), None);
        // a request is still pending
        map.garbage_collection(3 * SEC);
        assert_eq!(map.connection_count(), 1);
        map.garbage_collection(8 * SEC);
        assert_eq!(map.connection_count(), 0);

        call(&mut map, 10 * SEC);
        map.on_packet_event(&header(PacketEventType::Closed, 11 * SEC), None);
        map.garbage_collection(11 * SEC);
        assert_eq!(map.connection_count(), 0);
    }

    #[test]
    fn tags_and_protocol_stats() {
        let mut config = config();
        config.protocol_stat = true;
        config.tags.insert("region".to_owned(), "r1".to_owned());
        let mut map = FlowMap::new(&config);
        map.on_packet_event(
            &header(PacketEventType::Data, SEC),
            Some(&redis(PacketType::Out, MessageType::Request, b"*1\r\n$4\r\nPING\r\n")),
        );
        map.garbage_collection(SEC);
        let stats = map.protocol_stats();
        let stat = stats
            .iter()
            .find(|s| s.protocol() == L7Protocol::Redis)
            .unwrap();
        assert_eq!(stat.connections(), 1);
        assert_eq!(stat.cached_size(), 1);

        map.on_packet_event(
            &header(PacketEventType::Data, SEC + 10),
            Some(&redis(PacketType::In, MessageType::Response, b"+PONG\r\n")),
        );
        let mut out = vec![];
        map.flush_out_metrics(&mut out);
        assert_eq!(out[0].fields()[0], ("region".to_owned(), "r1".to_owned()));
        assert!(FlowMap::new(&self::config()).protocol_stats().is_empty());
    }

    #[test]
    fn raw_event() {
        let mut map = FlowMap::new(&config());
        let event = PacketEvent {
            header: header(PacketEventType::Data, SEC),
            data: Some(redis(
                PacketType::Out,
                MessageType::Request,
                b"*1\r\n$4\r\nPING\r\n",
            )),
        };
        map.on_raw_event(&event.encode()).unwrap();
        assert_eq!(map.connection_count(), 1);
        assert!(map.on_raw_event(&[0; 10]).is_err());
        assert_eq!(map.counter().invalid_events.load(Ordering::Relaxed), 1);
    }
}
