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
    fmt,
    hash::Hash,
    net::IpAddr,
    time::{Duration, Instant},
};

use ahash::AHashMap;
use log::{debug, error};
use serde::{ser::SerializeMap, Serialize, Serializer};

use public::l7_protocol::L7Protocol;

use super::perf::Slot;
use crate::common::packet_event::{PacketEventHeader, PacketRole};

const FULL_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Output record, an ordered list of string fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct L7Record {
    fields: Vec<(String, String)>,
}

impl L7Record {
    pub fn push<K: Into<String>, V: ToString>(&mut self, key: K, value: V) {
        self.fields.push((key.into(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for L7Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in self.fields.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Who talks to whom, shared by every event of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub role: PacketRole,
    pub remote_ip: IpAddr,
    // zero on the server side, client ports are ephemeral
    pub remote_port: u16,
    pub pid: u32,
}

impl ConnKey {
    pub fn new(header: &PacketEventHeader) -> Self {
        Self {
            role: header.role,
            remote_ip: header.dst_addr,
            remote_port: if header.role == PacketRole::Server {
                0
            } else {
                header.dst_port
            },
            pid: header.pid,
        }
    }

    fn fill_record(&self, record: &mut L7Record) {
        record.push("pid", self.pid);
        record.push("role", self.role);
        record.push("remote_ip", self.remote_ip);
        record.push("remote_port", self.remote_port);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventInfo {
    pub latency_ns: u64,
    pub req_bytes: u64,
    pub resp_bytes: u64,
}

impl EventInfo {
    pub fn new<Req, Resp>(req: &Slot<Req>, resp: &Slot<Resp>) -> Self {
        Self {
            latency_ns: resp.time_ns.saturating_sub(req.time_ns),
            req_bytes: req.size as u64,
            resp_bytes: resp.size as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggResult {
    pub count: u64,
    pub latency_ns: u64,
    pub req_bytes: u64,
    pub resp_bytes: u64,
}

impl AggResult {
    pub fn add_event_info(&mut self, info: &EventInfo) {
        self.count += 1;
        self.latency_ns += info.latency_ns;
        self.req_bytes += info.req_bytes;
        self.resp_bytes += info.resp_bytes;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn fill_record(&self, record: &mut L7Record) {
        record.push("count", self.count);
        record.push("latency_ns", self.latency_ns);
        record.push("req_bytes", self.req_bytes);
        record.push("resp_bytes", self.resp_bytes);
    }
}

/// Protocol specific part of an aggregation key.
pub trait EventKey: Hash + Eq + Clone + fmt::Debug {
    fn fill_record(&self, record: &mut L7Record);
}

/// Accumulates stitched calls of one protocol by connection and protocol key.
pub struct ProtocolAggregator<K> {
    protocol: L7Protocol,
    items: AHashMap<(ConnKey, K), AggResult>,
    client_max_size: usize,
    server_max_size: usize,
    dropped: u64,
    last_full_log: Option<Instant>,
}

impl<K: EventKey> ProtocolAggregator<K> {
    pub fn new(protocol: L7Protocol, client_max_size: usize, server_max_size: usize) -> Self {
        Self {
            protocol,
            items: AHashMap::new(),
            client_max_size,
            server_max_size,
            dropped: 0,
            last_full_log: None,
        }
    }

    pub fn protocol(&self) -> L7Protocol {
        self.protocol
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn get(&self, conn: &ConnKey, key: &K) -> Option<&AggResult> {
        // the map key is a tuple, clones are cheap compared to a lookup miss
        self.items.get(&(conn.clone(), key.clone()))
    }

    /// Returns false when the aggregator is full and the event is dropped.
    pub fn add_event(&mut self, conn: &ConnKey, key: K, info: &EventInfo) -> bool {
        let map_key = (conn.clone(), key);
        if let Some(result) = self.items.get_mut(&map_key) {
            result.add_event_info(info);
            return true;
        }
        let max_size = match conn.role {
            PacketRole::Client => self.client_max_size,
            _ => self.server_max_size,
        };
        if self.items.len() >= max_size {
            self.dropped += 1;
            debug!(
                "{} aggregator is full, the event would be dropped, key: {:?} info: {:?}",
                self.protocol, map_key, info
            );
            let now = Instant::now();
            if self
                .last_full_log
                .map(|last| now.duration_since(last) > FULL_LOG_INTERVAL)
                .unwrap_or(true)
            {
                self.last_full_log = Some(now);
                error!(
                    "{} aggregator is full, some events would be dropped",
                    self.protocol
                );
            }
            return false;
        }
        let mut result = AggResult::default();
        result.add_event_info(info);
        self.items.insert(map_key, result);
        true
    }

    /// Emits every non-empty item and resets it. Items already empty since the last flush are
    /// released.
    pub fn flush(&mut self, out: &mut Vec<L7Record>, tags: &[(String, String)]) -> usize {
        self.items.retain(|_, result| !result.is_empty());
        for ((conn, key), result) in self.items.iter_mut() {
            let mut record = L7Record::default();
            for (k, v) in tags {
                record.push(k.as_str(), v);
            }
            record.push("protocol", self.protocol);
            conn.fill_record(&mut record);
            key.fill_record(&mut record);
            result.fill_record(&mut record);
            result.clear();
            out.push(record);
        }
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct TestKey(&'static str);

    impl EventKey for TestKey {
        fn fill_record(&self, record: &mut L7Record) {
            record.push("req_resource", self.0);
        }
    }

    fn conn(role: PacketRole, port: u16) -> ConnKey {
        ConnKey {
            role,
            remote_ip: "10.1.1.1".parse().unwrap(),
            remote_port: port,
            pid: 42,
        }
    }

    fn info(latency_ns: u64) -> EventInfo {
        EventInfo {
            latency_ns,
            req_bytes: 10,
            resp_bytes: 20,
        }
    }

    #[test]
    fn aggregate_and_flush_once() {
        let mut agg = ProtocolAggregator::new(L7Protocol::DNS, 2, 2);
        let server = conn(PacketRole::Server, 0);
        assert!(agg.add_event(&server, TestKey("a.com"), &info(100)));
        assert!(agg.add_event(&server, TestKey("a.com"), &info(300)));

        let tags = vec![("local_info".to_owned(), "host-1".to_owned())];
        let mut out = vec![];
        assert_eq!(agg.flush(&mut out, &tags), 1);
        assert_eq!(out.len(), 1);
        let record = &out[0];
        assert_eq!(record.fields()[0], ("local_info".into(), "host-1".into()));
        assert_eq!(record.get("protocol"), Some("dns"));
        assert_eq!(record.get("role"), Some("s"));
        assert_eq!(record.get("remote_port"), Some("0"));
        assert_eq!(record.get("req_resource"), Some("a.com"));
        assert_eq!(record.get("count"), Some("2"));
        assert_eq!(record.get("latency_ns"), Some("400"));
        assert_eq!(record.get("req_bytes"), Some("20"));
        assert_eq!(record.get("resp_bytes"), Some("40"));

        out.clear();
        agg.flush(&mut out, &tags);
        assert!(out.is_empty());
        // empty items are released on the flush after they were reported
        assert!(agg.is_empty());
    }

    #[test]
    fn full_aggregator_drops_new_keys() {
        let mut agg = ProtocolAggregator::new(L7Protocol::Http1, 1, 2);
        let client = conn(PacketRole::Client, 80);
        assert!(agg.add_event(&client, TestKey("/a"), &info(1)));
        assert!(!agg.add_event(&client, TestKey("/b"), &info(1)));
        // existing keys still aggregate
        assert!(agg.add_event(&client, TestKey("/a"), &info(1)));
        let server = conn(PacketRole::Server, 0);
        assert!(agg.add_event(&server, TestKey("/b"), &info(1)));
        assert!(!agg.add_event(&server, TestKey("/c"), &info(1)));
        assert_eq!(agg.dropped(), 2);
        assert_eq!(agg.get(&client, &TestKey("/a")).map(|r| r.count), Some(2));
    }

    #[test]
    fn record_serializes_as_map() {
        let mut record = L7Record::default();
        record.push("protocol", "mysql");
        record.push("count", 3);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"protocol":"mysql","count":"3"}"#
        );
    }
}
