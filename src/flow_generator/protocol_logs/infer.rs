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

use public::{bytes::ByteCursor, l7_protocol::L7Protocol};

use super::{
    consts::*, DnsLog, DubboLog, HttpLog, KafkaLog, MysqlLog, PostgresqlLog, RedisLog,
};
use crate::common::l7_protocol_log::{L7ProtocolParserInterface, ParseParam};

const DNS_MAX_QUESTIONS: u16 = 10;
const DNS_MAX_RECORDS: u16 = 25;

const WELL_KNOWN_PORTS: [(u16, L7Protocol); 7] = [
    (HTTP_PORT, L7Protocol::Http1),
    (DNS_PORT, L7Protocol::DNS),
    (MYSQL_PORT, L7Protocol::MySQL),
    (POSTGRESQL_PORT, L7Protocol::PostgreSQL),
    (REDIS_PORT, L7Protocol::Redis),
    (KAFKA_PORT, L7Protocol::Kafka),
    (DUBBO_PORT, L7Protocol::Dubbo),
];

// opcode 0, z 0 and small section counts, as sent by ordinary resolvers
fn dns_header_sane(payload: &[u8]) -> bool {
    if payload.len() > DNS_UDP_MAX_SIZE {
        return false;
    }
    let mut cursor = ByteCursor::big_endian(payload);
    let _id = cursor.read_u16(true);
    let flags = cursor.read_u16(true);
    let qd = cursor.read_u16(true);
    let an = cursor.read_u16(true);
    let ns = cursor.read_u16(true);
    let ar = cursor.read_u16(true);
    cursor.ok()
        && (flags >> 11) & 0xf == 0
        && (flags >> 4) & 0x7 == 0
        && (1..=DNS_MAX_QUESTIONS).contains(&qd)
        && an.saturating_add(ns).saturating_add(ar) <= DNS_MAX_RECORDS
}

/// Guesses the protocol of a connection from the first payload seen on it.
///
/// A well-known port on either side decides first, then the payload shape is checked against
/// every decoder, the stricter formats before the looser ones.
pub fn infer_protocol(payload: &[u8], param: &ParseParam) -> L7Protocol {
    if payload.is_empty() {
        return L7Protocol::Unknown;
    }
    if let Some((_, protocol)) = WELL_KNOWN_PORTS
        .iter()
        .find(|(port, _)| *port == param.port_src || *port == param.port_dst)
    {
        return *protocol;
    }

    if HttpLog::default().check_payload(payload, param) {
        return L7Protocol::Http1;
    }
    if DubboLog::default().check_payload(payload, param) {
        return L7Protocol::Dubbo;
    }
    if KafkaLog::default().check_payload(payload, param) {
        return L7Protocol::Kafka;
    }
    if MysqlLog::default().check_payload(payload, param) {
        return L7Protocol::MySQL;
    }
    if RedisLog::default().check_payload(payload, param) {
        return L7Protocol::Redis;
    }
    if PostgresqlLog::default().check_payload(payload, param) {
        return L7Protocol::PostgreSQL;
    }
    if dns_header_sane(payload) && DnsLog::default().check_payload(payload, param) {
        return L7Protocol::DNS;
    }
    L7Protocol::Unknown
}
