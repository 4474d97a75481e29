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

pub mod consts;
pub(crate) mod dns;
pub(crate) mod http;
mod infer;
pub(crate) mod mq;
pub(crate) mod rpc;
pub(crate) mod sql;

pub use self::http::{
    check_http_method, get_http_request_version, get_http_resp_info, is_http_v1_payload,
    HttpLog, HttpRequest, HttpResponse,
};
pub use dns::{DnsKey, DnsLog, DnsRequest, DnsResponse};
pub use infer::infer_protocol;
pub use mq::{KafkaApiKey, KafkaLog, KafkaRequest, KafkaResponse};
pub use rpc::{DubboHeader, DubboLog, DubboRequest, DubboResponse};
pub use sql::{
    MysqlLog, MysqlRequest, MysqlResponse, PostgreRequest, PostgreResponse, PostgresqlLog,
    RedisLog, RedisRequest, RedisResponse, SqlKey,
};

use public::l7_protocol::L7Protocol;

use super::aggregator::{EventKey, L7Record, ProtocolAggregator};
use super::perf::Slot;
use crate::common::l7_protocol_log::L7ProtocolParserInterface;
use crate::config::AggregatorConfig;

/// Key of request/response protocols reporting a domain, a resource and a code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct L7RequestKey {
    pub version: String,
    pub req_domain: String,
    pub req_type: String,
    pub req_resource: String,
    pub resp_code: i32,
}

impl EventKey for L7RequestKey {
    fn fill_record(&self, record: &mut L7Record) {
        record.push("version", &self.version);
        record.push("req_domain", &self.req_domain);
        record.push("req_type", &self.req_type);
        record.push("req_resource", &self.req_resource);
        record.push("resp_code", self.resp_code);
    }
}

/// Turns a stitched request/response pair of one protocol into an aggregation key.
pub trait L7ProtocolEvent: L7ProtocolParserInterface + Default + Send {
    type Key: EventKey;

    // pair by session id instead of arrival order
    const STITCH_BY_ID: bool = false;

    /// None when the pair must not be reported.
    fn event_key(req: &Slot<Self::Request>, resp: &Slot<Self::Response>) -> Option<Self::Key>;

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<Self::Key>;
}

/// One aggregator per supported protocol.
pub struct ProtocolEventAggregators {
    pub http: ProtocolAggregator<L7RequestKey>,
    pub mysql: ProtocolAggregator<SqlKey>,
    pub postgresql: ProtocolAggregator<SqlKey>,
    pub redis: ProtocolAggregator<SqlKey>,
    pub kafka: ProtocolAggregator<L7RequestKey>,
    pub dns: ProtocolAggregator<DnsKey>,
    pub dubbo: ProtocolAggregator<L7RequestKey>,
}

impl ProtocolEventAggregators {
    pub fn new(config: &AggregatorConfig) -> Self {
        let (c, s) = (config.client_max_size, config.server_max_size);
        Self {
            http: ProtocolAggregator::new(L7Protocol::Http1, c, s),
            mysql: ProtocolAggregator::new(L7Protocol::MySQL, c, s),
            postgresql: ProtocolAggregator::new(L7Protocol::PostgreSQL, c, s),
            redis: ProtocolAggregator::new(L7Protocol::Redis, c, s),
            kafka: ProtocolAggregator::new(L7Protocol::Kafka, c, s),
            dns: ProtocolAggregator::new(L7Protocol::DNS, c, s),
            dubbo: ProtocolAggregator::new(L7Protocol::Dubbo, c, s),
        }
    }

    /// Drains every aggregator into `out`, returns the number of records written.
    pub fn flush(&mut self, out: &mut Vec<L7Record>, tags: &[(String, String)]) -> usize {
        let before = out.len();
        self.http.flush(out, tags);
        self.mysql.flush(out, tags);
        self.postgresql.flush(out, tags);
        self.redis.flush(out, tags);
        self.kafka.flush(out, tags);
        self.dns.flush(out, tags);
        self.dubbo.flush(out, tags);
        out.len() - before
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_empty()
            && self.mysql.is_empty()
            && self.postgresql.is_empty()
            && self.redis.is_empty()
            && self.kafka.is_empty()
            && self.dns.is_empty()
            && self.dubbo.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.http.dropped()
            + self.mysql.dropped()
            + self.postgresql.dropped()
            + self.redis.dropped()
            + self.kafka.dropped()
            + self.dns.dropped()
            + self.dubbo.dropped()
    }
}

// the first whitespace separated word, used as the reported query of sql like protocols
pub(crate) fn first_word(s: &str) -> &str {
    s.trim_start().split_ascii_whitespace().next().unwrap_or_default()
}
