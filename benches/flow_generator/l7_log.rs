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

use criterion::*;

use l7_observer::{
    common::l7_protocol_log::{L7ProtocolParserInterface, LogMessageType, ParseParam},
    flow_generator::{DnsLog, HttpLog, KafkaLog, MysqlLog, RedisLog},
};

fn param(msg_type: LogMessageType) -> ParseParam {
    ParseParam {
        msg_type,
        ..Default::default()
    }
}

fn bench_parser<P: L7ProtocolParserInterface>(
    c: &mut Criterion,
    name: &str,
    mut parser: P,
    payload: &[u8],
    msg_type: LogMessageType,
) {
    let param = param(msg_type);
    c.bench_function(name, |b| {
        b.iter(|| {
            let _ = black_box(parser.parse_payload(black_box(payload), &param));
        })
    });
}

pub(super) fn bench(c: &mut Criterion) {
    bench_parser(
        c,
        "parse_http_v1_request",
        HttpLog::default(),
        b"GET /api/v1/users?id=1 HTTP/1.1\r\nHost: example.com\r\nUser-Agent: curl/7.68.0\r\nAccept: */*\r\n\r\n",
        LogMessageType::Request,
    );
    bench_parser(
        c,
        "parse_http_v1_response",
        HttpLog::default(),
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello",
        LogMessageType::Response,
    );
    bench_parser(
        c,
        "parse_mysql_query",
        MysqlLog,
        b"\x21\x00\x00\x00\x03select * from users where id = 1",
        LogMessageType::Request,
    );
    bench_parser(
        c,
        "parse_redis_request",
        RedisLog,
        b"*3\r\n$3\r\nset\r\n$3\r\nkey\r\n$5\r\nvalue\r\n",
        LogMessageType::Request,
    );
    let kafka = hex::decode(
        "0000004e0001000400000001000c7364662d636f6e73756d6572ffffffff000001f40000000100a00000000000000000000000000100037364660000000100000000000000000000000000000000000000000000000000000000",
    )
    .unwrap_or_default();
    bench_parser(
        c,
        "parse_kafka_fetch",
        KafkaLog::default(),
        &kafka,
        LogMessageType::Request,
    );
    let dns = hex::decode("d8ca010000010000000000000377777705626169647503636f6d0000010001")
        .unwrap_or_default();
    bench_parser(c, "parse_dns_query", DnsLog, &dns, LogMessageType::Request);
}
