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

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::time::Duration;

use l7_observer::{
    common::{
        MessageType, PacketEvent, PacketEventData, PacketEventHeader, PacketEventType, PacketRole,
        PacketType,
    },
    FlowMap, L7Record, ObserverConfig,
};
use public::l7_protocol::L7Protocol;

const SEC: u64 = 1_000_000_000;

struct Call {
    protocol: L7Protocol,
    port: u16,
    request: Vec<u8>,
    response: Vec<u8>,
}

fn kafka_frame(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = ((header.len() + body.len()) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(header);
    out.extend_from_slice(body);
    out
}

fn calls() -> Vec<Call> {
    vec![
        Call {
            protocol: L7Protocol::Http1,
            port: 8080,
            request: b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec(),
            response: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
        },
        Call {
            protocol: L7Protocol::MySQL,
            port: 3306,
            request: hex::decode(
                "210000000373656c65637420404076657273696f6e5f636f6d6d656e74206c696d69742031",
            )
            .unwrap(),
            response: hex::decode("0700000100010102000000").unwrap(),
        },
        Call {
            protocol: L7Protocol::PostgreSQL,
            port: 5432,
            request: b"Q\x00\x00\x00\x1bselect * from account;\x00".to_vec(),
            response: hex::decode(concat!(
                "31000000043200000004540000002e00017472616e73616374696f6e5f69736f6c6174696f6e000000000000",
                "0000000019ffffffffffff0000440000001800010000000e7265616420636f6d6d6974746564430000000953",
                "484f57005a0000000549"
            ))
            .unwrap(),
        },
        Call {
            protocol: L7Protocol::Redis,
            port: 6379,
            request: b"*3\r\n$3\r\nset\r\n$2\r\naa\r\n$2\r\n1;\r\n".to_vec(),
            response: b"+OK\r\n".to_vec(),
        },
        Call {
            protocol: L7Protocol::Kafka,
            port: 9092,
            // produce v7, correlation id 7
            request: kafka_frame(
                b"\x00\x00\x00\x07\x00\x00\x00\x07\x00\x0aproducer-1",
                b"\xFF\xFF\x00\x01\x00\x00\x75\x30\x00\x00\x00\x01\x00\x08my-topic\x00\x00\x00\x01\x00\x00\x00\x00",
            ),
            response: kafka_frame(
                b"\x00\x00\x00\x07",
                b"\x00\x00\x00\x01\x00\x08my-topic\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\
                  \x00\x00\x00\x00\x00\x00\x01\xAE\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\x00\x00\x00\x00",
            ),
        },
        Call {
            protocol: L7Protocol::DNS,
            port: 53,
            request: hex::decode("661b010000010000000000000377777705626169647503636f6d0000010001")
                .unwrap(),
            response: hex::decode(concat!(
                "661b818000010003000000000377777705626169647503636f6d0000010001c00c000500010000046a000f037777770161067368",
                "6966656ec016c02b000100010000003300046ef24403c02b000100010000003300046ef24404"
            ))
            .unwrap(),
        },
        Call {
            protocol: L7Protocol::Dubbo,
            port: 20880,
            request: hex::decode(concat!(
                "dabbc20000000000000000000000011305322e302e32302c6f72672e6170616368652e647562626f2e737072696e67626f6f742e",
                "64656d6f2e44656d6f5365727669636505302e302e300873617948656c6c6f124c6a6176612f6c616e672f537472696e673b0577",
                "6f726c64480470617468302c6f72672e6170616368652e647562626f2e737072696e67626f6f742e64656d6f2e44656d6f536572",
                "766963651272656d6f74652e6170706c69636174696f6e1e647562626f2d737072696e67626f6f742d64656d6f2d636f6e73756d",
                "657209696e74657266616365302c6f72672e6170616368652e647562626f2e737072696e67626f6f742e64656d6f2e44656d6f53",
                "6572766963650776657273696f6e05302e302e300774696d656f7574cbe85a"
            ))
            .unwrap(),
            response: hex::decode(
                "dabb021400000000000000000000001b940b48656c6c6f20776f726c644805647562626f05322e302e325a",
            )
            .unwrap(),
        },
    ]
}

fn header(event_type: PacketEventType, time_nano: u64, dst_port: u16) -> PacketEventHeader {
    PacketEventHeader {
        pid: 100,
        event_type,
        time_nano,
        sock_hash: dst_port as u64,
        src_addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
        dst_addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        src_port: 50000,
        dst_port,
        role: PacketRole::Client,
    }
}

fn data(call: &Call, request: bool) -> PacketEventData {
    let (pkt_type, msg_type, buffer) = if request {
        (PacketType::Out, MessageType::Request, &call.request)
    } else {
        (PacketType::In, MessageType::Response, &call.response)
    };
    PacketEventData {
        pkt_type,
        msg_type,
        protocol: call.protocol,
        buffer: buffer.clone(),
        real_len: buffer.len() as u32,
    }
}

fn feed(map: &mut FlowMap, call: &Call, request: bool, time_nano: u64) {
    map.on_packet_event(
        &header(PacketEventType::Data, time_nano, call.port),
        Some(&data(call, request)),
    );
}

fn flush(map: &mut FlowMap) -> Vec<L7Record> {
    let mut out = vec![];
    let n = map.flush_out_metrics(&mut out);
    assert_eq!(n, out.len());
    out.sort_by(|a, b| a.fields().cmp(b.fields()));
    out
}

#[test]
fn order_independence() {
    for call in calls() {
        let mut forward = FlowMap::new(&ObserverConfig::default());
        feed(&mut forward, &call, true, SEC);
        feed(&mut forward, &call, false, SEC + 2000);

        let mut reversed = FlowMap::new(&ObserverConfig::default());
        feed(&mut reversed, &call, false, SEC + 2000);
        feed(&mut reversed, &call, true, SEC);

        let forward = flush(&mut forward);
        let reversed = flush(&mut reversed);
        assert_eq!(forward.len(), 1, "{} has no record", call.protocol);
        assert_eq!(forward, reversed, "{}", call.protocol);
        let record = &forward[0];
        assert_eq!(record.get("protocol"), Some(call.protocol.as_str()));
        assert_eq!(record.get("count"), Some("1"));
        assert_eq!(record.get("latency_ns"), Some("2000"));
        assert_eq!(
            record.get("req_bytes"),
            Some(call.request.len().to_string().as_str())
        );
        assert_eq!(
            record.get("resp_bytes"),
            Some(call.response.len().to_string().as_str())
        );
    }
}

#[test]
fn records_per_protocol() {
    let mut map = FlowMap::new(&ObserverConfig::default());
    for (i, call) in calls().iter().enumerate() {
        let t = (i as u64 + 1) * SEC;
        feed(&mut map, call, true, t);
        feed(&mut map, call, false, t + 10);
    }
    let records = flush(&mut map);
    assert_eq!(records.len(), 7);
    let find = |protocol: &str| {
        records
            .iter()
            .find(|r| r.get("protocol") == Some(protocol))
            .unwrap()
    };
    assert_eq!(find("redis").get("query"), Some("set"));
    assert_eq!(find("mysql").get("query"), Some("select"));
    assert_eq!(find("pgsql").get("query"), Some("select"));
    assert_eq!(find("dns").get("req_resource"), Some("www.baidu.com"));
    assert_eq!(find("dns").get("req_type"), Some("A"));
    assert_eq!(find("kafka").get("req_domain"), Some("my-topic"));
    assert_eq!(find("kafka").get("req_type"), Some("produce"));
    assert_eq!(find("kafka").get("version"), Some("7"));
    assert_eq!(
        find("dubbo").get("req_domain"),
        Some("org.apache.dubbo.springboot.demo.DemoService")
    );
    assert_eq!(find("dubbo").get("req_resource"), Some("sayHello"));
    assert_eq!(find("http").get("req_resource"), Some("/index.html"));
    assert_eq!(find("http").get("resp_code"), Some("200"));
    for record in records.iter() {
        assert_eq!(record.get("pid"), Some("100"));
        assert_eq!(record.get("role"), Some("c"));
        assert_eq!(record.get("remote_ip"), Some("192.168.1.20"));
    }
}

#[test]
fn repeated_calls_are_aggregated_and_flushed_once() {
    let calls = calls();
    let redis = &calls[3];
    let mut map = FlowMap::new(&ObserverConfig::default());
    for i in 0..10 {
        let t = SEC + i * 1000;
        feed(&mut map, redis, true, t);
        feed(&mut map, redis, false, t + 100);
    }
    let records = flush(&mut map);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("count"), Some("10"));
    assert_eq!(records[0].get("latency_ns"), Some("1000"));

    assert!(flush(&mut map).is_empty());
    assert_eq!(map.counter().flushed_records.load(Ordering::Relaxed), 1);
}

#[test]
fn stale_response_is_rejected() {
    let calls = calls();
    let redis = &calls[3];
    let mut map = FlowMap::new(&ObserverConfig::default());
    // a response to a call issued before capture started
    feed(&mut map, redis, false, SEC);
    feed(&mut map, redis, true, 2 * SEC);
    assert!(flush(&mut map).is_empty());
    feed(&mut map, redis, false, 2 * SEC + 100);
    let records = flush(&mut map);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("latency_ns"), Some("100"));
}

#[test]
fn split_request_is_buffered() {
    let calls = calls();
    let mysql = &calls[1];
    let mut map = FlowMap::new(&ObserverConfig::default());
    let (head, tail) = mysql.request.split_at(10);
    for (i, part) in [head, tail].iter().enumerate() {
        let mut d = data(mysql, true);
        d.buffer = part.to_vec();
        d.real_len = part.len() as u32;
        map.on_packet_event(
            &header(PacketEventType::Data, SEC + i as u64 * 10, mysql.port),
            Some(&d),
        );
    }
    feed(&mut map, mysql, false, SEC + 100);
    let counter = map.counter();
    assert_eq!(counter.buffered.load(Ordering::Relaxed), 1);
    let records = flush(&mut map);
    assert_eq!(records.len(), 1);
    // timed from the first segment
    assert_eq!(records[0].get("latency_ns"), Some("100"));
    assert_eq!(
        records[0].get("req_bytes"),
        Some(mysql.request.len().to_string().as_str())
    );
}

#[test]
fn bodiless_http_responses_complete_at_headers() {
    let exchanges: [(&[u8], &[u8]); 3] = [
        (
            b"HEAD /big.iso HTTP/1.1\r\nHost: mirror\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\n\r\n",
        ),
        (
            b"GET /big.iso HTTP/1.1\r\nHost: mirror\r\nIf-None-Match: \"abc\"\r\n\r\n",
            b"HTTP/1.1 304 Not Modified\r\nContent-Length: 20\r\n\r\n",
        ),
        (
            b"GET /big.iso HTTP/1.1\r\nHost: mirror\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        ),
    ];
    let mut map = FlowMap::new(&ObserverConfig::default());
    for (i, (request, response)) in exchanges.iter().enumerate() {
        let call = Call {
            protocol: L7Protocol::Http1,
            port: 8080,
            request: request.to_vec(),
            response: response.to_vec(),
        };
        let t = SEC + i as u64 * 1000;
        feed(&mut map, &call, true, t);
        feed(&mut map, &call, false, t + 100);
    }
    assert_eq!(map.counter().buffered.load(Ordering::Relaxed), 0);

    let records = flush(&mut map);
    assert_eq!(records.len(), 3);
    let mut seen: Vec<(&str, &str)> = records
        .iter()
        .map(|r| {
            assert_eq!(r.get("count"), Some("1"));
            assert_eq!(r.get("req_domain"), Some("mirror"));
            (
                r.get("req_type").unwrap_or_default(),
                r.get("resp_code").unwrap_or_default(),
            )
        })
        .collect();
    seen.sort();
    assert_eq!(seen, vec![("GET", "200"), ("GET", "304"), ("HEAD", "200")]);
}

#[test]
fn garbage_collection_is_idempotent() {
    let mut config = ObserverConfig::default();
    config.timeout.connection = Duration::from_secs(10);
    config.timeout.process = Duration::from_secs(60);
    config.timeout.process_no_connection = Duration::from_secs(20);
    let mut map = FlowMap::new(&config);

    let calls = calls();
    for call in calls.iter() {
        feed(&mut map, call, true, SEC);
        feed(&mut map, call, false, SEC + 10);
    }
    // a second process with a request still pending
    let mut h = header(PacketEventType::Data, 5 * SEC, calls[3].port);
    h.pid = 200;
    map.on_packet_event(&h, Some(&data(&calls[3], true)));
    assert_eq!(map.process_count(), 2);
    assert_eq!(map.connection_count(), 8);

    map.garbage_collection(0);
    assert_eq!(map.connection_count(), 8);

    map.garbage_collection(12 * SEC);
    assert_eq!(map.connection_count(), 1);
    assert_eq!(map.process_count(), 2);
    let counter = map.counter();
    assert_eq!(counter.removed_connections.load(Ordering::Relaxed), 7);

    map.garbage_collection(22 * SEC);
    assert_eq!(map.process_count(), 1);
    assert_eq!(counter.removed_processes.load(Ordering::Relaxed), 1);
    map.garbage_collection(22 * SEC);
    assert_eq!(map.process_count(), 1);
    assert_eq!(counter.removed_processes.load(Ordering::Relaxed), 1);
    assert_eq!(counter.removed_connections.load(Ordering::Relaxed), 8);
    assert_eq!(counter.concurrent_connections.load(Ordering::Relaxed), 0);
    // the pending request expired with its connection
    assert_eq!(counter.expired.load(Ordering::Relaxed), 1);

    // every process is gone, the aggregated calls are not
    assert_eq!(flush(&mut map).len(), 7);
}

#[test]
fn closed_connection_is_reclaimed() {
    let calls = calls();
    let redis = &calls[3];
    let mut map = FlowMap::new(&ObserverConfig::default());
    map.on_packet_event(&header(PacketEventType::Connected, SEC, redis.port), None);
    assert_eq!(map.process_count(), 1);
    feed(&mut map, redis, true, SEC);
    feed(&mut map, redis, false, SEC + 10);
    map.on_packet_event(&header(PacketEventType::Closed, 2 * SEC, redis.port), None);
    map.garbage_collection(2 * SEC);
    assert_eq!(map.connection_count(), 0);
    assert_eq!(map.process_count(), 1);
}

#[test]
fn raw_events() {
    let calls = calls();
    let dns = &calls[5];
    let mut map = FlowMap::new(&ObserverConfig::default());
    for (request, t) in [(true, SEC), (false, SEC + 500)] {
        let event = PacketEvent {
            header: header(PacketEventType::Data, t, dns.port),
            data: Some(data(dns, request)),
        };
        let raw = event.encode();
        assert_eq!(PacketEvent::decode(&raw).unwrap(), event);
        map.on_raw_event(&raw).unwrap();
    }
    assert!(map.on_raw_event(b"short").is_err());
    let records = flush(&mut map);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("latency_ns"), Some("500"));
}

#[test]
fn tags_lead_every_record() {
    let config = ObserverConfig::load("tags:\n  zone: z1\n  cluster: c1\n").unwrap();
    let mut map = FlowMap::new(&config);
    let calls = calls();
    feed(&mut map, &calls[0], true, SEC);
    feed(&mut map, &calls[0], false, SEC + 1);
    let records = flush(&mut map);
    let fields = records[0].fields();
    assert_eq!(fields[0], ("cluster".to_owned(), "c1".to_owned()));
    assert_eq!(fields[1], ("zone".to_owned(), "z1".to_owned()));
    assert_eq!(fields[2].0, "protocol");
}

#[test]
fn events_from_json() {
    let line = r#"{"header":{"pid":1,"event_type":"data","time_nano":10,"src_addr":"::1","dst_addr":"::1","src_port":1234,"dst_port":6379},"data":{"pkt_type":"out","buffer":"2a310d0a24340d0a50494e470d0a"}}"#;
    let event: PacketEvent = serde_json::from_str(line).unwrap();
    assert_eq!(event.header.role, PacketRole::Unknown);
    let data = event.data.as_ref().unwrap();
    assert_eq!(data.protocol, L7Protocol::Unknown);
    assert_eq!(data.real_len(), 14);

    let mut map = FlowMap::new(&ObserverConfig::default());
    map.on_packet_event(&event.header, event.data.as_ref());
    // inferred by port, direction unknown
    assert_eq!(map.connection_count(), 1);
}
