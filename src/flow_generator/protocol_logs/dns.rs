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
    net::{Ipv4Addr, Ipv6Addr},
    str,
};

use serde::Serialize;

use public::{bytes::ByteCursor, l7_protocol::L7Protocol};

use super::{consts::*, L7ProtocolEvent, ProtocolEventAggregators};
use crate::{
    common::l7_protocol_log::{
        L7Message, L7ProtocolInfoInterface, L7ProtocolParserInterface, ParseParam,
    },
    flow_generator::{
        aggregator::{EventKey, L7Record, ProtocolAggregator},
        error::{Error, Result},
        perf::Slot,
    },
};

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DnsHeader {
    pub trans_id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    fn parse(cursor: &mut ByteCursor) -> Result<Self> {
        let header = Self {
            trans_id: cursor.read_u16(true),
            flags: cursor.read_u16(true),
            qd_count: cursor.read_u16(true),
            an_count: cursor.read_u16(true),
            ns_count: cursor.read_u16(true),
            ar_count: cursor.read_u16(true),
        };
        if !cursor.ok() {
            return Err(Error::DNSLogParseFailed(format!(
                "dns payload length too short: {}",
                cursor.len()
            )));
        }
        Ok(header)
    }

    pub fn is_response(&self) -> bool {
        self.flags & DNS_HEADER_QR_MASK != 0
    }

    pub fn resp_code(&self) -> u16 {
        self.flags & DNS_HEADER_RESPCODE_MASK
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub query_type: u16,
    pub class: u16,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub name: String,
    pub query_type: u16,
    pub class: u16,
    pub ttl: u32,
    // address for A/AAAA, target name for CNAME/NS, "UnKnown" otherwise
    pub value: String,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DnsRequest {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DnsResponse {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsAnswer>,
}

impl L7ProtocolInfoInterface for DnsRequest {
    fn session_id(&self) -> Option<u64> {
        Some(self.header.trans_id as u64)
    }
}

impl L7ProtocolInfoInterface for DnsResponse {
    fn session_id(&self) -> Option<u64> {
        Some(self.header.trans_id as u64)
    }
}

impl DnsResponse {
    pub fn is_ok(&self) -> bool {
        self.header.resp_code() == DNS_RESPCODE_SUCCESS
    }
}

pub fn get_domain_str(query_type: u16) -> &'static str {
    match query_type {
        DNS_TYPE_A => "A",
        DNS_TYPE_NS => "NS",
        DNS_TYPE_CNAME => "CNAME",
        DNS_TYPE_AAAA => "AAAA",
        _ => UNKNOWN,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DnsKey {
    pub req_type: String,
    pub req_resource: String,
    pub resp_status: bool,
}

impl EventKey for DnsKey {
    fn fill_record(&self, record: &mut L7Record) {
        record.push("req_type", &self.req_type);
        record.push("req_resource", &self.req_resource);
        record.push("resp_status", if self.resp_status { "1" } else { "0" });
    }
}

#[derive(Clone, Debug, Default)]
pub struct DnsLog;

impl L7ProtocolParserInterface for DnsLog {
    type Request = DnsRequest;
    type Response = DnsResponse;

    fn check_payload(&self, payload: &[u8], _: &ParseParam) -> bool {
        let mut cursor = ByteCursor::big_endian(payload);
        match DnsHeader::parse(&mut cursor) {
            // opcode must be a standard query
            Ok(h) => {
                h.qd_count > 0
                    && (h.flags >> 11) & 0xf == 0
                    && decode_questions(&mut cursor, &h).is_ok()
            }
            Err(_) => false,
        }
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        _: &ParseParam,
    ) -> Result<L7Message<DnsRequest, DnsResponse>> {
        let mut cursor = ByteCursor::big_endian(payload);
        let header = DnsHeader::parse(&mut cursor)?;
        let questions = decode_questions(&mut cursor, &header)?;
        if !header.is_response() {
            return Ok(L7Message::Request(DnsRequest { header, questions }));
        }
        let mut answers = Vec::with_capacity(header.an_count as usize);
        for _ in 0..header.an_count {
            answers.push(decode_resource_record(&mut cursor)?);
        }
        Ok(L7Message::Response(DnsResponse {
            header,
            questions,
            answers,
        }))
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::DNS
    }
}

impl L7ProtocolEvent for DnsLog {
    type Key = DnsKey;

    const STITCH_BY_ID: bool = true;

    fn event_key(req: &Slot<DnsRequest>, resp: &Slot<DnsResponse>) -> Option<DnsKey> {
        let question = req.value.questions.first()?;
        Some(DnsKey {
            req_type: get_domain_str(question.query_type).to_owned(),
            req_resource: question.name.clone(),
            resp_status: resp.value.is_ok(),
        })
    }

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<DnsKey> {
        &mut aggs.dns
    }
}

fn decode_questions(cursor: &mut ByteCursor, header: &DnsHeader) -> Result<Vec<DnsQuestion>> {
    let mut questions = Vec::with_capacity(header.qd_count as usize);
    for _ in 0..header.qd_count {
        let name = decode_name(cursor)?;
        let query_type = cursor.read_u16(true);
        let class = cursor.read_u16(true);
        if !cursor.ok() {
            return Err(Error::DNSLogParseFailed(format!(
                "question length error: {}",
                cursor.remaining()
            )));
        }
        questions.push(DnsQuestion {
            name,
            query_type,
            class,
        });
    }
    Ok(questions)
}

fn decode_resource_record(cursor: &mut ByteCursor) -> Result<DnsAnswer> {
    let name = decode_name(cursor)?;
    let query_type = cursor.read_u16(true);
    let class = cursor.read_u16(true);
    let ttl = cursor.read_u32(true);
    let data_length = cursor.read_u16(true) as usize;
    if !cursor.ok() || cursor.remaining() < data_length {
        return Err(Error::DNSLogParseFailed(format!(
            "resource record length error: {}",
            cursor.remaining()
        )));
    }
    let rdata_end = cursor.position() + data_length;
    let value = match (query_type, data_length) {
        (DNS_TYPE_A, DNS_TYPE_A_LENGTH) => {
            let bs = cursor.read_bytes(DNS_TYPE_A_LENGTH);
            Ipv4Addr::new(bs[0], bs[1], bs[2], bs[3]).to_string()
        }
        (DNS_TYPE_AAAA, DNS_TYPE_AAAA_LENGTH) => {
            let mut octets = [0u8; DNS_TYPE_AAAA_LENGTH];
            octets.copy_from_slice(cursor.read_bytes(DNS_TYPE_AAAA_LENGTH));
            Ipv6Addr::from(octets).to_string()
        }
        (DNS_TYPE_A, _) | (DNS_TYPE_AAAA, _) => {
            return Err(Error::DNSLogParseFailed(format!(
                "domain type {} data length {} invalid",
                query_type, data_length
            )));
        }
        (DNS_TYPE_CNAME, _) | (DNS_TYPE_NS, _) => decode_name(cursor)?,
        _ => UNKNOWN.to_owned(),
    };
    cursor.seek(rdata_end);
    Ok(DnsAnswer {
        name,
        query_type,
        class,
        ttl,
        value,
    })
}

// Labels are resolved against the whole packet. A compression pointer must point before the
// previous one, which bounds the walk.
fn decode_name(cursor: &mut ByteCursor) -> Result<String> {
    let payload = cursor.payload();
    let mut index = cursor.position();
    let mut floor = index;
    let mut resume = None;
    let mut name = String::new();
    loop {
        let Some(&len) = payload.get(index) else {
            return Err(Error::DNSLogParseFailed(format!(
                "dns name invalid index: {}",
                index
            )));
        };
        match len & DNS_NAME_COMPRESS_POINTER {
            DNS_NAME_COMPRESS_POINTER => {
                let Some(&low) = payload.get(index + 1) else {
                    return Err(Error::DNSLogParseFailed(format!(
                        "dns name invalid index: {}",
                        index
                    )));
                };
                let ptr = (((len & !DNS_NAME_COMPRESS_POINTER) as usize) << 8) | low as usize;
                if ptr >= floor {
                    return Err(Error::DNSLogParseFailed(format!(
                        "dns name compress pointer invalid: {}",
                        ptr
                    )));
                }
                resume.get_or_insert(index + 2);
                floor = ptr;
                index = ptr;
            }
            0 if len == DNS_NAME_TAIL => {
                index += 1;
                break;
            }
            0 => {
                let end = index + 1 + len as usize;
                let Some(label) = payload.get(index + 1..end) else {
                    return Err(Error::DNSLogParseFailed(format!(
                        "dns name invalid index: {}",
                        end
                    )));
                };
                let label = str::from_utf8(label)
                    .map_err(|e| Error::DNSLogParseFailed(format!("decode name error {}", e)))?;
                if !name.is_empty() {
                    name.push('.');
                }
                name.push_str(label);
                if name.len() > DNS_NAME_MAX_SIZE {
                    return Err(Error::DNSLogParseFailed(format!(
                        "dns name invalid length: {}",
                        name.len()
                    )));
                }
                index = end;
            }
            _ => {
                return Err(Error::DNSLogParseFailed(format!(
                    "dns name label type error: {}",
                    len
                )))
            }
        }
    }
    cursor.seek(resume.unwrap_or(index));
    Ok(name)
}
