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

use log::debug;
use serde::Serialize;

use public::{bytes::ByteCursor, codecs::hessian2, l7_protocol::L7Protocol};

use crate::{
    common::l7_protocol_log::{
        ControlKind, L7Message, L7ProtocolInfoInterface, L7ProtocolParserInterface,
        LogMessageType, ParseParam,
    },
    flow_generator::{
        aggregator::ProtocolAggregator,
        error::{Error, Result},
        perf::Slot,
        protocol_logs::{consts::*, L7ProtocolEvent, L7RequestKey, ProtocolEventAggregators},
    },
};

const FLAG_REQUEST: u8 = 0x80;
const FLAG_TWO_WAY: u8 = 0x40;
const FLAG_EVENT: u8 = 0x20;
const SERIALIZATION_MASK: u8 = 0x1f;

const BODY_FIELD_COUNT: usize = 4;

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DubboHeader {
    pub is_request: bool,
    pub two_way: bool,
    pub event: bool,
    pub serialization: u8,
    pub status: u8,
    pub request_id: u64,
    pub body_len: u32,
}

impl DubboHeader {
    // +------------+------------------------+-------------+----------------+-----------------+
    // | magic (16) | request/event/serial (8) | status (8) | request id (64) | body length (32) |
    // +------------+------------------------+-------------+----------------+-----------------+
    pub fn parse(cursor: &mut ByteCursor) -> Result<Self> {
        if cursor.remaining() < DUBBO_HEADER_LEN {
            return Err(Error::DubboHeaderParseFailed);
        }
        if cursor.read_u8(true) != DUBBO_MAGIC_HIGH || cursor.read_u8(true) != DUBBO_MAGIC_LOW {
            return Err(Error::DubboHeaderParseFailed);
        }
        let flag = cursor.read_u8(true);
        Ok(Self {
            is_request: flag & FLAG_REQUEST != 0,
            two_way: flag & FLAG_TWO_WAY != 0,
            event: flag & FLAG_EVENT != 0,
            serialization: flag & SERIALIZATION_MASK,
            status: cursor.read_u8(true),
            request_id: cursor.read_u64(true),
            body_len: cursor.read_u32(true),
        })
    }

    // a request carries no status, serialization id 0 and 1 are not assigned
    pub fn check(&self) -> bool {
        self.is_request && self.status == 0 && self.serialization >= DUBBO_SERIALIZATION_HESSIAN2
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DubboRequest {
    pub request_id: u64,
    pub serialization: u8,
    pub dubbo_version: String,
    pub service_name: String,
    pub service_version: String,
    pub method_name: String,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DubboResponse {
    pub request_id: u64,
    pub status: u8,
}

impl DubboResponse {
    pub fn is_ok(&self) -> bool {
        self.status == OK
    }
}

impl L7ProtocolInfoInterface for DubboRequest {
    fn session_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

impl L7ProtocolInfoInterface for DubboResponse {
    fn session_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DubboLog;

impl DubboLog {
    // dubbo version, service name, service version and method name lead the body
    fn hessian2_fields(body: &[u8]) -> Vec<String> {
        let mut cursor = ByteCursor::big_endian(body);
        let mut fields = Vec::with_capacity(BODY_FIELD_COUNT);
        while fields.len() < BODY_FIELD_COUNT {
            match hessian2::read_string(&mut cursor) {
                Some(s) => fields.push(s),
                None => break,
            }
        }
        fields
    }

    // fastjson writes one json value per line
    fn fastjson_fields(body: &[u8]) -> Vec<String> {
        body.split(|b| *b == b'\n')
            .take(BODY_FIELD_COUNT)
            .map_while(|line| serde_json::from_slice::<String>(line).ok())
            .collect()
    }

    fn request(header: &DubboHeader, body: &[u8]) -> DubboRequest {
        let fields = match header.serialization {
            DUBBO_SERIALIZATION_HESSIAN2 => Self::hessian2_fields(body),
            DUBBO_SERIALIZATION_FASTJSON => Self::fastjson_fields(body),
            s => {
                debug!("dubbo serialization {} body not decoded", s);
                vec![]
            }
        };
        let mut fields = fields.into_iter();
        DubboRequest {
            request_id: header.request_id,
            serialization: header.serialization,
            dubbo_version: fields.next().unwrap_or_default(),
            service_name: fields.next().unwrap_or_default(),
            service_version: fields.next().unwrap_or_default(),
            method_name: fields.next().unwrap_or_default(),
        }
    }

    fn parse(
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<DubboRequest, DubboResponse>> {
        let mut cursor = ByteCursor::big_endian(payload);
        let header = DubboHeader::parse(&mut cursor)?;
        if header.body_len as usize > cursor.remaining() && !param.truncated {
            return Err(Error::NeedMoreData);
        }
        if header.event {
            return Ok(L7Message::Control(ControlKind::Heartbeat));
        }
        match (param.msg_type, header.is_request) {
            (LogMessageType::Request, false) => {
                return Err(Error::DubboLogParseFailed("dubbo response in request direction"))
            }
            (LogMessageType::Response, true) => {
                return Err(Error::DubboLogParseFailed("dubbo request in response direction"))
            }
            _ => (),
        }
        if header.is_request {
            let body = cursor.read_bytes(cursor.remaining().min(header.body_len as usize));
            Ok(L7Message::Request(Self::request(&header, body)))
        } else {
            Ok(L7Message::Response(DubboResponse {
                request_id: header.request_id,
                status: header.status,
            }))
        }
    }
}

impl L7ProtocolParserInterface for DubboLog {
    type Request = DubboRequest;
    type Response = DubboResponse;

    fn check_payload(&self, payload: &[u8], _: &ParseParam) -> bool {
        let mut cursor = ByteCursor::big_endian(payload);
        DubboHeader::parse(&mut cursor)
            .map(|h| h.check())
            .unwrap_or(false)
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<DubboRequest, DubboResponse>> {
        Self::parse(payload, param)
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Dubbo
    }
}

impl L7ProtocolEvent for DubboLog {
    type Key = L7RequestKey;

    const STITCH_BY_ID: bool = true;

    fn event_key(req: &Slot<DubboRequest>, resp: &Slot<DubboResponse>) -> Option<L7RequestKey> {
        Some(L7RequestKey {
            version: req.value.dubbo_version.clone(),
            req_domain: req.value.service_name.clone(),
            req_type: "rpc".to_owned(),
            req_resource: req.value.method_name.clone(),
            resp_code: resp.value.status as i32,
        })
    }

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<L7RequestKey> {
        &mut aggs.dubbo
    }
}
