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

use serde::Serialize;

use public::l7_protocol::L7Protocol;

use super::packet_event::{MessageType, PacketEventData, PacketEventHeader, PacketRole, PacketType};
use crate::flow_generator::error::{Error, Result};

#[derive(Serialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum LogMessageType {
    Request,
    Response,
    #[default]
    Other,
}

impl LogMessageType {
    /// Capture metadata wins, otherwise the socket role and payload direction decide.
    pub fn infer(header: &PacketEventHeader, data: &PacketEventData) -> Self {
        match data.msg_type {
            MessageType::Request => return LogMessageType::Request,
            MessageType::Response => return LogMessageType::Response,
            MessageType::Unknown => (),
        }
        match (header.role, data.pkt_type) {
            (PacketRole::Client, PacketType::Out) | (PacketRole::Server, PacketType::In) => {
                LogMessageType::Request
            }
            (PacketRole::Client, PacketType::In) | (PacketRole::Server, PacketType::Out) => {
                LogMessageType::Response
            }
            _ => LogMessageType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseParam {
    // Other when neither capture metadata nor socket role tell the direction
    pub msg_type: LogMessageType,
    pub port_src: u16,
    pub port_dst: u16,
    pub time: u64,
    // captured bytes are a prefix of the real message
    pub truncated: bool,
}

impl ParseParam {
    pub fn new(header: &PacketEventHeader, data: &PacketEventData) -> Self {
        Self {
            msg_type: LogMessageType::infer(header, data),
            port_src: header.src_port,
            port_dst: header.dst_port,
            time: header.time_nano,
            truncated: data.is_truncated(),
        }
    }

    // the port of the server side of the connection
    pub fn server_port(&self, role: PacketRole) -> u16 {
        match role {
            PacketRole::Server => self.port_src,
            _ => self.port_dst,
        }
    }
}

/// Messages that are neither a call nor its reply.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Heartbeat,
    Greeting,
    Login,
    // valid traffic the protocol does not report, e.g. mysql COM_PING
    Ignore,
    // a request that never gets a response, e.g. mysql COM_QUIT
    NoResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub enum L7Message<Req, Resp> {
    Request(Req),
    Response(Resp),
    Control(ControlKind),
}

#[derive(Debug, Clone, PartialEq)]
pub enum L7ParseResult<Req, Resp> {
    Request(Req),
    Response(Resp),
    Control(ControlKind),
    // buffered by the connection and retried with the next packet of the same direction
    Incomplete,
    Malformed(Error),
}

pub trait L7ProtocolInfoInterface {
    // request id carried on the wire, pairs requests and responses regardless of order
    fn session_id(&self) -> Option<u64> {
        None
    }
}

pub trait L7ProtocolParserInterface {
    type Request: L7ProtocolInfoInterface;
    type Response: L7ProtocolInfoInterface;

    /// Cheap check whether the payload looks like this protocol.
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool;

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<Self::Request, Self::Response>>;

    fn protocol(&self) -> L7Protocol;

    fn decode(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> L7ParseResult<Self::Request, Self::Response> {
        if payload.is_empty() {
            return L7ParseResult::Malformed(Error::ZeroPayloadLen);
        }
        match self.parse_payload(payload, param) {
            Ok(L7Message::Request(r)) => L7ParseResult::Request(r),
            Ok(L7Message::Response(r)) => L7ParseResult::Response(r),
            Ok(L7Message::Control(c)) => L7ParseResult::Control(c),
            Err(Error::NeedMoreData) => L7ParseResult::Incomplete,
            Err(e) => L7ParseResult::Malformed(e),
        }
    }
}
