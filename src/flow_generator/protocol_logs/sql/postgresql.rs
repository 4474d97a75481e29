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

use public::{bytes::ByteCursor, l7_protocol::L7Protocol};

use super::SqlKey;
use crate::{
    common::l7_protocol_log::{
        ControlKind, L7Message, L7ProtocolInfoInterface, L7ProtocolParserInterface,
        LogMessageType, ParseParam,
    },
    flow_generator::{
        aggregator::ProtocolAggregator,
        error::{Error, Result},
        perf::Slot,
        protocol_logs::{consts::*, first_word, L7ProtocolEvent, ProtocolEventAggregators},
    },
};

// frontend
const TAG_QUERY: u8 = b'Q';
const TAG_PARSE: u8 = b'P';
const FRONTEND_TAGS: &[u8] = b"QPBEDCHSXFdcfp";

// backend
const TAG_ERROR: u8 = b'E';
const TAG_COMMAND_COMPLETE: u8 = b'C';
const BACKEND_RESULT_TAGS: &[u8] = b"123CDInstT";
// authentication, parameter status, backend key data, ready for query and async messages
const BACKEND_SESSION_TAGS: &[u8] = b"RSKZNAGHWVcd";

const ERROR_FIELD_MESSAGE: u8 = b'M';

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PostgreRequest {
    // first word of a simple query, the whole statement of an extended query
    pub query: String,
    pub extended: bool,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PostgreResponse {
    pub ok: bool,
    pub command_tag: String,
    pub error_message: String,
}

impl L7ProtocolInfoInterface for PostgreRequest {}
impl L7ProtocolInfoInterface for PostgreResponse {}

#[derive(Clone, Debug, Default)]
pub struct PostgresqlLog;

struct Message<'a> {
    tag: u8,
    body: &'a [u8],
}

// Splits the payload into tagged messages. Only a capture cut message may end early.
fn read_messages<'a>(payload: &'a [u8], truncated: bool) -> Result<Vec<Message<'a>>> {
    let mut cursor = ByteCursor::big_endian(payload);
    let mut messages = vec![];
    while cursor.remaining() > 0 {
        let tag = cursor.read_u8(true);
        let len = cursor.read_u32(true) as usize;
        if !cursor.ok() || len > cursor.remaining() + 4 {
            if truncated && !messages.is_empty() {
                break;
            }
            if !tag.is_ascii_alphanumeric() {
                return Err(Error::PostgreLogParseFailed("postgresql invalid message tag"));
            }
            return Err(Error::NeedMoreData);
        }
        if len < 4 {
            return Err(Error::PostgreLogParseFailed("postgresql invalid message length"));
        }
        messages.push(Message {
            tag,
            body: cursor.read_bytes(len - 4),
        });
    }
    Ok(messages)
}

fn read_cstr(cursor: &mut ByteCursor) -> String {
    let s = cursor.read_until(&[0], true);
    if !cursor.ok() {
        // the terminator was cut off
        return String::new();
    }
    String::from_utf8_lossy(s).into_owned()
}

fn cstr_lossy(body: &[u8]) -> String {
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

impl PostgresqlLog {
    fn is_startup(payload: &[u8]) -> bool {
        let mut cursor = ByteCursor::big_endian(payload);
        let len = cursor.read_u32(true) as usize;
        let code = cursor.read_u32(true);
        cursor.ok()
            && payload[0] == 0
            && len <= payload.len()
            && (code == PG_STARTUP_PROTOCOL_V3 || code == PG_SSL_REQUEST_CODE)
    }

    fn parse_request(
        payload: &[u8],
        truncated: bool,
    ) -> Result<L7Message<PostgreRequest, PostgreResponse>> {
        if Self::is_startup(payload) {
            return Ok(L7Message::Control(ControlKind::Ignore));
        }
        let messages = read_messages(payload, truncated)?;
        if messages.iter().any(|m| !FRONTEND_TAGS.contains(&m.tag)) {
            return Err(Error::PostgreLogParseFailed("postgresql unknown frontend message"));
        }
        for m in messages.iter() {
            match m.tag {
                TAG_QUERY => {
                    let query = cstr_lossy(m.body);
                    return Ok(L7Message::Request(PostgreRequest {
                        query: first_word(&query).to_owned(),
                        extended: false,
                    }));
                }
                TAG_PARSE => {
                    let mut cursor = ByteCursor::big_endian(m.body);
                    // prepared statement name
                    let _ = read_cstr(&mut cursor);
                    let query = if cursor.ok() {
                        read_cstr(&mut cursor)
                    } else {
                        String::new()
                    };
                    return Ok(L7Message::Request(PostgreRequest {
                        query,
                        extended: true,
                    }));
                }
                _ => (),
            }
        }
        // bind/execute/sync/terminate/password without a statement
        Ok(L7Message::Control(ControlKind::Ignore))
    }

    fn parse_response(
        payload: &[u8],
        truncated: bool,
    ) -> Result<L7Message<PostgreRequest, PostgreResponse>> {
        let messages = read_messages(payload, truncated)?;
        let mut resp = PostgreResponse::default();
        let mut is_result = false;
        for m in messages.iter() {
            match m.tag {
                TAG_ERROR => {
                    resp.error_message = Self::error_message(m.body);
                    resp.ok = false;
                    return Ok(L7Message::Response(resp));
                }
                TAG_COMMAND_COMPLETE => {
                    resp.command_tag = cstr_lossy(m.body);
                    is_result = true;
                }
                t if BACKEND_RESULT_TAGS.contains(&t) => is_result = true,
                t if BACKEND_SESSION_TAGS.contains(&t) => (),
                _ => {
                    return Err(Error::PostgreLogParseFailed(
                        "postgresql unknown backend message",
                    ))
                }
            }
        }
        if !is_result {
            return Ok(L7Message::Control(ControlKind::Ignore));
        }
        resp.ok = true;
        Ok(L7Message::Response(resp))
    }

    // error fields are a type byte and a NUL terminated string each, ended by a NUL
    fn error_message(body: &[u8]) -> String {
        let mut cursor = ByteCursor::big_endian(body);
        loop {
            let field = cursor.read_u8(true);
            if !cursor.ok() || field == 0 {
                return String::new();
            }
            let value = read_cstr(&mut cursor);
            if field == ERROR_FIELD_MESSAGE || !cursor.ok() {
                return value;
            }
        }
    }

    fn parse(
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<PostgreRequest, PostgreResponse>> {
        match param.msg_type {
            LogMessageType::Request => Self::parse_request(payload, param.truncated),
            LogMessageType::Response => Self::parse_response(payload, param.truncated),
            // frontend and backend share tags, prefer the reading that yields a call
            LogMessageType::Other => match Self::parse_request(payload, param.truncated) {
                Ok(m @ L7Message::Request(_)) => Ok(m),
                req => match Self::parse_response(payload, param.truncated) {
                    Ok(m) => Ok(m),
                    Err(_) => req,
                },
            },
        }
    }
}

impl L7ProtocolParserInterface for PostgresqlLog {
    type Request = PostgreRequest;
    type Response = PostgreResponse;

    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if payload.len() < PG_MSG_HEADER_LEN {
            return false;
        }
        if Self::is_startup(payload) {
            return true;
        }
        Self::parse(payload, param).is_ok()
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<PostgreRequest, PostgreResponse>> {
        Self::parse(payload, param)
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::PostgreSQL
    }
}

impl L7ProtocolEvent for PostgresqlLog {
    type Key = SqlKey;

    fn event_key(req: &Slot<PostgreRequest>, resp: &Slot<PostgreResponse>) -> Option<SqlKey> {
        Some(SqlKey {
            query: req.value.query.clone(),
            status: resp.value.ok,
        })
    }

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<SqlKey> {
        &mut aggs.postgresql
    }
}
