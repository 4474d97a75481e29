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
        L7Message, L7ProtocolInfoInterface, L7ProtocolParserInterface, LogMessageType, ParseParam,
    },
    flow_generator::{
        aggregator::ProtocolAggregator,
        error::{Error, Result},
        perf::Slot,
        protocol_logs::{consts::*, first_word, L7ProtocolEvent, ProtocolEventAggregators},
    },
};

const MAX_NESTED_DEPTH: usize = 8;

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct RedisRequest {
    // arguments joined by spaces
    pub command: String,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct RedisResponse {
    pub is_error: bool,
    pub result: String,
}

impl L7ProtocolInfoInterface for RedisRequest {}
impl L7ProtocolInfoInterface for RedisResponse {}

#[derive(Clone, Debug, Default)]
pub struct RedisLog;

fn read_line<'a>(cursor: &mut ByteCursor<'a>) -> Result<&'a [u8]> {
    let line = cursor.read_until(REDIS_LINE_END, true);
    if !cursor.ok() {
        return Err(Error::NeedMoreData);
    }
    Ok(line)
}

fn read_len(cursor: &mut ByteCursor) -> Result<i64> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::RedisLogParseFailed("redis invalid length"))
}

// Appends the textual form of one RESP value to `out`. On a cut value whatever was decoded so far
// stays in `out`.
fn decode(cursor: &mut ByteCursor, out: &mut Vec<String>, depth: usize) -> Result<()> {
    if depth > MAX_NESTED_DEPTH {
        return Err(Error::RedisLogParseFailed("redis array nested too deep"));
    }
    let tag = cursor.read_u8(true);
    if !cursor.ok() {
        return Err(Error::NeedMoreData);
    }
    match tag {
        b'+' | b'-' | b':' => {
            let line = read_line(cursor)?;
            out.push(String::from_utf8_lossy(line).into_owned());
        }
        b'$' => {
            let len = read_len(cursor)?;
            if len < 0 {
                // null bulk string
                return Ok(());
            }
            let len = len as usize;
            if cursor.remaining() < len + REDIS_LINE_END.len() {
                let partial = cursor.read_remaining();
                if !partial.is_empty() {
                    out.push(String::from_utf8_lossy(&partial[..partial.len().min(len)]).into_owned());
                }
                return Err(Error::NeedMoreData);
            }
            let bs = cursor.read_bytes(len);
            if cursor.read_bytes(REDIS_LINE_END.len()) != REDIS_LINE_END {
                return Err(Error::RedisLogParseFailed("redis bulk string not terminated"));
            }
            out.push(String::from_utf8_lossy(bs).into_owned());
        }
        b'*' => {
            let len = read_len(cursor)?;
            for _ in 0..len.max(0) {
                decode(cursor, out, depth + 1)?;
            }
        }
        _ => return Err(Error::RedisLogParseFailed("redis unknown type")),
    }
    Ok(())
}

impl RedisLog {
    fn decode_payload(payload: &[u8], truncated: bool) -> Result<(u8, String)> {
        let mut cursor = ByteCursor::big_endian(payload);
        let mut tokens = vec![];
        match decode(&mut cursor, &mut tokens, 0) {
            Ok(()) => (),
            Err(Error::NeedMoreData) if truncated && !tokens.is_empty() => (),
            Err(e) => return Err(e),
        }
        Ok((payload[0], tokens.join(" ")))
    }

    // `PING\r\n` style commands typed into telnet
    fn decode_inline(payload: &[u8]) -> Result<String> {
        if !payload[0].is_ascii_alphabetic() {
            return Err(Error::RedisLogParseFailed("redis unknown type"));
        }
        let mut cursor = ByteCursor::big_endian(payload);
        let line = read_line(&mut cursor)?;
        let line = std::str::from_utf8(line)
            .map_err(|_| Error::RedisLogParseFailed("redis inline command not utf8"))?;
        Ok(line.split_ascii_whitespace().collect::<Vec<_>>().join(" "))
    }

    fn parse(payload: &[u8], param: &ParseParam) -> Result<L7Message<RedisRequest, RedisResponse>> {
        if payload.is_empty() {
            return Err(Error::ZeroPayloadLen);
        }
        let as_request = match param.msg_type {
            LogMessageType::Request => true,
            LogMessageType::Response => false,
            // arrays are sent by clients, everything else comes from the server
            LogMessageType::Other => payload[0] == b'*' || payload[0].is_ascii_alphabetic(),
        };
        if as_request {
            let command = if payload[0] == b'*' {
                Self::decode_payload(payload, param.truncated)?.1
            } else {
                Self::decode_inline(payload)?
            };
            return Ok(L7Message::Request(RedisRequest { command }));
        }
        let (tag, result) = Self::decode_payload(payload, param.truncated)?;
        Ok(L7Message::Response(RedisResponse {
            is_error: tag == b'-',
            result,
        }))
    }
}

impl L7ProtocolParserInterface for RedisLog {
    type Request = RedisRequest;
    type Response = RedisResponse;

    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if payload.len() < 3 || !payload.ends_with(REDIS_LINE_END) {
            return false;
        }
        if !matches!(payload[0], b'+' | b'-' | b':' | b'$' | b'*') {
            return false;
        }
        Self::parse(payload, param).is_ok()
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<RedisRequest, RedisResponse>> {
        Self::parse(payload, param)
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Redis
    }
}

impl L7ProtocolEvent for RedisLog {
    type Key = SqlKey;

    fn event_key(req: &Slot<RedisRequest>, resp: &Slot<RedisResponse>) -> Option<SqlKey> {
        Some(SqlKey {
            query: first_word(&req.value.command).to_owned(),
            status: !resp.value.is_error,
        })
    }

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<SqlKey> {
        &mut aggs.redis
    }
}
