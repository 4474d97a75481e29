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
        ControlKind, L7Message, L7ProtocolInfoInterface, L7ProtocolParserInterface, ParseParam,
    },
    flow_generator::{
        aggregator::ProtocolAggregator,
        error::{Error, Result},
        perf::Slot,
        protocol_logs::{consts::*, first_word, L7ProtocolEvent, ProtocolEventAggregators},
    },
};

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MysqlHeader {
    pub length: u32,
    pub number: u8,
}

impl MysqlHeader {
    pub fn decode(cursor: &mut ByteCursor) -> Result<Self> {
        let length = cursor.read_u24(true);
        let number = cursor.read_u8(true);
        if !cursor.ok() {
            return Err(Error::MysqlLogParseFailed("mysql header too short"));
        }
        Ok(Self { length, number })
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct MysqlRequest {
    pub command: u8,
    // keyword of COM_QUERY, full statement or schema name of the other collected commands
    pub context: String,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct MysqlResponse {
    pub ok: bool,
    pub affected_rows: u64,
    pub error_code: Option<u16>,
    pub sql_state: String,
    pub error_message: String,
}

impl L7ProtocolInfoInterface for MysqlRequest {}
impl L7ProtocolInfoInterface for MysqlResponse {}

#[derive(Clone, Debug, Default)]
pub struct MysqlLog;

// drops the trailing NUL some clients send
fn mysql_string(payload: &[u8]) -> String {
    let payload = payload.strip_suffix(&[0]).unwrap_or(payload);
    String::from_utf8_lossy(payload).into_owned()
}

// length-encoded integer
fn read_int(cursor: &mut ByteCursor) -> u64 {
    match cursor.read_u8(true) {
        INT_FLAGS_NULL => 0,
        INT_FLAGS_2 => cursor.read_u16(true) as u64,
        INT_FLAGS_3 => cursor.read_u24(true) as u64,
        INT_FLAGS_8 => cursor.read_u64(true),
        v => v as u64,
    }
}

impl MysqlLog {
    fn parse(payload: &[u8], truncated: bool) -> Result<L7Message<MysqlRequest, MysqlResponse>> {
        let mut cursor = ByteCursor::little_endian(payload);
        let header = MysqlHeader::decode(&mut cursor)?;
        if header.length == 0 {
            return Err(Error::MysqlLogParseFailed("mysql empty packet"));
        }
        if !truncated && header.length as usize > cursor.remaining() {
            return Err(Error::NeedMoreData);
        }
        let packet_end = (HEADER_LEN + header.length as usize).min(payload.len());
        let body = &payload[HEADER_LEN..packet_end];
        if body.is_empty() {
            return Err(Error::MysqlLogParseFailed("mysql packet truncated"));
        }

        if header.number == 0 {
            if body[0] == PROTOCOL_VERSION && header.length as usize > SERVER_GREETING_MIN_LEN {
                return Ok(L7Message::Control(ControlKind::Greeting));
            }
            return Self::request(body);
        }

        // a lone column count packet starts a result set
        if header.length == 1 && header.number == 1 && payload.len() > HEADER_LEN + 1 {
            return Ok(L7Message::Response(MysqlResponse {
                ok: true,
                ..Default::default()
            }));
        }
        match body[0] {
            MYSQL_RESPONSE_CODE_OK if header.number == 1 => {
                let mut cursor = ByteCursor::little_endian(&body[1..]);
                let affected_rows = read_int(&mut cursor);
                Ok(L7Message::Response(MysqlResponse {
                    ok: true,
                    affected_rows,
                    ..Default::default()
                }))
            }
            MYSQL_RESPONSE_CODE_ERR if header.number == 1 => Ok(L7Message::Response(
                Self::error_response(&body[1..]),
            )),
            _ if header.length as usize > LOGIN_MIN_LEN
                && payload.get(LOGIN_FILLER_OFFSET_A) == Some(&0)
                && payload.get(LOGIN_FILLER_OFFSET_B) == Some(&0) =>
            {
                Ok(L7Message::Control(ControlKind::Login))
            }
            _ => Err(Error::MysqlLogParseFailed("mysql unknown packet")),
        }
    }

    fn request(body: &[u8]) -> Result<L7Message<MysqlRequest, MysqlResponse>> {
        let command = body[0];
        let rest = &body[1..];
        match command {
            COM_QUERY => {
                let context = mysql_string(rest);
                Ok(L7Message::Request(MysqlRequest {
                    command,
                    context: first_word(&context).to_owned(),
                }))
            }
            COM_STMT_PREPARE | COM_CREATE_DB | COM_DROP_DB => Ok(L7Message::Request(MysqlRequest {
                command,
                context: mysql_string(rest),
            })),
            COM_INIT_DB | COM_FIELD_LIST | COM_REFRESH | COM_SHUTDOWN | COM_STATISTICS
            | COM_PROCESS_INFO | COM_CONNECT | COM_PROCESS_KILL | COM_DEBUG | COM_PING
            | COM_TIME | COM_DELAYED_INSERT | COM_CHANGE_USER | COM_BINLOG_DUMP
            | COM_TABLE_DUMP | COM_CONNECT_OUT | COM_REGISTER_SLAVE | COM_STMT_EXECUTE
            | COM_STMT_RESET | COM_SET_OPTION | COM_STMT_FETCH => {
                Ok(L7Message::Control(ControlKind::Ignore))
            }
            COM_STMT_SEND_LONG_DATA | COM_STMT_CLOSE | COM_QUIT => {
                Ok(L7Message::Control(ControlKind::NoResponse))
            }
            _ => Err(Error::MysqlLogParseFailed("mysql unknown command")),
        }
    }

    fn error_response(body: &[u8]) -> MysqlResponse {
        let mut cursor = ByteCursor::little_endian(body);
        let code = cursor.read_u16(true);
        let error_code = cursor.ok().then_some(code);
        let mut sql_state = String::new();
        if cursor.peek_at(cursor.position()) == Some(SQL_STATE_MARKER) {
            cursor.skip(1);
            let state = cursor.read_bytes(SQL_STATE_LEN);
            sql_state = String::from_utf8_lossy(state).into_owned();
        }
        let error_message = mysql_string(cursor.read_remaining());
        MysqlResponse {
            ok: false,
            affected_rows: 0,
            error_code,
            sql_state,
            error_message,
        }
    }
}

impl L7ProtocolParserInterface for MysqlLog {
    type Request = MysqlRequest;
    type Response = MysqlResponse;

    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        match Self::parse(payload, param.truncated) {
            Ok(L7Message::Request(req)) => req.context.is_ascii(),
            Ok(L7Message::Control(ControlKind::Greeting)) => true,
            _ => false,
        }
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<MysqlRequest, MysqlResponse>> {
        Self::parse(payload, param.truncated)
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::MySQL
    }
}

impl L7ProtocolEvent for MysqlLog {
    type Key = SqlKey;

    fn event_key(req: &Slot<MysqlRequest>, resp: &Slot<MysqlResponse>) -> Option<SqlKey> {
        Some(SqlKey {
            query: req.value.context.clone(),
            status: resp.value.ok,
        })
    }

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<SqlKey> {
        &mut aggs.mysql
    }
}
