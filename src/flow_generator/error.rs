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

use std::str::Utf8Error;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("zero payload len")]
    ZeroPayloadLen,
    #[error("invalid packet length {0}")]
    InvalidPacketLength(usize),
    #[error("unknown packet event type {0}")]
    UnknownEventType(u8),
    #[error("invalid address family {0}")]
    InvalidAddressFamily(u8),
    #[error("dubbo header parse failed")]
    DubboHeaderParseFailed,
    #[error("{0}")]
    DubboLogParseFailed(&'static str),
    #[error("http header parse failed")]
    HttpHeaderParseFailed,
    #[error("{0}")]
    KafkaLogParseFailed(&'static str),
    #[error("kafka api {0} version {1} not supported")]
    KafkaVersionUnsupported(u16, u16),
    #[error("{0}")]
    RedisLogParseFailed(&'static str),
    #[error("{0}")]
    MysqlLogParseFailed(&'static str),
    #[error("{0}")]
    PostgreLogParseFailed(&'static str),
    #[error("{0}")]
    DNSLogParseFailed(String),
    #[error("l7 protocol unknown")]
    L7ProtocolUnknown,
    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),
    // need more data, buffered until the next packet of the same direction
    #[error("need more data")]
    NeedMoreData,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Self::HttpHeaderParseFailed
    }
}
