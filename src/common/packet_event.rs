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
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use public::{bytes::ByteCursor, l7_protocol::L7Protocol};

use crate::flow_generator::error::{Error, Result};

pub const PACKET_EVENT_HEADER_SIZE: usize = 60;
pub const PACKET_EVENT_DATA_HEADER_SIZE: usize = 12;

const AF_INET: u8 = 4;
const AF_INET6: u8 = 6;

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PacketEventType {
    None = 0,
    Data = 1,
    Connected = 2,
    Accepted = 3,
    Closed = 4,
}

impl Default for PacketEventType {
    fn default() -> Self {
        PacketEventType::None
    }
}

#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PacketRole {
    Unknown = 0,
    Client = 1,
    Server = 2,
}

impl Default for PacketRole {
    fn default() -> Self {
        PacketRole::Unknown
    }
}

impl PacketRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketRole::Unknown => "u",
            PacketRole::Client => "c",
            PacketRole::Server => "s",
        }
    }
}

impl fmt::Display for PacketRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// direction of the payload relative to the traced socket
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PacketType {
    In = 0,
    Out = 1,
}

impl Default for PacketType {
    fn default() -> Self {
        PacketType::In
    }
}

// message type hint from the capture layer
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessageType {
    Unknown = 0,
    Request = 1,
    Response = 2,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown
    }
}

/// Socket level header of every captured event.
///
/// `src_*` is the traced socket and `dst_*` its peer, whatever the payload direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PacketEventHeader {
    pub pid: u32,
    pub event_type: PacketEventType,
    pub time_nano: u64,
    #[serde(default)]
    pub sock_hash: u64,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    #[serde(default)]
    pub role: PacketRole,
}

impl Default for PacketEventHeader {
    fn default() -> Self {
        Self {
            pid: 0,
            event_type: PacketEventType::None,
            time_nano: 0,
            sock_hash: 0,
            src_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            role: PacketRole::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketEventData {
    pub pkt_type: PacketType,
    #[serde(default)]
    pub msg_type: MessageType,
    #[serde(default)]
    pub protocol: L7Protocol,
    #[serde(with = "hex_buffer")]
    pub buffer: Vec<u8>,
    // bytes seen by the kernel, larger than `buffer` when truncated by capture
    #[serde(default)]
    pub real_len: u32,
}

impl PacketEventData {
    pub fn real_len(&self) -> u32 {
        self.real_len.max(self.buffer.len() as u32)
    }

    pub fn is_truncated(&self) -> bool {
        self.real_len as usize > self.buffer.len()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketEvent {
    pub header: PacketEventHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PacketEventData>,
}

fn read_addr(cursor: &mut ByteCursor, family: u8) -> Result<IpAddr> {
    let bs = cursor.read_bytes(16);
    if !cursor.ok() {
        return Err(Error::InvalidPacketLength(cursor.len()));
    }
    match family {
        AF_INET => Ok(IpAddr::V4(Ipv4Addr::new(bs[0], bs[1], bs[2], bs[3]))),
        AF_INET6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bs);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(Error::InvalidAddressFamily(family)),
    }
}

fn write_addr(buf: &mut Vec<u8>, addr: &IpAddr) {
    let mut octets = [0u8; 16];
    match addr {
        IpAddr::V4(a) => octets[..4].copy_from_slice(&a.octets()),
        IpAddr::V6(a) => octets.copy_from_slice(&a.octets()),
    }
    buf.extend_from_slice(&octets);
}

impl PacketEvent {
    /// Decodes the little-endian raw layout delivered by the capture layer:
    ///
    /// ```text
    /// header  pid u32 | event_type u8 | role u8 | family u8 | pad u8 | time_nano u64
    ///         | sock_hash u64 | src_port u16 | dst_port u16 | src_addr [16] | dst_addr [16]
    /// data    pkt_type u8 | msg_type u8 | protocol u8 | pad u8 | buffer_len u32 | real_len u32
    ///         | buffer
    /// ```
    ///
    /// The data part is only present for `Data` events.
    pub fn decode(bs: &[u8]) -> Result<Self> {
        if bs.len() < PACKET_EVENT_HEADER_SIZE {
            return Err(Error::InvalidPacketLength(bs.len()));
        }
        let mut cursor = ByteCursor::little_endian(bs);
        let pid = cursor.read_u32(true);
        let event_type = cursor.read_u8(true);
        let event_type =
            PacketEventType::try_from(event_type).map_err(|_| Error::UnknownEventType(event_type))?;
        let role = PacketRole::try_from(cursor.read_u8(true)).unwrap_or_default();
        let family = cursor.read_u8(true);
        cursor.skip(1);
        let time_nano = cursor.read_u64(true);
        let sock_hash = cursor.read_u64(true);
        let src_port = cursor.read_u16(true);
        let dst_port = cursor.read_u16(true);
        let src_addr = read_addr(&mut cursor, family)?;
        let dst_addr = read_addr(&mut cursor, family)?;
        let header = PacketEventHeader {
            pid,
            event_type,
            time_nano,
            sock_hash,
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            role,
        };
        if event_type != PacketEventType::Data {
            return Ok(Self { header, data: None });
        }

        if cursor.remaining() < PACKET_EVENT_DATA_HEADER_SIZE {
            return Err(Error::InvalidPacketLength(bs.len()));
        }
        let pkt_type = PacketType::try_from(cursor.read_u8(true)).unwrap_or_default();
        let msg_type = MessageType::try_from(cursor.read_u8(true)).unwrap_or_default();
        let protocol = L7Protocol::from(cursor.read_u8(true));
        cursor.skip(1);
        let buffer_len = cursor.read_u32(true) as usize;
        let real_len = cursor.read_u32(true);
        let buffer = cursor.read_bytes(buffer_len);
        if !cursor.ok() {
            return Err(Error::InvalidPacketLength(bs.len()));
        }
        Ok(Self {
            header,
            data: Some(PacketEventData {
                pkt_type,
                msg_type,
                protocol,
                buffer: buffer.to_vec(),
                real_len,
            }),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let h = &self.header;
        let mut buf = Vec::with_capacity(
            PACKET_EVENT_HEADER_SIZE
                + PACKET_EVENT_DATA_HEADER_SIZE
                + self.data.as_ref().map(|d| d.buffer.len()).unwrap_or_default(),
        );
        buf.extend_from_slice(&h.pid.to_le_bytes());
        buf.push(h.event_type.into());
        buf.push(h.role.into());
        buf.push(if h.src_addr.is_ipv4() && h.dst_addr.is_ipv4() {
            AF_INET
        } else {
            AF_INET6
        });
        buf.push(0);
        buf.extend_from_slice(&h.time_nano.to_le_bytes());
        buf.extend_from_slice(&h.sock_hash.to_le_bytes());
        buf.extend_from_slice(&h.src_port.to_le_bytes());
        buf.extend_from_slice(&h.dst_port.to_le_bytes());
        if h.src_addr.is_ipv4() && h.dst_addr.is_ipv4() {
            write_addr(&mut buf, &h.src_addr);
            write_addr(&mut buf, &h.dst_addr);
        } else {
            write_addr(&mut buf, &to_ipv6(h.src_addr));
            write_addr(&mut buf, &to_ipv6(h.dst_addr));
        }
        if let Some(d) = self.data.as_ref() {
            buf.push(d.pkt_type.into());
            buf.push(d.msg_type.into());
            buf.push(d.protocol.into());
            buf.push(0);
            buf.extend_from_slice(&(d.buffer.len() as u32).to_le_bytes());
            buf.extend_from_slice(&d.real_len.to_le_bytes());
            buf.extend_from_slice(&d.buffer);
        }
        buf
    }
}

fn to_ipv6(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(a) => IpAddr::V6(a.to_ipv6_mapped()),
        a => a,
    }
}

mod hex_buffer {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(D::Error::custom)
    }
}
