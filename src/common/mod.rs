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

pub mod l7_protocol_log;
pub mod packet_event;

pub use l7_protocol_log::{
    ControlKind, L7Message, L7ParseResult, L7ProtocolInfoInterface, L7ProtocolParserInterface,
    LogMessageType, ParseParam,
};
pub use packet_event::{
    MessageType, PacketEvent, PacketEventData, PacketEventHeader, PacketEventType, PacketRole,
    PacketType,
};
