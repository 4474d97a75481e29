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

pub mod aggregator;
pub mod error;
mod flow_map;
pub mod perf;
pub mod protocol_logs;
pub mod session;

pub use aggregator::{ConnKey, L7Record, ProtocolAggregator};
pub use error::{Error, Result};
pub use flow_map::{FlowMap, FlowMapCounter, ProtocolDebugStatistic};
pub use perf::{IdStitchingCache, Slot, StitchPolicy, StitchStats, StitchingCache};
pub use protocol_logs::{
    infer_protocol, DnsLog, DubboLog, HttpLog, KafkaLog, MysqlLog, PostgresqlLog, RedisLog,
};
pub use session::{DataOutcome, L7Session, L7SessionInterface, SessionConfig};
