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
use num_enum::TryFromPrimitive;
use serde::Serialize;

use public::{bytes::ByteCursor, l7_protocol::L7Protocol};

use crate::{
    common::l7_protocol_log::{
        L7Message, L7ProtocolInfoInterface, L7ProtocolParserInterface, LogMessageType, ParseParam,
    },
    flow_generator::{
        aggregator::ProtocolAggregator,
        error::{Error, Result},
        perf::Slot,
        protocol_logs::{consts::*, L7ProtocolEvent, L7RequestKey, ProtocolEventAggregators},
    },
};

// only the head of a response body is needed to find the topic and the error code
const KAFKA_RESP_BODY_KEEP: usize = 512;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u16)]
pub enum KafkaApiKey {
    Produce = 0,
    Fetch = 1,
    ListOffsets = 2,
    Metadata = 3,
    LeaderAndIsr = 4,
    StopReplica = 5,
    UpdateMetadata = 6,
    ControlledShutdown = 7,
    OffsetCommit = 8,
    OffsetFetch = 9,
    FindCoordinator = 10,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
    SyncGroup = 14,
    DescribeGroups = 15,
    ListGroups = 16,
    SaslHandshake = 17,
    ApiVersions = 18,
    CreateTopics = 19,
    DeleteTopics = 20,
    DeleteRecords = 21,
    InitProducerId = 22,
    OffsetForLeaderEpoch = 23,
    AddPartitionsToTxn = 24,
    AddOffsetsToTxn = 25,
    EndTxn = 26,
    WriteTxnMarkers = 27,
    TxnOffsetCommit = 28,
    DescribeAcls = 29,
    CreateAcls = 30,
    DeleteAcls = 31,
    DescribeConfigs = 32,
    AlterConfigs = 33,
    AlterReplicaLogDirs = 34,
    DescribeLogDirs = 35,
    SaslAuthenticate = 36,
    CreatePartitions = 37,
    CreateDelegationToken = 38,
    RenewDelegationToken = 39,
    ExpireDelegationToken = 40,
    DescribeDelegationToken = 41,
    DeleteGroups = 42,
    ElectLeaders = 43,
    IncrementalAlterConfigs = 44,
    AlterPartitionReassignments = 45,
    ListPartitionReassignments = 46,
    OffsetDelete = 47,
    DescribeClientQuotas = 48,
    AlterClientQuotas = 49,
    DescribeUserScramCredentials = 50,
    AlterUserScramCredentials = 51,
    AlterIsr = 56,
    UpdateFeatures = 57,
    DescribeCluster = 60,
    DescribeProducers = 61,
}

impl KafkaApiKey {
    /// Supported `(min, max, flexible)` versions, `flexible` is the first version using tagged
    /// fields and compact encodings.
    pub fn versions(&self) -> (u16, u16, Option<u16>) {
        use KafkaApiKey::*;
        match self {
            Produce => (1, 9, Some(9)),
            Fetch => (0, 12, Some(12)),
            ListOffsets => (0, 7, Some(6)),
            Metadata => (0, 12, Some(9)),
            LeaderAndIsr => (0, 5, Some(4)),
            StopReplica => (0, 3, Some(2)),
            UpdateMetadata => (0, 7, Some(6)),
            ControlledShutdown => (0, 3, Some(3)),
            OffsetCommit => (0, 8, Some(8)),
            OffsetFetch => (0, 8, Some(6)),
            FindCoordinator => (0, 4, Some(3)),
            JoinGroup => (0, 7, Some(6)),
            Heartbeat => (0, 4, Some(4)),
            LeaveGroup => (0, 4, Some(4)),
            SyncGroup => (0, 5, Some(4)),
            DescribeGroups => (0, 5, Some(5)),
            ListGroups => (0, 4, Some(3)),
            SaslHandshake => (0, 1, None),
            ApiVersions => (0, 3, Some(3)),
            CreateTopics => (0, 7, Some(5)),
            DeleteTopics => (0, 6, Some(4)),
            DeleteRecords => (0, 2, Some(2)),
            InitProducerId => (0, 4, Some(2)),
            OffsetForLeaderEpoch => (0, 4, Some(4)),
            AddPartitionsToTxn => (0, 3, Some(3)),
            AddOffsetsToTxn => (0, 3, Some(3)),
            EndTxn => (0, 3, Some(3)),
            WriteTxnMarkers => (0, 1, Some(1)),
            TxnOffsetCommit => (0, 3, Some(3)),
            DescribeAcls => (0, 2, Some(2)),
            CreateAcls => (0, 2, Some(2)),
            DeleteAcls => (0, 2, Some(2)),
            DescribeConfigs => (0, 4, Some(4)),
            AlterConfigs => (0, 2, Some(2)),
            AlterReplicaLogDirs => (0, 2, Some(2)),
            DescribeLogDirs => (0, 2, Some(2)),
            SaslAuthenticate => (0, 2, Some(2)),
            CreatePartitions => (0, 3, Some(2)),
            CreateDelegationToken => (0, 2, Some(2)),
            RenewDelegationToken => (0, 2, Some(2)),
            ExpireDelegationToken => (0, 2, Some(2)),
            DescribeDelegationToken => (0, 2, Some(2)),
            DeleteGroups => (0, 2, Some(2)),
            ElectLeaders => (0, 2, Some(2)),
            IncrementalAlterConfigs => (0, 1, Some(1)),
            AlterPartitionReassignments => (0, 0, Some(0)),
            ListPartitionReassignments => (0, 0, Some(0)),
            OffsetDelete => (0, 0, None),
            DescribeClientQuotas => (0, 1, Some(1)),
            AlterClientQuotas => (0, 1, Some(1)),
            DescribeUserScramCredentials => (0, 0, Some(0)),
            AlterUserScramCredentials => (0, 0, Some(0)),
            AlterIsr => (0, 0, Some(0)),
            UpdateFeatures => (0, 0, Some(0)),
            DescribeCluster => (0, 0, Some(0)),
            DescribeProducers => (0, 0, Some(0)),
        }
    }

    pub fn is_supported(&self, version: u16) -> bool {
        let (min, max, _) = self.versions();
        min <= version && version <= max
    }

    pub fn is_flexible(&self, version: u16) -> bool {
        match self.versions().2 {
            Some(flexible) => self.is_supported(version) && flexible <= version,
            None => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use KafkaApiKey::*;
        match self {
            Produce => "produce",
            Fetch => "fetch",
            ListOffsets => "list_offsets",
            Metadata => "metadata",
            LeaderAndIsr => "leader_and_isr",
            StopReplica => "stop_replica",
            UpdateMetadata => "update_metadata",
            ControlledShutdown => "controlled_shutdown",
            OffsetCommit => "offset_commit",
            OffsetFetch => "offset_fetch",
            FindCoordinator => "find_coordinator",
            JoinGroup => "join_group",
            Heartbeat => "heartbeat",
            LeaveGroup => "leave_group",
            SyncGroup => "sync_group",
            DescribeGroups => "describe_groups",
            ListGroups => "list_groups",
            SaslHandshake => "sasl_handshake",
            ApiVersions => "api_versions",
            CreateTopics => "create_topics",
            DeleteTopics => "delete_topics",
            DeleteRecords => "delete_records",
            InitProducerId => "init_producer_id",
            OffsetForLeaderEpoch => "offset_for_leader_epoch",
            AddPartitionsToTxn => "add_partitions_to_txn",
            AddOffsetsToTxn => "add_offsets_to_txn",
            EndTxn => "end_txn",
            WriteTxnMarkers => "write_txn_markers",
            TxnOffsetCommit => "txn_offset_commit",
            DescribeAcls => "describe_acls",
            CreateAcls => "create_acls",
            DeleteAcls => "delete_acls",
            DescribeConfigs => "describe_configs",
            AlterConfigs => "alter_configs",
            AlterReplicaLogDirs => "alter_replica_log_dirs",
            DescribeLogDirs => "describe_log_dirs",
            SaslAuthenticate => "sasl_authenticate",
            CreatePartitions => "create_partitions",
            CreateDelegationToken => "create_delegation_token",
            RenewDelegationToken => "renew_delegation_token",
            ExpireDelegationToken => "expire_delegation_token",
            DescribeDelegationToken => "describe_delegation_token",
            DeleteGroups => "delete_groups",
            ElectLeaders => "elect_leaders",
            IncrementalAlterConfigs => "incremental_alter_configs",
            AlterPartitionReassignments => "alter_partition_reassignments",
            ListPartitionReassignments => "list_partition_reassignments",
            OffsetDelete => "offset_delete",
            DescribeClientQuotas => "describe_client_quotas",
            AlterClientQuotas => "alter_client_quotas",
            DescribeUserScramCredentials => "describe_user_scram_credentials",
            AlterUserScramCredentials => "alter_user_scram_credentials",
            AlterIsr => "alter_isr",
            UpdateFeatures => "update_features",
            DescribeCluster => "describe_cluster",
            DescribeProducers => "describe_producers",
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct KafkaRequest {
    pub api_key: u16,
    pub api_version: u16,
    pub correlation_id: u32,
    pub client_id: String,
    // first topic of produce and fetch requests
    pub topic: String,
    pub acks: Option<u16>,
    pub timeout_ms: Option<u32>,
}

impl KafkaRequest {
    pub fn api(&self) -> Option<KafkaApiKey> {
        KafkaApiKey::try_from(self.api_key).ok()
    }

    pub fn api_name(&self) -> &'static str {
        self.api().map(|a| a.as_str()).unwrap_or(UNKNOWN)
    }
}

/// The body is decoded once the request, and with it the api key and version, is known.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct KafkaResponse {
    pub correlation_id: u32,
    #[serde(skip)]
    pub body: Vec<u8>,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct KafkaResponseInfo {
    pub topic: String,
    // partition count of produce responses, first partition index of fetch responses
    pub partition_id: u32,
    pub code: u16,
}

impl KafkaResponse {
    pub fn decode(&self, api: KafkaApiKey, version: u16) -> Result<KafkaResponseInfo> {
        let mut cursor = ByteCursor::big_endian(&self.body);
        let flexible = api.is_flexible(version);
        if flexible {
            read_tags(&mut cursor)?;
        }
        let mut info = KafkaResponseInfo::default();
        match api {
            KafkaApiKey::Produce => {
                let topics = read_array_size(&mut cursor, flexible)?;
                if topics > 0 {
                    info.topic = read_string(&mut cursor, flexible)?;
                    let partitions = read_array_size(&mut cursor, flexible)?;
                    info.partition_id = partitions as u32;
                    if partitions > 0 {
                        cursor.skip(4);
                        info.code = cursor.read_u16(true);
                    }
                }
            }
            KafkaApiKey::Fetch => {
                if version >= 1 {
                    // throttle_time_ms
                    cursor.skip(4);
                }
                if version >= 7 {
                    info.code = cursor.read_u16(true);
                    // session_id
                    cursor.skip(4);
                }
                let topics = read_array_size(&mut cursor, flexible)?;
                if topics > 0 {
                    info.topic = read_string(&mut cursor, flexible)?;
                    if version < 7 {
                        let partitions = read_array_size(&mut cursor, flexible)?;
                        if partitions > 0 {
                            info.partition_id = cursor.read_u32(true);
                            info.code = cursor.read_u16(true);
                        }
                    }
                }
            }
            _ => (),
        }
        if !cursor.ok() {
            return Err(Error::KafkaLogParseFailed(cursor.fail_msg()));
        }
        Ok(info)
    }
}

impl L7ProtocolInfoInterface for KafkaRequest {
    fn session_id(&self) -> Option<u64> {
        Some(self.correlation_id as u64)
    }
}

impl L7ProtocolInfoInterface for KafkaResponse {
    fn session_id(&self) -> Option<u64> {
        Some(self.correlation_id as u64)
    }
}

fn read_varint_len(cursor: &mut ByteCursor) -> Result<i64> {
    let v = cursor.read_varint::<32>(true);
    if !cursor.ok() {
        return Err(Error::KafkaLogParseFailed("kafka varint invalid"));
    }
    Ok(v)
}

fn read_tags(cursor: &mut ByteCursor) -> Result<()> {
    let num = read_varint_len(cursor)?;
    for _ in 0..num.max(0) {
        let _tag = read_varint_len(cursor)?;
        let len = read_varint_len(cursor)?;
        cursor.skip(len.max(0) as usize);
    }
    if !cursor.ok() {
        return Err(Error::KafkaLogParseFailed("kafka tagged fields invalid"));
    }
    Ok(())
}

// -1 is a null array
fn read_array_size(cursor: &mut ByteCursor, compact: bool) -> Result<usize> {
    let size = if compact {
        read_varint_len(cursor)? - 1
    } else {
        cursor.read_u32(true) as i32 as i64
    };
    if !cursor.ok() || size < -1 {
        return Err(Error::KafkaLogParseFailed("kafka array size invalid"));
    }
    Ok(size.max(0) as usize)
}

fn read_nullable_string(cursor: &mut ByteCursor, compact: bool) -> Result<Option<String>> {
    let len = if compact {
        read_varint_len(cursor)? - 1
    } else {
        cursor.read_u16(true) as i16 as i64
    };
    if !cursor.ok() || len < -1 {
        return Err(Error::KafkaLogParseFailed("kafka string length invalid"));
    }
    if len == -1 {
        return Ok(None);
    }
    let s = cursor.read_bytes(len as usize);
    if !cursor.ok() {
        return Err(Error::KafkaLogParseFailed("kafka string truncated"));
    }
    Ok(Some(String::from_utf8_lossy(s).into_owned()))
}

fn read_string(cursor: &mut ByteCursor, compact: bool) -> Result<String> {
    read_nullable_string(cursor, compact)?
        .ok_or(Error::KafkaLogParseFailed("kafka string is null"))
}

#[derive(Clone, Debug, Default)]
pub struct KafkaLog;

impl KafkaLog {
    fn parse_produce_request(cursor: &mut ByteCursor, req: &mut KafkaRequest) -> Result<()> {
        let compact = req.api_version >= 9;
        if req.api_version >= 3 {
            // transactional_id
            let _ = read_nullable_string(cursor, compact)?;
        }
        req.acks = Some(cursor.read_u16(true));
        req.timeout_ms = Some(cursor.read_u32(true));
        if read_array_size(cursor, compact)? > 0 {
            req.topic = read_string(cursor, compact)?;
        }
        Ok(())
    }

    fn parse_fetch_request(cursor: &mut ByteCursor, req: &mut KafkaRequest) -> Result<()> {
        let compact = req.api_version >= 12;
        // replica_id, max_wait_ms, min_bytes
        cursor.skip(12);
        if req.api_version >= 3 {
            // max_bytes
            cursor.skip(4);
        }
        if req.api_version >= 4 {
            // isolation_level
            cursor.skip(1);
        }
        if req.api_version >= 7 {
            // session_id, session_epoch
            cursor.skip(8);
        }
        if read_array_size(cursor, compact)? > 0 {
            req.topic = read_string(cursor, compact)?;
        }
        Ok(())
    }

    fn parse_request(payload: &[u8], truncated: bool) -> Result<KafkaRequest> {
        let mut cursor = ByteCursor::big_endian(payload);
        let len = cursor.read_u32(true);
        if !cursor.ok() || len < KAFKA_REQ_MIN_LEN {
            return Err(Error::KafkaLogParseFailed("kafka request length invalid"));
        }
        if len as usize > cursor.remaining() && !truncated {
            return Err(Error::NeedMoreData);
        }
        let mut req = KafkaRequest {
            api_key: cursor.read_u16(true),
            api_version: cursor.read_u16(true),
            correlation_id: cursor.read_u32(true),
            ..Default::default()
        };
        let api = req.api();
        if let Some(api) = api {
            if !api.is_supported(req.api_version) {
                return Err(Error::KafkaVersionUnsupported(req.api_key, req.api_version));
            }
        }
        let client_id_len = cursor.read_u16(true) as i16;
        if client_id_len > 0 {
            let client_id = cursor.read_bytes(client_id_len as usize);
            req.client_id = String::from_utf8_lossy(client_id).into_owned();
        }
        if !cursor.ok() {
            return Err(Error::KafkaLogParseFailed("kafka request header invalid"));
        }
        let Some(api) = api else {
            return Ok(req);
        };
        let body = (|| {
            if api.is_flexible(req.api_version) {
                read_tags(&mut cursor)?;
            }
            match api {
                KafkaApiKey::Produce => Self::parse_produce_request(&mut cursor, &mut req),
                KafkaApiKey::Fetch => Self::parse_fetch_request(&mut cursor, &mut req),
                _ => Ok(()),
            }
        })();
        match body {
            Ok(()) if cursor.ok() => Ok(req),
            // the head of a cut request still tells the api and the correlation id
            _ if truncated => Ok(req),
            Ok(()) => Err(Error::KafkaLogParseFailed(cursor.fail_msg())),
            Err(e) => Err(e),
        }
    }

    fn parse_response(payload: &[u8], truncated: bool) -> Result<KafkaResponse> {
        let mut cursor = ByteCursor::big_endian(payload);
        let len = cursor.read_u32(true);
        let correlation_id = cursor.read_u32(true);
        if !cursor.ok() || len < KAFKA_RESP_MIN_LEN {
            return Err(Error::KafkaLogParseFailed("kafka response length invalid"));
        }
        if len as usize > payload.len() - 4 && !truncated {
            return Err(Error::NeedMoreData);
        }
        let body = cursor.read_remaining();
        Ok(KafkaResponse {
            correlation_id,
            body: body[..body.len().min(KAFKA_RESP_BODY_KEEP)].to_vec(),
        })
    }

    // a known api with a supported version is a strong hint for a request
    fn looks_like_request(payload: &[u8]) -> bool {
        let mut cursor = ByteCursor::big_endian(payload);
        let len = cursor.read_u32(true);
        let api_key = cursor.read_u16(true);
        let version = cursor.read_u16(true);
        cursor.ok()
            && len >= KAFKA_REQ_MIN_LEN
            && KafkaApiKey::try_from(api_key)
                .map(|api| api.is_supported(version))
                .unwrap_or(false)
    }
}

impl L7ProtocolParserInterface for KafkaLog {
    type Request = KafkaRequest;
    type Response = KafkaResponse;

    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if !Self::looks_like_request(payload) {
            return false;
        }
        match Self::parse_request(payload, param.truncated) {
            Ok(req) => req.client_id.is_ascii(),
            Err(_) => false,
        }
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<KafkaRequest, KafkaResponse>> {
        let is_request = match param.msg_type {
            LogMessageType::Request => true,
            LogMessageType::Response => false,
            LogMessageType::Other => Self::looks_like_request(payload),
        };
        if is_request {
            Self::parse_request(payload, param.truncated).map(L7Message::Request)
        } else {
            Self::parse_response(payload, param.truncated).map(L7Message::Response)
        }
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Kafka
    }
}

impl L7ProtocolEvent for KafkaLog {
    type Key = L7RequestKey;

    const STITCH_BY_ID: bool = true;

    fn event_key(req: &Slot<KafkaRequest>, resp: &Slot<KafkaResponse>) -> Option<L7RequestKey> {
        let req = &req.value;
        let mut key = L7RequestKey {
            version: req.api_version.to_string(),
            req_domain: req.topic.clone(),
            req_type: req.api_name().to_owned(),
            ..Default::default()
        };
        if let Some(api) = req.api() {
            match resp.value.decode(api, req.api_version) {
                Ok(info) => {
                    key.resp_code = info.code as i16 as i32;
                    if key.req_domain.is_empty() {
                        key.req_domain = info.topic;
                    }
                }
                Err(e) => debug!(
                    "kafka {} v{} response decode failed: {}",
                    api.as_str(),
                    req.api_version,
                    e
                ),
            }
        }
        Some(key)
    }

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<L7RequestKey> {
        &mut aggs.kafka
    }
}
