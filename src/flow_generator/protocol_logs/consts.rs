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

/// HTTP constants
pub const HTTP_PORT: u16 = 80;
pub const HTTP_V1_0_VERSION: &str = "HTTP/1.0";
pub const HTTP_V1_1_VERSION: &str = "HTTP/1.1";
pub const HTTP_V1_VERSION_LEN: usize = 8;
pub const HTTP_STATUS_CODE_MIN: u16 = 100;
pub const HTTP_STATUS_CODE_MAX: u16 = 600;
pub const HTTP_RESP_MIN_LEN: usize = 12; // 响应行："HTTP/1.1 200"
pub const HTTP_LINE_END: &[u8] = b"\r\n";
pub const HTTP_CHUNKED_END: &[u8] = b"0\r\n\r\n";

// Kafka constants
pub const KAFKA_PORT: u16 = 9092;
pub const KAFKA_REQ_MIN_LEN: u32 = 16;
pub const KAFKA_RESP_MIN_LEN: u32 = 8;

// dubbo constants
pub const DUBBO_MAGIC_HIGH: u8 = 0xda;
pub const DUBBO_MAGIC_LOW: u8 = 0xbb;
pub const DUBBO_HEADER_LEN: usize = 16;
pub const DUBBO_PORT: u16 = 20880;

// response status code
// 参考：https://dubbo.apache.org/zh/blog/2018/10/05/dubbo-%E5%8D%8F%E8%AE%AE%E8%AF%A6%E8%A7%A3/#%E5%8D%8F%E8%AE%AE%E8%AF%A6%E6%83%85
pub const OK: u8 = 20;
pub const SERVICE_NOT_FOUND: u8 = 60;

pub const DUBBO_SERIALIZATION_HESSIAN2: u8 = 2;
pub const DUBBO_SERIALIZATION_FASTJSON: u8 = 6;

// Mysql constants
pub const MYSQL_PORT: u16 = 3306;
pub const PROTOCOL_VERSION: u8 = 10;

// Header
pub const HEADER_LEN: usize = 4;

// Greeting
pub const SERVER_GREETING_MIN_LEN: usize = 60;

// Login request, the filler after client flags and charset is all zero
pub const LOGIN_MIN_LEN: usize = 31;
pub const LOGIN_FILLER_OFFSET_A: usize = 13;
pub const LOGIN_FILLER_OFFSET_B: usize = 35;

// int
pub const INT_FLAGS_NULL: u8 = 0xfb;
pub const INT_FLAGS_2: u8 = 0xfc;
pub const INT_FLAGS_3: u8 = 0xfd;
pub const INT_FLAGS_8: u8 = 0xfe;

pub const SQL_STATE_LEN: usize = 5;
pub const SQL_STATE_MARKER: u8 = b'#';

pub const MYSQL_RESPONSE_CODE_OK: u8 = 0;
pub const MYSQL_RESPONSE_CODE_ERR: u8 = 0xff;

pub const COM_QUIT: u8 = 1;
pub const COM_INIT_DB: u8 = 2;
pub const COM_QUERY: u8 = 3;
pub const COM_FIELD_LIST: u8 = 4;
pub const COM_CREATE_DB: u8 = 5;
pub const COM_DROP_DB: u8 = 6;
pub const COM_REFRESH: u8 = 7;
pub const COM_SHUTDOWN: u8 = 8;
pub const COM_STATISTICS: u8 = 9;
pub const COM_PROCESS_INFO: u8 = 10;
pub const COM_CONNECT: u8 = 11;
pub const COM_PROCESS_KILL: u8 = 12;
pub const COM_DEBUG: u8 = 13;
pub const COM_PING: u8 = 14;
pub const COM_TIME: u8 = 15;
pub const COM_DELAYED_INSERT: u8 = 16;
pub const COM_CHANGE_USER: u8 = 17;
pub const COM_BINLOG_DUMP: u8 = 18;
pub const COM_TABLE_DUMP: u8 = 19;
pub const COM_CONNECT_OUT: u8 = 20;
pub const COM_REGISTER_SLAVE: u8 = 21;
pub const COM_STMT_PREPARE: u8 = 22;
pub const COM_STMT_EXECUTE: u8 = 23;
pub const COM_STMT_SEND_LONG_DATA: u8 = 24;
pub const COM_STMT_CLOSE: u8 = 25;
pub const COM_STMT_RESET: u8 = 26;
pub const COM_SET_OPTION: u8 = 27;
pub const COM_STMT_FETCH: u8 = 28;

// postgresql constants
pub const POSTGRESQL_PORT: u16 = 5432;
pub const PG_MSG_HEADER_LEN: usize = 5;
pub const PG_STARTUP_PROTOCOL_V3: u32 = 196608;
pub const PG_SSL_REQUEST_CODE: u32 = 80877103;

// redis constants
pub const REDIS_PORT: u16 = 6379;
pub const REDIS_LINE_END: &[u8] = b"\r\n";

// dns constants
pub const DNS_PORT: u16 = 53;
pub const DNS_UDP_MAX_SIZE: usize = 512;
pub const DNS_HEADER_QR_MASK: u16 = 0x8000;
pub const DNS_HEADER_RESPCODE_MASK: u16 = 0x000f;
pub const DNS_RESPCODE_SUCCESS: u16 = 0x00;

pub const DNS_NAME_COMPRESS_POINTER: u8 = 0xc0;
pub const DNS_NAME_TAIL: u8 = 0x00;
pub const DNS_NAME_MAX_SIZE: usize = 255;
pub const DNS_TYPE_A: u16 = 1;
pub const DNS_TYPE_NS: u16 = 2;
pub const DNS_TYPE_CNAME: u16 = 5;
pub const DNS_TYPE_AAAA: u16 = 28;
pub const DNS_TYPE_A_LENGTH: usize = 4;
pub const DNS_TYPE_AAAA_LENGTH: usize = 16;

pub const UNKNOWN: &str = "UnKnown";
