/*
 * Copyright (c) 2022 Yunshan Networks
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

use std::{fmt, str::FromStr};

use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Hash,
    Eq,
    PartialOrd,
    Ord,
    FromPrimitive,
    IntoPrimitive,
    num_enum::Default,
)]
#[repr(u8)]
pub enum L7Protocol {
    #[num_enum(default)]
    #[serde(rename = "unknown")]
    Unknown = 0,

    // HTTP
    #[serde(rename = "http")]
    Http1 = 20,

    // RPC
    #[serde(rename = "dubbo")]
    Dubbo = 40,

    // SQL
    #[serde(rename = "mysql")]
    MySQL = 60,
    #[serde(rename = "pgsql")]
    PostgreSQL = 61,

    // NoSQL
    #[serde(rename = "redis")]
    Redis = 80,

    // MQ
    #[serde(rename = "kafka")]
    Kafka = 100,

    // INFRA
    #[serde(rename = "dns")]
    DNS = 120,
}

impl L7Protocol {
    pub const SUPPORTED: [L7Protocol; 7] = [
        L7Protocol::Http1,
        L7Protocol::Dubbo,
        L7Protocol::MySQL,
        L7Protocol::PostgreSQL,
        L7Protocol::Redis,
        L7Protocol::Kafka,
        L7Protocol::DNS,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            L7Protocol::Unknown => "unknown",
            L7Protocol::Http1 => "http",
            L7Protocol::Dubbo => "dubbo",
            L7Protocol::MySQL => "mysql",
            L7Protocol::PostgreSQL => "pgsql",
            L7Protocol::Redis => "redis",
            L7Protocol::Kafka => "kafka",
            L7Protocol::DNS => "dns",
        }
    }
}

impl fmt::Display for L7Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown l7 protocol: {0}")]
pub struct UnknownL7Protocol(pub String);

impl FromStr for L7Protocol {
    type Err = UnknownL7Protocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "http1" => Ok(L7Protocol::Http1),
            "dubbo" => Ok(L7Protocol::Dubbo),
            "mysql" => Ok(L7Protocol::MySQL),
            "pgsql" | "postgresql" => Ok(L7Protocol::PostgreSQL),
            "redis" => Ok(L7Protocol::Redis),
            "kafka" => Ok(L7Protocol::Kafka),
            "dns" => Ok(L7Protocol::DNS),
            _ => Err(UnknownL7Protocol(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names() {
        for p in L7Protocol::SUPPORTED {
            assert_eq!(p.as_str().parse::<L7Protocol>(), Ok(p));
            assert_eq!(L7Protocol::from(u8::from(p)), p);
        }
        assert_eq!(L7Protocol::from(7u8), L7Protocol::Unknown);
        assert!("smtp".parse::<L7Protocol>().is_err());
    }
}
