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

mod mysql;
mod postgresql;
mod redis;

pub use mysql::{MysqlHeader, MysqlLog, MysqlRequest, MysqlResponse};
pub use postgresql::{PostgreRequest, PostgreResponse, PostgresqlLog};
pub use redis::{RedisLog, RedisRequest, RedisResponse};

use crate::flow_generator::aggregator::{EventKey, L7Record};

/// Aggregation key shared by the database protocols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SqlKey {
    // statement keyword or command name, never the full statement of a simple query
    pub query: String,
    pub status: bool,
}

impl EventKey for SqlKey {
    fn fill_record(&self, record: &mut L7Record) {
        record.push("query", &self.query);
        record.push("status", if self.status { "1" } else { "0" });
    }
}
