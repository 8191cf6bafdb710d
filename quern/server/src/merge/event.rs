// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::fmt;

use croaring::Treemap;

/// One partition's merge request, posted when its block set is reported.
#[derive(Clone)]
pub struct MergeEvent {
    /// The owning application.
    pub app_id: String,
    /// The shuffle within the application.
    pub shuffle_id: i32,
    /// The partition to merge.
    pub partition_id: i32,
    /// Key type name the shuffle was registered with.
    pub key_type: String,
    /// Value type name the shuffle was registered with.
    pub value_type: String,
    /// Every block id the partition is expected to contain.
    pub expected_block_ids: Treemap,
}

impl fmt::Display for MergeEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "MergeEvent{{appId={}, shuffleId={}, partitionId={}, blocks={}}}",
            self.app_id,
            self.shuffle_id,
            self.partition_id,
            self.expected_block_ids.cardinality()
        )
    }
}
