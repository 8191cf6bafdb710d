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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

use std::fmt;

/// Retry pacing for operations that hit transient backpressure.
pub mod backoff;
/// In-memory shuffle buffers with capacity accounting and disk flushing.
pub mod buffer;
/// Partition merge engine.
pub mod merge;
/// Metrics collection and reporting.
pub mod metrics;
/// Local disk storage for flushed shuffle data.
pub mod storage;
/// Shuffle data intake shared by the report and merge paths.
pub mod task_manager;

/// Identifies one partition of one shuffle of one application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionedUid {
    /// The owning application.
    pub app_id: String,
    /// The shuffle within the application.
    pub shuffle_id: i32,
    /// The partition within the shuffle.
    pub partition_id: i32,
}

impl PartitionedUid {
    /// Creates a partition identifier.
    pub fn new(app_id: impl Into<String>, shuffle_id: i32, partition_id: i32) -> Self {
        Self {
            app_id: app_id.into(),
            shuffle_id,
            partition_id,
        }
    }
}

impl fmt::Display for PartitionedUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.app_id, self.shuffle_id, self.partition_id
        )
    }
}
