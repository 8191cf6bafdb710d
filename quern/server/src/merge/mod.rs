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

//! Partition merge engine.
//!
//! Shuffle writers report the complete block id set of a partition once all
//! its blocks are cached; the report flips the partition into merging and
//! enqueues an event for the worker pool. A worker resolves every reported
//! block to a readable segment, memory first with a disk fallback bounded by
//! the shared open file budget, k-way merges them into globally ordered
//! output, and republishes the result as fixed size blocks under the merged
//! application namespace where readers fetch them by ordinal id.

/// Per shuffle and per partition merge state machines.
pub mod entity;
/// Events consumed by the merge worker pool.
pub mod event;
/// The merge manager owning the worker pool, file budget, and registries.
pub mod manager;
/// Bookkeeping for the merged block sequence of one partition.
pub mod result;

pub use entity::{PartitionEntity, ShuffleEntity};
pub use event::MergeEvent;
pub use manager::{merged_app_id, ShuffleMergeManager, MERGE_APP_SUFFIX};
pub use result::MergedResult;
