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

//! 64-bit shuffle block id layout.
//!
//! Every block written to the shuffle service carries a unique signed 64-bit
//! id packing three fields:
//!
//! ```text
//! [1 bit unused][18 bits sequence][24 bits partition id][21 bits task attempt id]
//! ```
//!
//! The 18-bit sequence field itself interleaves the per-writer sequence
//! number with the task attempt number: `(sequence_no << 6) | attempt_id`.
//! Encoding is strict: a field outside its bit width is a hard error, never
//! silently truncated, because a truncated id would collide with another
//! block and corrupt a merge.

use crate::error::{QuernError, Result};

/// Bit width of the sequence field.
pub const SEQUENCE_NO_MAX_LENGTH: i64 = 18;
/// Bit width of the partition id field.
pub const PARTITION_ID_MAX_LENGTH: i64 = 24;
/// Bit width of the task attempt id field.
pub const TASK_ATTEMPT_ID_MAX_LENGTH: i64 = 21;
/// Bit width of the attempt number inside the sequence field.
pub const MAX_ATTEMPT_LENGTH: i64 = 6;

/// Largest encodable sequence field value, attempt bits included.
pub const MAX_SEQUENCE_NO: i64 = (1 << SEQUENCE_NO_MAX_LENGTH) - 1;
/// Largest encodable partition id.
pub const MAX_PARTITION_ID: i64 = (1 << PARTITION_ID_MAX_LENGTH) - 1;
/// Largest encodable task attempt id.
pub const MAX_TASK_ATTEMPT_ID: i64 = (1 << TASK_ATTEMPT_ID_MAX_LENGTH) - 1;
/// Largest encodable attempt number.
pub const MAX_ATTEMPT_ID: i64 = (1 << MAX_ATTEMPT_LENGTH) - 1;

/// Largest task id accepted by the legacy composite task attempt encoding.
pub const MAX_COMPOSITE_TASK_ID: i64 = 1000;
/// Largest attempt number accepted by the legacy composite task attempt encoding.
pub const MAX_COMPOSITE_ATTEMPT_ID: i64 = 10000;

/// Encodes a block id from its fields.
///
/// Returns [QuernError::BlockIdOutOfRange] if any field exceeds its bit
/// width.
pub fn encode(
    sequence_no: i64,
    attempt_id: i64,
    partition_id: i64,
    task_attempt_id: i64,
) -> Result<i64> {
    if !(0..=MAX_ATTEMPT_ID).contains(&attempt_id) {
        return Err(QuernError::BlockIdOutOfRange(format!(
            "attempt id {attempt_id} exceeds the maximum {MAX_ATTEMPT_ID}"
        )));
    }
    let sequence = (sequence_no << MAX_ATTEMPT_LENGTH) + attempt_id;
    if !(0..=MAX_SEQUENCE_NO).contains(&sequence) {
        return Err(QuernError::BlockIdOutOfRange(format!(
            "sequence {sequence} exceeds the maximum {MAX_SEQUENCE_NO}"
        )));
    }
    if !(0..=MAX_PARTITION_ID).contains(&partition_id) {
        return Err(QuernError::BlockIdOutOfRange(format!(
            "partition id {partition_id} exceeds the maximum {MAX_PARTITION_ID}"
        )));
    }
    if !(0..=MAX_TASK_ATTEMPT_ID).contains(&task_attempt_id) {
        return Err(QuernError::BlockIdOutOfRange(format!(
            "task attempt id {task_attempt_id} exceeds the maximum {MAX_TASK_ATTEMPT_ID}"
        )));
    }
    Ok(
        (sequence << (PARTITION_ID_MAX_LENGTH + TASK_ATTEMPT_ID_MAX_LENGTH))
            + (partition_id << TASK_ATTEMPT_ID_MAX_LENGTH)
            + task_attempt_id,
    )
}

/// Extracts the per-writer sequence number from a block id.
pub fn sequence_no(block_id: i64) -> i64 {
    sequence_field(block_id) >> MAX_ATTEMPT_LENGTH
}

/// Extracts the attempt number from a block id.
pub fn attempt_id(block_id: i64) -> i64 {
    sequence_field(block_id) & MAX_ATTEMPT_ID
}

/// Extracts the partition id from a block id.
pub fn partition_id(block_id: i64) -> i64 {
    (block_id >> TASK_ATTEMPT_ID_MAX_LENGTH) & MAX_PARTITION_ID
}

/// Extracts the task attempt id from a block id.
pub fn task_attempt_id(block_id: i64) -> i64 {
    block_id & MAX_TASK_ATTEMPT_ID
}

fn sequence_field(block_id: i64) -> i64 {
    (block_id >> (PARTITION_ID_MAX_LENGTH + TASK_ATTEMPT_ID_MAX_LENGTH)) & MAX_SEQUENCE_NO
}

/// Packs the legacy three-field task attempt composite
/// `(shuffle_id << 48) | (task_id << 16) | attempt_id` used by engine shims
/// that address attempts globally rather than per block.
pub fn composite_task_attempt_id(
    shuffle_id: i64,
    task_id: i64,
    attempt_id: i64,
) -> Result<i64> {
    if !(0..=MAX_PARTITION_ID).contains(&shuffle_id) {
        return Err(QuernError::BlockIdOutOfRange(format!(
            "shuffle id {shuffle_id} exceeds the maximum {MAX_PARTITION_ID}"
        )));
    }
    if !(0..=MAX_COMPOSITE_TASK_ID).contains(&task_id) {
        return Err(QuernError::BlockIdOutOfRange(format!(
            "task id {task_id} exceeds the maximum {MAX_COMPOSITE_TASK_ID}"
        )));
    }
    if !(0..=MAX_COMPOSITE_ATTEMPT_ID).contains(&attempt_id) {
        return Err(QuernError::BlockIdOutOfRange(format!(
            "attempt id {attempt_id} exceeds the maximum {MAX_COMPOSITE_ATTEMPT_ID}"
        )));
    }
    Ok((shuffle_id << (16 + 32)) + (task_id << 16) + attempt_id)
}

/// Re-packs the task and attempt fields of a block id into the legacy
/// composite for the given shuffle.
pub fn composite_from_block_id(block_id: i64, shuffle_id: i64) -> Result<i64> {
    let task_id = task_attempt_id(block_id);
    let attempt = attempt_id(block_id);
    composite_task_attempt_id(shuffle_id, task_id, attempt)
}
