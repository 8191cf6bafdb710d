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

/// The current version of Quern, derived from the Cargo package version.
pub const QUERN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prints the current Quern version to stdout.
pub fn print_version() {
    println!("Quern version: {QUERN_VERSION}")
}

/// Shuffle block containers and the buffers backing them.
pub mod block;
/// Block identifier bit layout and packing helpers.
pub mod block_id;
/// Reference counted block payload buffers.
pub mod buffer;
/// Configuration options and settings for Quern components.
pub mod config;
/// Error types and result definitions for Quern operations.
pub mod error;
/// Event loop infrastructure for asynchronous message processing.
pub mod event_loop;
/// Sorted record merging, comparators, and combiners.
pub mod merge;
/// Key/value record framing and buffered record collections.
pub mod records;
