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

//! Local disk storage for flushed shuffle data.
//!
//! Each partition flushes into a pair of files, a data file holding the raw
//! block payloads back to back and an index file of fixed width records
//! locating every block inside the data file.

/// Fixed width index records describing blocks in a data file.
pub mod index;
/// Partition data and index files on the local filesystem.
pub mod local;

pub use index::{IndexRecord, INDEX_RECORD_SIZE};
pub use local::{LocalFileReadHandler, LocalFileWriter, LocalStorage};
