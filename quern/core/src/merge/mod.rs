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

//! Merge primitives: sorted block segments, key comparators, value
//! combiners, and the k-way merger that folds them into one ordered stream.

/// Value combiners folding records of equal keys.
pub mod combiner;
/// Key ordering strategies for sorted records.
pub mod comparator;
/// The k-way heap merge over sorted segments.
pub mod merger;
/// Lazily-decoded views over one block's sorted records.
pub mod segment;

/// Lifecycle of one partition's merge.
///
/// A partition leaves `Inited` exactly once; `Done` and `InternalError` are
/// terminal and absorb any further reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Created, waiting for the complete block id report.
    Inited,
    /// Merging; merged blocks become readable as they are produced.
    Merging,
    /// All reported blocks merged and published.
    Done,
    /// The merge failed permanently; reads fail fast.
    InternalError,
}
