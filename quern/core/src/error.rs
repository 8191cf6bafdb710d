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

//! Quern error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

/// Result type alias for Quern operations.
pub type Result<T> = result::Result<T, QuernError>;

/// Quern error types for shuffle merge processing.
#[derive(Debug)]
pub enum QuernError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration error with invalid settings.
    Configuration(String),
    /// A block id field exceeded its bit-width bound.
    BlockIdOutOfRange(String),
    /// A reported block could not be resolved from memory or disk.
    BlockNotFound(String),
    /// Merge input is compressed; the merge path requires raw data.
    CompressionUnsupported(String),
    /// A resource budget was exhausted and cannot recover.
    ResourceExhausted(String),
    /// I/O operation error.
    IoError(io::Error),
    /// Tokio task join error.
    TokioError(tokio::task::JoinError),
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for QuernError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

/// Creates a general Quern error from a string message.
pub fn quern_error(message: &str) -> QuernError {
    QuernError::General(message.to_owned())
}

impl From<String> for QuernError {
    fn from(e: String) -> Self {
        QuernError::General(e)
    }
}

impl From<io::Error> for QuernError {
    fn from(e: io::Error) -> Self {
        QuernError::IoError(e)
    }
}

impl From<tokio::task::JoinError> for QuernError {
    fn from(e: tokio::task::JoinError) -> Self {
        QuernError::TokioError(e)
    }
}

impl Display for QuernError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            QuernError::General(desc) => write!(f, "General error: {desc}"),
            QuernError::Internal(desc) => {
                write!(f, "Internal Quern error: {desc}")
            }
            QuernError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            QuernError::BlockIdOutOfRange(desc) => {
                write!(f, "Block id out of range: {desc}")
            }
            QuernError::BlockNotFound(desc) => {
                write!(f, "Block not found: {desc}")
            }
            QuernError::CompressionUnsupported(desc) => {
                write!(f, "Compression unsupported: {desc}")
            }
            QuernError::ResourceExhausted(desc) => {
                write!(f, "Resource exhausted: {desc}")
            }
            QuernError::IoError(desc) => write!(f, "IO error: {desc}"),
            QuernError::TokioError(desc) => write!(f, "Tokio join error: {desc}"),
        }
    }
}

impl Error for QuernError {}
