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

//! Partition data and index files on the local filesystem.
//!
//! Layout under the storage base directory:
//!
//! ```text
//! <base>/<app_id>/<shuffle_id>/<partition_id>.data
//! <base>/<app_id>/<shuffle_id>/<partition_id>.index
//! ```
//!
//! Writers append, so a partition flushed in several rounds accumulates in
//! the same file pair.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::{fs, io};

use bytes::Bytes;
use log::debug;

use quern_core::block::{ShuffleBlock, ShuffleIndexResult};
use quern_core::error::{QuernError, Result};

use crate::storage::index::IndexRecord;
use crate::PartitionedUid;

/// Local disk storage rooted at a base directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Creates storage rooted at `base_dir`. The directory is created on
    /// first write, not here.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Path of the partition's data file.
    pub fn data_path(&self, uid: &PartitionedUid) -> PathBuf {
        self.partition_dir(uid)
            .join(format!("{}.data", uid.partition_id))
    }

    /// Path of the partition's index file.
    pub fn index_path(&self, uid: &PartitionedUid) -> PathBuf {
        self.partition_dir(uid)
            .join(format!("{}.index", uid.partition_id))
    }

    fn partition_dir(&self, uid: &PartitionedUid) -> PathBuf {
        self.base_dir
            .join(&uid.app_id)
            .join(uid.shuffle_id.to_string())
    }

    /// Whether the partition has flushed data on disk.
    pub fn has_partition(&self, uid: &PartitionedUid) -> bool {
        self.index_path(uid).is_file()
    }

    /// Opens an appending writer for the partition, creating the file pair
    /// on first use.
    pub fn create_writer(&self, uid: &PartitionedUid) -> Result<LocalFileWriter> {
        let dir = self.partition_dir(uid);
        fs::create_dir_all(&dir).map_err(QuernError::IoError)?;
        let data_path = self.data_path(uid);
        let index_path = self.index_path(uid);

        let data_file = Self::open_append(&data_path)?;
        let next_offset = data_file.metadata().map_err(QuernError::IoError)?.len() as i64;
        let index_file = Self::open_append(&index_path)?;

        debug!("Opened local writer for {uid} at offset {next_offset}");
        Ok(LocalFileWriter {
            data: BufWriter::new(data_file),
            index: BufWriter::new(index_file),
            next_offset,
        })
    }

    fn open_append(path: &Path) -> Result<File> {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(QuernError::IoError)
    }

    /// Returns a reader over the partition's file pair.
    pub fn read_handler(&self, uid: &PartitionedUid) -> LocalFileReadHandler {
        LocalFileReadHandler {
            data_path: self.data_path(uid),
            index_path: self.index_path(uid),
        }
    }

    /// Deletes everything stored for an application.
    pub fn remove_app(&self, app_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.base_dir.join(app_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QuernError::IoError(e)),
        }
    }
}

/// Appends blocks to a partition's data file and mirrors each into the
/// index file.
pub struct LocalFileWriter {
    data: BufWriter<File>,
    index: BufWriter<File>,
    next_offset: i64,
}

impl LocalFileWriter {
    /// Appends one block payload and its index record.
    pub fn append_block(&mut self, block: &ShuffleBlock, payload: &[u8]) -> Result<()> {
        let record = IndexRecord::for_block(block, self.next_offset);
        self.data.write_all(payload).map_err(QuernError::IoError)?;
        record.write_to(&mut self.index)?;
        self.next_offset += payload.len() as i64;
        Ok(())
    }

    /// Flushes both files to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.data.flush().map_err(QuernError::IoError)?;
        self.index.flush().map_err(QuernError::IoError)?;
        Ok(())
    }

    /// Offset the next appended block will land at.
    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }
}

/// Reads a partition's index file and names the data file it describes.
#[derive(Debug, Clone)]
pub struct LocalFileReadHandler {
    data_path: PathBuf,
    index_path: PathBuf,
}

impl LocalFileReadHandler {
    /// Loads the whole index file.
    pub fn get_shuffle_index(&self) -> Result<ShuffleIndexResult> {
        let index_data = fs::read(&self.index_path).map_err(QuernError::IoError)?;
        Ok(ShuffleIndexResult {
            data_file_name: self.data_path.clone(),
            index_data: Bytes::from(index_data),
        })
    }

    /// Path of the data file the index points into.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}
