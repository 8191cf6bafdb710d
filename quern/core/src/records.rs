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

//! Length-prefixed key/value record framing used inside shuffle blocks.
//!
//! Every record is encoded as:
//!
//! ```text
//! [u32: key length][key bytes][u32: value length][value bytes]
//! ```
//!
//! - All lengths are little-endian u32
//! - Records are concatenated back to back with no block header
//! - A reader hitting end of input at a record boundary is a clean end;
//!   anywhere else the input is truncated and reading fails

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{QuernError, Result};
use crate::merge::combiner::Combiner;
use crate::merge::comparator::KeyComparator;

/// One key/value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Serialized key.
    pub key: Bytes,
    /// Serialized value.
    pub value: Bytes,
}

impl Record {
    /// Creates a record from serialized key and value.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Encoded size of the record including both length prefixes.
    pub fn encoded_len(&self) -> usize {
        8 + self.key.len() + self.value.len()
    }
}

/// Appends the encoded form of a record to a buffer.
pub fn encode_record(buf: &mut BytesMut, record: &Record) {
    buf.put_u32_le(record.key.len() as u32);
    buf.put_slice(&record.key);
    buf.put_u32_le(record.value.len() as u32);
    buf.put_slice(&record.value);
}

/// Streams records into a writer.
pub struct RecordsWriter<W: Write> {
    writer: W,
    records_written: u64,
}

impl<W: Write> RecordsWriter<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            records_written: 0,
        }
    }

    /// Appends one record.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        self.writer
            .write_all(&(record.key.len() as u32).to_le_bytes())
            .map_err(QuernError::IoError)?;
        self.writer.write_all(&record.key).map_err(QuernError::IoError)?;
        self.writer
            .write_all(&(record.value.len() as u32).to_le_bytes())
            .map_err(QuernError::IoError)?;
        self.writer
            .write_all(&record.value)
            .map_err(QuernError::IoError)?;
        self.records_written += 1;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(QuernError::IoError)
    }

    /// Number of records appended so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Unwraps the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Streams records out of a reader.
pub struct RecordsReader<R: Read> {
    reader: R,
}

impl<R: Read> RecordsReader<R> {
    /// Wraps a reader positioned at a record boundary.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next record, or `None` at a clean end of input.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let key_len = match self.read_length(true)? {
            Some(len) => len,
            None => return Ok(None),
        };
        let key = self.read_exact_vec(key_len)?;
        let value_len = self
            .read_length(false)?
            .ok_or_else(|| QuernError::General("truncated record: missing value length".to_string()))?;
        let value = self.read_exact_vec(value_len)?;
        Ok(Some(Record {
            key: Bytes::from(key),
            value: Bytes::from(value),
        }))
    }

    // Reads a u32 length prefix. End of input before the first byte is a
    // clean end only when at_boundary is set.
    fn read_length(&mut self, at_boundary: bool) -> Result<Option<usize>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .reader
                .read(&mut buf[filled..])
                .map_err(QuernError::IoError)?;
            if n == 0 {
                if filled == 0 && at_boundary {
                    return Ok(None);
                }
                return Err(QuernError::General(
                    "truncated record: incomplete length prefix".to_string(),
                ));
            }
            filled += n;
        }
        Ok(Some(u32::from_le_bytes(buf) as usize))
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(|e| {
            QuernError::General(format!("truncated record: expected {len} payload bytes: {e}"))
        })?;
        Ok(buf)
    }
}

impl RecordsReader<std::io::Cursor<Bytes>> {
    /// Reads records out of an in-memory payload.
    pub fn from_bytes(data: Bytes) -> Self {
        Self::new(std::io::Cursor::new(data))
    }
}

/// Accumulates records before they are sorted, optionally combined, and
/// serialized into a block.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    records: Vec<Record>,
}

impl RecordBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record in arrival order.
    pub fn add_record(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.records.push(Record::new(key, value));
    }

    /// Sorts records by key. The sort is stable so records of equal keys
    /// keep their arrival order, which combining relies on.
    pub fn sort(&mut self, comparator: &dyn KeyComparator) {
        self.records
            .sort_by(|a, b| comparator.compare(&a.key, &b.key));
    }

    /// Folds adjacent records with byte-equal keys into one. The buffer must
    /// be sorted first.
    pub fn combine(&mut self, combiner: &dyn Combiner) -> Result<()> {
        let mut combined: Vec<Record> = Vec::with_capacity(self.records.len());
        for record in self.records.drain(..) {
            match combined.last_mut() {
                Some(last) if last.key == record.key => {
                    last.value = combiner.combine(&last.value, &record.value)?;
                }
                _ => combined.push(record),
            }
        }
        self.records = combined;
        Ok(())
    }

    /// Serializes all records in their current order.
    pub fn serialize<W: Write>(&self, writer: &mut RecordsWriter<W>) -> Result<()> {
        for record in &self.records {
            writer.append(record)?;
        }
        Ok(())
    }

    /// Serializes all records into a fresh payload.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut writer = RecordsWriter::new(Vec::new());
        self.serialize(&mut writer)?;
        Ok(Bytes::from(writer.into_inner()))
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The buffered records.
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}
