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

//! K-way merge over sorted segments.
//!
//! The merger drains all segments through a binary heap keyed by the
//! shuffle's comparator, emitting one globally ordered record stream. Ties
//! between segments break by segment index so a merge is deterministic for
//! a given input set. With a combiner configured, runs of equal keys fold
//! into a single record before emission.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::merge::combiner::Combiner;
use crate::merge::comparator::KeyComparator;
use crate::merge::segment::Segment;
use crate::records::Record;

/// Receives the merged record stream.
///
/// `append` may suspend, typically while the sink waits out cache
/// backpressure, which paces the whole merge.
#[async_trait]
pub trait RecordSink: Send {
    /// Consumes the next merged record.
    async fn append(&mut self, record: &Record) -> Result<()>;

    /// Flushes whatever the sink still buffers. Called exactly once, after
    /// the last record.
    async fn finish(&mut self) -> Result<()>;
}

// Heap entry ordering is reversed so the std max-heap pops the smallest key
// first; equal keys pop in ascending segment order.
struct HeapEntry {
    record: Record,
    segment_idx: usize,
    comparator: Arc<dyn KeyComparator>,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.comparator.compare(&self.record.key, &other.record.key) {
            Ordering::Equal => other.segment_idx.cmp(&self.segment_idx),
            ord => ord.reverse(),
        }
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merges the segments into one ordered stream written to `sink`.
///
/// Returns the number of records emitted.
pub async fn merge(
    mut segments: Vec<Segment>,
    comparator: Arc<dyn KeyComparator>,
    combiner: Option<Arc<dyn Combiner>>,
    sink: &mut dyn RecordSink,
) -> Result<u64> {
    let mut heap = BinaryHeap::with_capacity(segments.len());
    for (segment_idx, segment) in segments.iter_mut().enumerate() {
        if let Some(record) = segment.next_record()? {
            heap.push(HeapEntry {
                record,
                segment_idx,
                comparator: comparator.clone(),
            });
        }
    }

    let mut emitted = 0u64;
    let mut pending: Option<Record> = None;
    while let Some(entry) = heap.pop() {
        let HeapEntry {
            record, segment_idx, ..
        } = entry;
        if let Some(next) = segments[segment_idx].next_record()? {
            heap.push(HeapEntry {
                record: next,
                segment_idx,
                comparator: comparator.clone(),
            });
        }

        pending = match pending.take() {
            None => Some(record),
            Some(mut current) => match combiner.as_deref() {
                Some(combiner)
                    if comparator.compare(&current.key, &record.key) == Ordering::Equal =>
                {
                    current.value = combiner.combine(&current.value, &record.value)?;
                    Some(current)
                }
                _ => {
                    sink.append(&current).await?;
                    emitted += 1;
                    Some(record)
                }
            },
        };
    }
    if let Some(current) = pending {
        sink.append(&current).await?;
        emitted += 1;
    }
    sink.finish().await?;
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ShuffleBlock;
    use crate::merge::combiner::SumCombiner;
    use crate::merge::comparator::BytewiseComparator;
    use crate::records::RecordBuffer;
    use bytes::Bytes;

    struct VecSink {
        records: Vec<Record>,
        finished: bool,
    }

    impl VecSink {
        fn new() -> Self {
            Self {
                records: Vec::new(),
                finished: false,
            }
        }
    }

    #[async_trait]
    impl RecordSink for VecSink {
        async fn append(&mut self, record: &Record) -> Result<()> {
            self.records.push(record.clone());
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn segment_of(block_id: i64, pairs: &[(&[u8], i32)]) -> Segment {
        let mut buffer = RecordBuffer::new();
        for (key, value) in pairs {
            buffer.add_record(
                Bytes::copy_from_slice(key),
                Bytes::copy_from_slice(&value.to_le_bytes()),
            );
        }
        let block = ShuffleBlock::from_bytes(block_id, 0, buffer.to_bytes().unwrap());
        Segment::from_block(&block).unwrap()
    }

    #[tokio::test]
    async fn merges_sorted_segments() -> Result<()> {
        let segments = vec![
            segment_of(1, &[(b"a", 1), (b"d", 4)]),
            segment_of(2, &[(b"b", 2), (b"e", 5)]),
            segment_of(3, &[(b"c", 3), (b"f", 6)]),
        ];
        let mut sink = VecSink::new();
        let emitted = merge(segments, Arc::new(BytewiseComparator), None, &mut sink).await?;
        assert_eq!(emitted, 6);
        assert!(sink.finished);
        let keys: Vec<&[u8]> = sink.records.iter().map(|r| r.key.as_ref()).collect();
        assert_eq!(keys, vec![b"a" as &[u8], b"b", b"c", b"d", b"e", b"f"]);
        Ok(())
    }

    #[tokio::test]
    async fn equal_keys_keep_segment_order_without_combiner() -> Result<()> {
        let segments = vec![
            segment_of(1, &[(b"k", 10)]),
            segment_of(2, &[(b"k", 20)]),
        ];
        let mut sink = VecSink::new();
        merge(segments, Arc::new(BytewiseComparator), None, &mut sink).await?;
        let values: Vec<i32> = sink
            .records
            .iter()
            .map(|r| i32::from_le_bytes(r.value.as_ref().try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![10, 20]);
        Ok(())
    }

    #[tokio::test]
    async fn combiner_folds_equal_keys_across_segments() -> Result<()> {
        let segments = vec![
            segment_of(1, &[(b"a", 1), (b"b", 2)]),
            segment_of(2, &[(b"b", 3), (b"c", 4)]),
            segment_of(3, &[(b"b", 5)]),
        ];
        let mut sink = VecSink::new();
        let emitted = merge(
            segments,
            Arc::new(BytewiseComparator),
            Some(Arc::new(SumCombiner::int32())),
            &mut sink,
        )
        .await?;
        assert_eq!(emitted, 3);
        let pairs: Vec<(&[u8], i32)> = sink
            .records
            .iter()
            .map(|r| {
                (
                    r.key.as_ref(),
                    i32::from_le_bytes(r.value.as_ref().try_into().unwrap()),
                )
            })
            .collect();
        assert_eq!(pairs, vec![(b"a" as &[u8], 1), (b"b", 10), (b"c", 4)]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_input_emits_nothing() -> Result<()> {
        let mut sink = VecSink::new();
        let emitted = merge(Vec::new(), Arc::new(BytewiseComparator), None, &mut sink).await?;
        assert_eq!(emitted, 0);
        assert!(sink.records.is_empty());
        assert!(sink.finished);
        Ok(())
    }
}
