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

use std::sync::Arc;

use once_cell::sync::OnceCell;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter,
    IntGauge, Registry,
};
use prometheus::{Encoder, TextEncoder};
use quern_core::error::{QuernError, Result};

static COLLECTOR: OnceCell<Arc<MergeMetrics>> = OnceCell::new();

/// Prometheus metrics for the merge engine. Tracks 5 metrics:
/// *merge_open_file_available* - Open file budget still available to merges
/// *merge_events_total* - Counter of merge events processed
/// *merge_failures_total* - Counter of merge events that failed
/// *merged_blocks_total* - Counter of merged blocks produced
/// *buffer_used_bytes* - Bytes held by in-memory shuffle buffers
pub struct MergeMetrics {
    /// Open file budget still available to merges.
    pub open_file_available: IntGauge,
    /// Counter of merge events processed.
    pub merge_events_total: IntCounter,
    /// Counter of merge events that failed.
    pub merge_failures_total: IntCounter,
    /// Counter of merged blocks produced.
    pub merged_blocks_total: IntCounter,
    /// Bytes held by in-memory shuffle buffers.
    pub buffer_used_bytes: IntGauge,
}

impl MergeMetrics {
    /// Registers the merge metrics against the given registry.
    pub fn new(registry: &Registry) -> Result<Self> {
        let open_file_available = register_int_gauge_with_registry!(
            "merge_open_file_available",
            "Open file budget still available to merges",
            registry
        )
        .map_err(|e| QuernError::Internal(format!("Error registering metric: {e:?}")))?;

        let merge_events_total = register_int_counter_with_registry!(
            "merge_events_total",
            "Counter of merge events processed",
            registry
        )
        .map_err(|e| QuernError::Internal(format!("Error registering metric: {e:?}")))?;

        let merge_failures_total = register_int_counter_with_registry!(
            "merge_failures_total",
            "Counter of merge events that failed",
            registry
        )
        .map_err(|e| QuernError::Internal(format!("Error registering metric: {e:?}")))?;

        let merged_blocks_total = register_int_counter_with_registry!(
            "merged_blocks_total",
            "Counter of merged blocks produced",
            registry
        )
        .map_err(|e| QuernError::Internal(format!("Error registering metric: {e:?}")))?;

        let buffer_used_bytes = register_int_gauge_with_registry!(
            "buffer_used_bytes",
            "Bytes held by in-memory shuffle buffers",
            registry
        )
        .map_err(|e| QuernError::Internal(format!("Error registering metric: {e:?}")))?;

        Ok(Self {
            open_file_available,
            merge_events_total,
            merge_failures_total,
            merged_blocks_total,
            buffer_used_bytes,
        })
    }

    /// Returns the process-wide collector, registering it on first use.
    pub fn current() -> Result<Arc<MergeMetrics>> {
        COLLECTOR
            .get_or_try_init(|| {
                let collector = Self::new(::prometheus::default_registry())?;

                Ok(Arc::new(collector))
            })
            .map(|arc| arc.clone())
    }

    /// Encodes all registered metrics in the text exposition format.
    pub fn gather_metrics(&self) -> Result<(Vec<u8>, String)> {
        let encoder = TextEncoder::new();

        let metric_families = prometheus::gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            QuernError::Internal(format!("Error encoding prometheus metrics: {e:?}"))
        })?;

        Ok((buffer, encoder.format_type().to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_gathers() -> Result<()> {
        let registry = Registry::new();
        let metrics = MergeMetrics::new(&registry)?;
        metrics.open_file_available.set(128);
        metrics.merge_events_total.inc();
        assert_eq!(metrics.open_file_available.get(), 128);
        assert_eq!(metrics.merge_events_total.get(), 1);
        Ok(())
    }

    #[test]
    fn current_returns_the_same_collector() -> Result<()> {
        let first = MergeMetrics::current()?;
        let second = MergeMetrics::current()?;
        assert!(Arc::ptr_eq(&first, &second));
        Ok(())
    }
}
