/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The oblivious distributed group-by aggregation engine.
//!
//! Aggregation runs as a staged protocol over sorted, range-partitioned
//! rows. Each worker scans its partition twice: pass 1 produces a local
//! summary (first row, distinct count, running partial for the last
//! group), the coordinator reconciles summaries across partition
//! boundaries into per-worker seeds, and pass 2 places each finished
//! group's partial aggregate at its global offset in a padded output
//! sized to the global distinct count. Groups whose runs span partition
//! boundaries are colocated by offset and reduced by
//! [`final_aggregation`].

mod accumulator;
mod boundary;
mod finalize;
mod record;
mod scan;

pub use accumulator::Accumulator;
pub use boundary::process_boundary_records;
pub use finalize::{
    agg_final_result, agg_final_result_oblivious_epc, final_aggregation, FinalizeStats,
};
pub use record::AggRecord;
pub use scan::{scan_aggregation_count_distinct, sort_based_group_by, AggPass};

/// Cardinality regime of a group-by stage, set by the coordinator
/// between stages.
///
/// In the [`Low`](CardinalityMode::Low) regime the two-pass scan emits a
/// padded output sized to the global distinct count; in the
/// [`High`](CardinalityMode::High) regime the coordinator falls back to
/// [`sort_based_group_by`], a generic sort-based group-by whose output
/// size tracks the group count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalityMode {
    Low,
    High,
}

/// The default coordinator policy for choosing a [`CardinalityMode`]:
/// fall back to the sort-based group-by when the distinct count observed
/// in pass 1 exceeds the partition size.
pub fn cardinality_mode(distinct_entries: u32, partition_size: u32) -> CardinalityMode {
    if distinct_entries > partition_size {
        CardinalityMode::High
    } else {
        CardinalityMode::Low
    }
}
