/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The external sort and range-partition engine.
//!
//! Sorting happens over host-provided buffer memory: each fixed-size
//! buffer is sorted in place through a pool of decrypted records, then
//! the buffers are treated as sorted runs and merged k at a time through
//! a min-heap into a single run, using one scratch buffer. On top of the
//! sort sit the distributed-sort primitives: random sampling, global
//! range-boundary selection, and repartitioning of sorted data.

mod comparator;
mod external;
mod partition;

pub use comparator::{AggFn, AggSpec, CmpContext, OpCode};
pub use external::{external_sort, SortOutput, SortStats};
pub use partition::{find_range_bounds, partition_for_sort, sample, PartitionOutput, SampleOutput};
