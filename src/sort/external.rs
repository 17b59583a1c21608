/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::cmp::Ordering;
use std::ops::Range;

use anyhow::Context;
use dsi_progress_logger::prelude::*;
use log::debug;

use crate::consts::MAX_NUM_STREAMS;
use crate::error::{KernelError, KernelResult};
use crate::rows::{Record, RowReader, RowWriter};
use crate::runtime::Runtime;
use crate::sort::comparator::{CmpContext, OpCode};

/// Comparison counters of one sort, surfaced for performance diagnosis.
#[derive(Debug, Clone, Copy)]
pub struct SortStats {
    pub comparisons: u64,
    pub deep_comparisons: u64,
}

/// Result of an [`external_sort`] call: the byte range of the single
/// sorted run inside the input memory, plus comparison counters.
#[derive(Debug, Clone)]
pub struct SortOutput {
    pub run: Range<usize>,
    pub stats: SortStats,
}

/// An entry of the k-way merge heap: one record plus the run it came
/// from. The heap is a max-heap, so the ordering is reversed to pop the
/// smallest record first.
struct MergeItem<'c, R: Record> {
    rec: R,
    reader_idx: usize,
    ctx: &'c CmpContext,
}

impl<R: Record> PartialEq for MergeItem<'_, R> {
    fn eq(&self, other: &Self) -> bool {
        self.rec.cmp_by(&other.rec, self.ctx) == Ordering::Equal
    }
}

impl<R: Record> Eq for MergeItem<'_, R> {}

impl<R: Record> PartialOrd for MergeItem<'_, R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: Record> Ord for MergeItem<'_, R> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.rec.cmp_by(&self.rec, self.ctx)
    }
}

/// Sorts the rows held in a set of contiguous buffers into a single
/// sorted run over the same memory.
///
/// `buffer_offsets` delimits the buffers inside `data`: buffer `i` spans
/// `buffer_offsets[i]..buffer_offsets[i + 1]` and holds `num_rows[i]`
/// rows, so the table carries one sentinel offset past the last buffer.
/// Each buffer is sorted in place through a pool of
/// `max(max_buffer_rows, MAX_NUM_STREAMS)` decrypted records, then the
/// buffers are merged as sorted runs, up to [`MAX_NUM_STREAMS`] at a
/// time, through a quaternary min-heap. Every merge pass writes into
/// `scratch` and copies back over the merged runs, so `scratch` must
/// cover the largest merged span.
pub fn external_sort<R: Record, T: Runtime>(
    rt: &T,
    op_code: OpCode,
    data: &mut [u8],
    buffer_offsets: &[usize],
    num_rows: &[u32],
    row_upper_bound: u32,
    scratch: &mut [u8],
) -> anyhow::Result<SortOutput> {
    check_buffer_table(data, buffer_offsets, num_rows)?;
    let num_buffers = num_rows.len();

    let max_buffer_rows = num_rows.iter().copied().max().unwrap_or(0) as usize;
    let pool_size = max_buffer_rows.max(MAX_NUM_STREAMS);
    let mut pool: Vec<R> = (0..pool_size)
        .map(|_| R::with_capacity(row_upper_bound as usize))
        .collect();
    let ctx = CmpContext::new(op_code)?;

    let mut pl = ProgressLogger::default();
    pl.item_name("buffer")
        .expected_updates(Some(num_buffers));
    pl.start("Sorting buffers...");
    let mut runs: Vec<Range<usize>> = Vec::with_capacity(num_buffers);
    for i in 0..num_buffers {
        let range = buffer_offsets[i]..buffer_offsets[i + 1];
        let written = sort_single_buffer(
            rt,
            &mut data[range.clone()],
            num_rows[i],
            &mut pool,
            &ctx,
            row_upper_bound,
        )
        .with_context(|| format!("Could not sort buffer {i}"))?;
        runs.push(range.start..range.start + written);
        pl.update();
    }
    pl.done();

    while runs.len() > 1 {
        debug!(
            "external_sort: merging {} runs, up to {} at a time",
            runs.len(),
            MAX_NUM_STREAMS
        );
        let mut merged = Vec::with_capacity(runs.len().div_ceil(MAX_NUM_STREAMS));
        for chunk in runs.chunks(MAX_NUM_STREAMS) {
            if chunk.len() == 1 {
                merged.push(chunk[0].clone());
            } else {
                merged.push(
                    external_merge(rt, data, chunk, &mut pool, &ctx, row_upper_bound, scratch)
                        .context("Could not merge runs")?,
                );
            }
        }
        runs = merged;
    }
    ctx.check()?;

    debug!(
        "external_sort: {} comparisons, {} deep comparisons",
        ctx.comparisons(),
        ctx.deep_comparisons()
    );
    Ok(SortOutput {
        run: runs.pop().unwrap_or(0..0),
        stats: SortStats {
            comparisons: ctx.comparisons(),
            deep_comparisons: ctx.deep_comparisons(),
        },
    })
}

fn check_buffer_table(
    data: &[u8],
    buffer_offsets: &[usize],
    num_rows: &[u32],
) -> KernelResult<()> {
    if buffer_offsets.len() != num_rows.len() + 1 {
        return Err(KernelError::InvalidArgument(
            "buffer offset table must carry one sentinel past the last buffer",
        ));
    }
    if !buffer_offsets.windows(2).all(|w| w[0] <= w[1]) {
        return Err(KernelError::InvalidArgument(
            "buffer offsets must be ascending",
        ));
    }
    if buffer_offsets.last().is_some_and(|&end| end > data.len()) {
        return Err(KernelError::InvalidArgument(
            "buffer offsets exceed the data buffer",
        ));
    }
    Ok(())
}

/// Sorts one buffer in place: rows are decrypted into the record pool,
/// an index permutation is sorted, and the rows are written back in
/// order. Returns the bytes rewritten.
fn sort_single_buffer<R: Record, T: Runtime>(
    rt: &T,
    buffer: &mut [u8],
    num_rows: u32,
    pool: &mut [R],
    ctx: &CmpContext,
    row_upper_bound: u32,
) -> KernelResult<usize> {
    let n = num_rows as usize;
    if pool.len() < n {
        return Err(KernelError::PoolExhausted {
            needed: n,
            available: pool.len(),
        });
    }
    {
        let mut reader = RowReader::new(buffer);
        for rec in pool.iter_mut().take(n) {
            rec.read_from(&mut reader, rt)?;
        }
    }
    let mut order: Vec<u32> = (0..num_rows).collect();
    order.sort_unstable_by(|&a, &b| pool[a as usize].cmp_by(&pool[b as usize], ctx));
    ctx.check()?;

    let mut writer = RowWriter::new(buffer, row_upper_bound);
    for &i in &order {
        pool[i as usize].write_to(&mut writer, rt)?;
    }
    Ok(writer.close())
}

/// Merges the sorted runs of `chunk` into one run starting at the
/// chunk's first byte. The merged rows stream through `scratch` and are
/// copied back, so the sorted prefix never coexists with unmerged rows.
fn external_merge<R: Record, T: Runtime>(
    rt: &T,
    data: &mut [u8],
    chunk: &[Range<usize>],
    pool: &mut Vec<R>,
    ctx: &CmpContext,
    row_upper_bound: u32,
    scratch: &mut [u8],
) -> KernelResult<Range<usize>> {
    let span_start = chunk[0].start;
    let span_end = chunk[chunk.len() - 1].end;
    let span = span_end - span_start;
    if scratch.len() < span {
        return Err(KernelError::ScratchTooSmall {
            needed: span,
            available: scratch.len(),
        });
    }

    let written;
    {
        let mut readers: Vec<RowReader<'_>> =
            chunk.iter().map(|r| RowReader::new(&data[r.clone()])).collect();
        let mut heap = dary_heap::QuaternaryHeap::with_capacity(chunk.len());
        for (i, reader) in readers.iter_mut().enumerate() {
            if reader.has_next()? {
                let mut rec = pool.pop().ok_or(KernelError::PoolExhausted {
                    needed: chunk.len(),
                    available: 0,
                })?;
                rec.read_from(reader, rt)?;
                heap.push(MergeItem {
                    rec,
                    reader_idx: i,
                    ctx,
                });
            }
        }

        let mut writer = RowWriter::new(scratch, row_upper_bound);
        while let Some(mut item) = heap.pop() {
            item.rec.write_to(&mut writer, rt)?;
            // Refill from the run this record came from.
            if readers[item.reader_idx].has_next()? {
                item.rec.read_from(&mut readers[item.reader_idx], rt)?;
                heap.push(item);
            } else {
                pool.push(item.rec);
            }
        }
        written = writer.close();
        ctx.check()?;
    }

    if written > span {
        return Err(KernelError::OutputOverflow {
            needed: written,
            available: span,
        });
    }
    data[span_start..span_start + written].copy_from_slice(&scratch[..written]);
    Ok(span_start..span_start + written)
}
