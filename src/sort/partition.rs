/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Context;
use log::debug;

use crate::consts::SAMPLE_THRESHOLD;
use crate::error::{KernelError, KernelResult};
use crate::rows::{BlockReader, Record, RowReader, RowWriter};
use crate::runtime::Runtime;
use crate::sort::comparator::{CmpContext, OpCode};
use crate::sort::external::external_sort;

/// Result of a [`sample`] call.
#[derive(Debug, Clone, Copy)]
pub struct SampleOutput {
    pub bytes_written: usize,
    pub num_rows: u32,
}

/// Result of a [`partition_for_sort`] call: partition boundaries as byte
/// offsets into the output (with one sentinel offset past the last
/// partition) and per-partition row counts.
#[derive(Debug, Clone)]
pub struct PartitionOutput {
    pub partition_offsets: Vec<usize>,
    pub partition_num_rows: Vec<u32>,
    pub bytes_written: usize,
}

/// Emits each input row independently with probability `3277 / 2^16`
/// (about 5%), driven by the runtime's trusted entropy source. The
/// sampled rows are written as a single block.
pub fn sample<R: Record, T: Runtime>(
    rt: &T,
    input_rows: &[u8],
    num_rows: u32,
    output: &mut [u8],
) -> anyhow::Result<SampleOutput> {
    let mut blocks = BlockReader::new(input_rows);
    let Some((header, _)) = blocks.next_block()? else {
        return Ok(SampleOutput {
            bytes_written: 0,
            num_rows: 0,
        });
    };
    let row_upper_bound = header.row_upper_bound;

    let mut reader = RowReader::new(input_rows);
    let mut writer = RowWriter::single_block(output, row_upper_bound);
    let mut rec = R::with_capacity(row_upper_bound as usize);
    let mut kept = 0u32;
    let mut draw = [0u8; 2];
    for _ in 0..num_rows {
        rec.read_from(&mut reader, rt)
            .context("Could not read input row")?;
        rt.read_rand(&mut draw)?;
        if u16::from_le_bytes(draw) <= SAMPLE_THRESHOLD {
            rec.write_to(&mut writer, rt)
                .context("Could not write sampled row")?;
            kept += 1;
        }
    }
    let bytes_written = writer.close();
    debug!("sample: kept {kept} of {num_rows} rows");
    Ok(SampleOutput {
        bytes_written,
        num_rows: kept,
    })
}

/// Sorts the sampled rows and emits one boundary row at every sorted
/// position `k * (N / num_partitions)`, `k = 1..num_partitions`,
/// producing exactly `num_partitions - 1` boundary rows.
pub fn find_range_bounds<R: Record, T: Runtime>(
    rt: &T,
    op_code: OpCode,
    num_partitions: u32,
    data: &mut [u8],
    buffer_offsets: &[usize],
    num_rows: &[u32],
    row_upper_bound: u32,
    output: &mut [u8],
    scratch: &mut [u8],
) -> anyhow::Result<usize> {
    if num_partitions == 0 {
        return Err(KernelError::InvalidArgument("at least one partition is required").into());
    }
    let sorted = external_sort::<R, T>(
        rt,
        op_code,
        data,
        buffer_offsets,
        num_rows,
        row_upper_bound,
        scratch,
    )
    .context("Could not sort sampled rows")?;

    let total: u64 = num_rows.iter().map(|&n| n as u64).sum();
    let step = total / num_partitions as u64;

    let mut reader = RowReader::new(&data[sorted.run]);
    let mut writer = RowWriter::new(output, row_upper_bound);
    let mut rec = R::with_capacity(row_upper_bound as usize);
    let mut emitted = 0u32;
    for i in 0..total {
        rec.read_from(&mut reader, rt)?;
        if step > 0 && i > 0 && i % step == 0 && emitted < num_partitions - 1 {
            rec.write_to(&mut writer, rt)?;
            emitted += 1;
        }
    }
    debug!("find_range_bounds: emitted {emitted} boundary rows from {total} samples");
    Ok(writer.close())
}

/// Sorts the input buffers, then streams the sorted rows into
/// `num_partitions` ranges delimited by `boundary_rows`.
///
/// A row belongs to partition `p` when it is not less than boundary
/// `p - 1` and, for `p < num_partitions - 1`, less than boundary `p`.
/// The writer's current block is finished at every partition transition,
/// so partition starts are block-aligned and each partition is itself a
/// well-formed run.
pub fn partition_for_sort<R: Record, T: Runtime>(
    rt: &T,
    op_code: OpCode,
    num_partitions: u32,
    data: &mut [u8],
    buffer_offsets: &[usize],
    num_rows: &[u32],
    row_upper_bound: u32,
    boundary_rows: &[u8],
    output: &mut [u8],
    scratch: &mut [u8],
) -> anyhow::Result<PartitionOutput> {
    if num_partitions == 0 {
        return Err(KernelError::InvalidArgument("at least one partition is required").into());
    }
    let sorted = external_sort::<R, T>(
        rt,
        op_code,
        data,
        buffer_offsets,
        num_rows,
        row_upper_bound,
        scratch,
    )
    .context("Could not sort input rows")?;

    let boundaries =
        read_boundaries::<R, T>(rt, boundary_rows, num_partitions, row_upper_bound)?;
    let ctx = CmpContext::new(op_code)?;

    let total: u64 = num_rows.iter().map(|&n| n as u64).sum();
    let mut reader = RowReader::new(&data[sorted.run.clone()]);
    let mut writer = RowWriter::new(output, row_upper_bound);
    let mut rec = R::with_capacity(row_upper_bound as usize);

    let mut partition_offsets = vec![0usize];
    let mut partition_num_rows = Vec::with_capacity(num_partitions as usize);
    let mut rows_in_partition = 0u32;
    let mut p = 0u32;
    for _ in 0..total {
        rec.read_from(&mut reader, rt)?;
        // The row falls outside the current range: close ranges until it
        // fits, so that empty partitions stay empty.
        while p + 1 < num_partitions
            && !rec.cmp_by(&boundaries[p as usize], &ctx).is_lt()
        {
            partition_num_rows.push(rows_in_partition);
            rows_in_partition = 0;
            writer.finish_block();
            partition_offsets.push(writer.bytes_written());
            p += 1;
        }
        rec.write_to(&mut writer, rt)?;
        rows_in_partition += 1;
    }
    ctx.check()?;

    writer.finish_block();
    partition_num_rows.push(rows_in_partition);
    while (partition_num_rows.len() as u32) < num_partitions {
        partition_offsets.push(writer.bytes_written());
        partition_num_rows.push(0);
    }
    let bytes_written = writer.close();
    partition_offsets.push(bytes_written);

    debug!(
        "partition_for_sort: {} rows over {} partitions, {} bytes",
        total, num_partitions, bytes_written
    );
    Ok(PartitionOutput {
        partition_offsets,
        partition_num_rows,
        bytes_written,
    })
}

fn read_boundaries<R: Record, T: Runtime>(
    rt: &T,
    boundary_rows: &[u8],
    num_partitions: u32,
    row_upper_bound: u32,
) -> KernelResult<Vec<R>> {
    let mut boundaries = Vec::with_capacity(num_partitions as usize - 1);
    let mut reader = RowReader::new(boundary_rows);
    while reader.has_next()? {
        let mut rec = R::with_capacity(row_upper_bound as usize);
        rec.read_from(&mut reader, rt)?;
        boundaries.push(rec);
    }
    if boundaries.len() != num_partitions as usize - 1 {
        return Err(KernelError::InvalidArgument(
            "boundary row count must be one less than the partition count",
        ));
    }
    Ok(boundaries)
}
