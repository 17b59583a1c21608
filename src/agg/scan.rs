/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Context;
use dsi_progress_logger::prelude::*;
use log::debug;

use crate::agg::accumulator::Accumulator;
use crate::agg::finalize::agg_final_result;
use crate::agg::record::AggRecord;
use crate::consts::AGG_UPPER_BOUND;
use crate::error::{KernelError, KernelResult};
use crate::rows::{read_u32_at, Attr, Record, RowReader, RowRecord, RowWriter, TypeTag};
use crate::runtime::Runtime;
use crate::sort::{external_sort, OpCode};

/// Which pass of the two-pass aggregation protocol a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggPass {
    /// Produce the local summary: the partition's first row plus one
    /// encrypted aggregation record.
    One,
    /// Produce final rows: place every finished group at its global
    /// offset in a padded output.
    Two,
}

/// Scans one sorted partition and aggregates runs of equal group keys.
///
/// `agg_row_in` is the incoming encrypted aggregation record, framed as
/// `[enc_len u32][ciphertext]`. A wire-level dummy marks an unseeded
/// pass-1 scan; a record with a dummy sort key (such as worker 0's
/// reconciled seed) supplies only the `offset` and `distinct_entries`
/// base; any other record seeds the full scan state in pass 1.
///
/// Pass 1 writes the partition's first row followed by exactly one
/// encrypted aggregation record summarizing the partition — the pair the
/// coordinator feeds to
/// [`process_boundary_records`](crate::agg::process_boundary_records).
/// Pass 2 treats the output as an array of `distinct_entries` slots of
/// `4 + enc_size(AGG_UPPER_BOUND)` bytes and scatters each finished
/// group's partial aggregate to its slot through [`agg_final_result`].
/// Returns the number of output bytes that carry data.
pub fn scan_aggregation_count_distinct<T: Runtime>(
    rt: &T,
    op_code: OpCode,
    input_rows: &[u8],
    num_rows: u32,
    agg_row_in: &[u8],
    output: &mut [u8],
    pass: AggPass,
) -> anyhow::Result<usize> {
    let spec = op_code.agg_spec()?;
    let mut current = AggRecord::new(spec.func);
    let mut prev = AggRecord::new(spec.func);

    let mut offset = 0u32;
    let mut result_size = 0u32;
    let mut seeded = false;

    let enc_len = read_u32_at(agg_row_in, 0)? as usize;
    if agg_row_in.len() < 4 + enc_len {
        return Err(KernelError::MalformedRow("aggregation record truncated").into());
    }
    let seed_cipher = &agg_row_in[4..4 + enc_len];
    if rt.test_dummy(seed_cipher) {
        if pass == AggPass::Two {
            return Err(
                KernelError::InvalidArgument("pass 2 requires a reconciled seed record").into(),
            );
        }
    } else {
        current
            .decrypt_from(rt, seed_cipher)
            .context("Could not decrypt the incoming aggregation record")?;
        offset = current.offset();
        result_size = current.distinct();
        if current.sort_key_is_dummy() || pass == AggPass::Two {
            // Only the counters are meaningful: this worker starts a
            // fresh run and emits partials over its own rows.
            current.clear(rt);
            if pass == AggPass::One {
                current.set_distinct(result_size);
                current.set_offset(offset);
            }
        } else {
            current.accumulate()?;
            seeded = true;
        }
        debug!("scan_aggregation: seed offset {offset}, distinct {result_size}");
    }

    let mut reader = RowReader::new(input_rows);
    let mut out_pos = 0usize;

    let mut pl = ProgressLogger::default();
    pl.item_name("row").expected_updates(Some(num_rows as usize));
    pl.start("Scanning partition...");
    for r in 0..num_rows {
        let row = reader.next_row()?;
        if r == 0 {
            if pass == AggPass::One {
                // The coordinator pairs this with the summary record.
                if output.len() < out_pos + row.len() {
                    return Err(KernelError::OutputOverflow {
                        needed: out_pos + row.len(),
                        available: output.len(),
                    }
                    .into());
                }
                output[out_pos..out_pos + row.len()].copy_from_slice(row);
                out_pos += row.len();
            }
            if !seeded {
                current.inc_distinct();
                current.load_sort_key(rt, row, spec.group_attr)?;
                current.load_agg_attr(rt, row, spec.agg_attr)?;
                current.accumulate()?;
                pl.light_update();
                continue;
            }
        }

        prev.copy_from(&current);
        current.load_sort_key(rt, row, spec.group_attr)?;
        current.load_agg_attr(rt, row, spec.agg_attr)?;
        if current.same_key(&prev) {
            current.accumulate()?;
        } else {
            if pass == AggPass::Two {
                prev.set_distinct(current.distinct());
                prev.set_offset(offset);
                agg_final_result(rt, &mut prev, offset, output, result_size)?;
            }
            current.inc_distinct();
            current.reset_accumulator();
            current.accumulate()?;
            offset += 1;
        }
        pl.light_update();
    }
    pl.done();

    match pass {
        AggPass::One => {
            let enc = rt.enc_size(AGG_UPPER_BOUND);
            current.flush()?;
            if output.len() < out_pos + 4 + enc {
                return Err(KernelError::OutputOverflow {
                    needed: out_pos + 4 + enc,
                    available: output.len(),
                }
                .into());
            }
            output[out_pos..out_pos + 4].copy_from_slice(&(enc as u32).to_le_bytes());
            current.encrypt_into(rt, &mut output[out_pos + 4..out_pos + 4 + enc])?;
            out_pos += 4 + enc;
            Ok(out_pos)
        }
        AggPass::Two => {
            if num_rows == 0 {
                return Ok(0);
            }
            current.set_offset(offset);
            agg_final_result(rt, &mut current, offset, output, result_size)?;
            Ok(result_size as usize * (4 + rt.enc_size(AGG_UPPER_BOUND)))
        }
    }
}

/// The high-cardinality regime: a generic sort-based group-by.
///
/// The input buffers are sorted on the op-code's group key, then reduced
/// in one streaming pass that needs no padding: each group emits one
/// two-column row `(group key, aggregate)`. The output size tracks the
/// group count, so this path trades the padded obliviousness of the scan
/// for an output linear in the number of groups. Returns the output
/// length and the group count.
pub fn sort_based_group_by<T: Runtime>(
    rt: &T,
    op_code: OpCode,
    data: &mut [u8],
    buffer_offsets: &[usize],
    num_rows: &[u32],
    row_upper_bound: u32,
    output: &mut [u8],
    scratch: &mut [u8],
) -> anyhow::Result<(usize, u32)> {
    let spec = op_code.agg_spec()?;
    let sorted = external_sort::<RowRecord, T>(
        rt,
        op_code,
        data,
        buffer_offsets,
        num_rows,
        row_upper_bound,
        scratch,
    )
    .context("Could not sort on the group key")?;

    let total: u64 = num_rows.iter().map(|&n| n as u64).sum();
    let mut reader = RowReader::new(&data[sorted.run]);
    let mut writer = RowWriter::new(output, row_upper_bound);
    let mut rec = RowRecord::with_capacity(row_upper_bound as usize);
    let mut out_rec = RowRecord::with_capacity(row_upper_bound as usize);

    let mut acc = Accumulator::new(spec.func);
    let mut key: Option<(TypeTag, Vec<u8>)> = None;
    let mut groups = 0u32;
    for _ in 0..total {
        rec.read_from(&mut reader, rt)?;
        let key_attr = rec.attr(spec.group_attr)?;
        let same = key
            .as_ref()
            .is_some_and(|(tag, bytes)| *tag == key_attr.type_tag && bytes == key_attr.bytes);
        if !same {
            if let Some((tag, bytes)) = key.take() {
                emit_group(rt, &mut writer, &mut out_rec, tag, &bytes, &acc)?;
                groups += 1;
            }
            key = Some((key_attr.type_tag, key_attr.bytes.to_vec()));
            acc.reset();
        }
        acc.agg(rec.attr(spec.agg_attr)?)?;
    }
    if let Some((tag, bytes)) = key {
        emit_group(rt, &mut writer, &mut out_rec, tag, &bytes, &acc)?;
        groups += 1;
    }
    debug!("sort_based_group_by: {total} rows reduced to {groups} groups");
    Ok((writer.close(), groups))
}

fn emit_group<T: Runtime>(
    rt: &T,
    writer: &mut RowWriter<'_>,
    out_rec: &mut RowRecord,
    key_tag: TypeTag,
    key_bytes: &[u8],
    acc: &Accumulator,
) -> KernelResult<()> {
    let mut result = [0u8; 13];
    acc.write_result(&mut result)?;
    let result_attr = Attr::parse(&result)?;
    out_rec.clear();
    out_rec.push_attr(key_tag, key_bytes)?;
    out_rec.push_attr(result_attr.type_tag, result_attr.bytes)?;
    out_rec.write_to(writer, rt)
}
