/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Context;
use log::debug;

use crate::agg::record::AggRecord;
use crate::consts::{AGG_UPPER_BOUND, ROW_UPPER_BOUND};
use crate::error::{KernelError, KernelResult};
use crate::rows::{attribute_at, bare_row_len, read_u32_at, Attr};
use crate::runtime::Runtime;
use crate::sort::OpCode;

/// Reconciles the pass-1 summaries of all workers into pass-2 seeds.
///
/// `rows` carries `num_workers` pairs in worker order, each serialized as
/// `num_cols(4) || row_body || enc_agg_len(4) || enc_agg_ciphertext`: the
/// worker's first row and its summary record.
///
/// Round 0 accumulates the global distinct count, deducting one for
/// every boundary where a worker's first group key equals its left
/// neighbor's last group key (the run spans the boundary). Round 1 emits
/// one seed per worker: worker 0 receives a dummy-keyed record carrying
/// the global distinct count, and worker `i` receives its left
/// neighbor's last-group state at the corrected offset, with partials
/// folded together when the neighbor's whole partition continues a
/// single run. The output is `num_workers` length-prefixed encrypted
/// records and is byte-identical across repeated invocations.
pub fn process_boundary_records<T: Runtime>(
    rt: &T,
    op_code: OpCode,
    rows: &[u8],
    num_workers: u32,
    out_agg_rows: &mut [u8],
) -> anyhow::Result<usize> {
    let spec = op_code.agg_spec()?;
    let pairs = parse_pairs(rows, num_workers)?;

    let mut key_buf = vec![0u8; ROW_UPPER_BOUND].into_boxed_slice();
    let mut prev = AggRecord::new(spec.func);
    let mut current = AggRecord::new(spec.func);

    // Round 0: the global distinct count.
    let mut global_distinct = 0u32;
    for (i, pair) in pairs.iter().enumerate() {
        let key = first_row_key(rt, pair.first_row, spec.group_attr, &mut key_buf)?;
        current
            .decrypt_from(rt, pair.enc_agg)
            .with_context(|| format!("Could not decrypt the summary of worker {i}"))?;
        global_distinct += current.distinct();
        if i > 0 && prev.key_matches(key) {
            // The run spans this boundary.
            global_distinct -= 1;
        }
        prev.copy_from(&current);
    }
    debug!("process_boundary_records: {global_distinct} distinct groups across {num_workers} workers");

    // Round 1: emit one reconciled seed per worker.
    let mut out_pos = 0usize;
    let mut offset = 0u32;
    let mut prev_distinct = 0u32;
    for (i, pair) in pairs.iter().enumerate() {
        let key = first_row_key(rt, pair.first_row, spec.group_attr, &mut key_buf)?;
        current.decrypt_from(rt, pair.enc_agg)?;
        let current_distinct = current.distinct();

        if i == 0 {
            // Worker 0 only needs the final output size.
            prev.clear(rt);
            prev.flush()?;
            prev.set_distinct(global_distinct);
            prev.set_offset(0);
            emit(rt, &prev, out_agg_rows, &mut out_pos)?;
            prev.copy_from(&current);
            prev_distinct = current_distinct;
            continue;
        }

        offset += prev_distinct;
        if prev.key_matches(key) {
            offset -= 1;
        }
        if prev.same_key(&current) {
            // The whole partition continues the neighbor's run: fold its
            // partial into the propagated state. The accumulators are
            // rebuilt from the carried partials only here, so records
            // that never merge keep their serialized partial untouched.
            current.reset_accumulator();
            current.accumulate()?;
            prev.reset_accumulator();
            prev.accumulate()?;
            prev.accumulate_from(&current)?;
            prev.flush()?;
            current.copy_from(&prev);
        }
        prev.set_distinct(global_distinct);
        prev.set_offset(offset);
        emit(rt, &prev, out_agg_rows, &mut out_pos)?;

        prev.copy_from(&current);
        prev_distinct = current_distinct;
    }

    debug!(
        "process_boundary_records: output within enclave: {}",
        rt.is_within_enclave(&out_agg_rows[..out_pos])
    );
    Ok(out_pos)
}

struct BoundaryPair<'a> {
    first_row: &'a [u8],
    enc_agg: &'a [u8],
}

fn parse_pairs(rows: &[u8], num_workers: u32) -> KernelResult<Vec<BoundaryPair<'_>>> {
    let mut pairs = Vec::with_capacity(num_workers as usize);
    let mut pos = 0usize;
    for _ in 0..num_workers {
        let row_len = bare_row_len(&rows[pos..])?;
        let first_row = &rows[pos..pos + row_len];
        pos += row_len;
        let enc_len = read_u32_at(rows, pos)? as usize;
        if rows.len() < pos + 4 + enc_len {
            return Err(KernelError::MalformedRow("aggregation record truncated"));
        }
        let enc_agg = &rows[pos + 4..pos + 4 + enc_len];
        pos += 4 + enc_len;
        pairs.push(BoundaryPair { first_row, enc_agg });
    }
    Ok(pairs)
}

/// Decrypts the group-key attribute of a worker's first row and returns
/// its serialized form.
fn first_row_key<'b, T: Runtime>(
    rt: &T,
    first_row: &[u8],
    group_attr: u32,
    key_buf: &'b mut [u8],
) -> KernelResult<&'b [u8]> {
    let cipher = attribute_at(first_row, group_attr)?;
    key_buf.fill(0);
    rt.decrypt(cipher, key_buf)?;
    let attr = Attr::parse(key_buf)?;
    let len = attr.serialized_len();
    Ok(&key_buf[..len])
}

fn emit<T: Runtime>(
    rt: &T,
    rec: &AggRecord,
    out: &mut [u8],
    out_pos: &mut usize,
) -> KernelResult<()> {
    let enc = rt.enc_size(AGG_UPPER_BOUND);
    if out.len() < *out_pos + 4 + enc {
        return Err(KernelError::OutputOverflow {
            needed: *out_pos + 4 + enc,
            available: out.len(),
        });
    }
    out[*out_pos..*out_pos + 4].copy_from_slice(&(enc as u32).to_le_bytes());
    rec.encrypt_into(rt, &mut out[*out_pos + 4..*out_pos + 4 + enc])?;
    *out_pos += 4 + enc;
    Ok(())
}
