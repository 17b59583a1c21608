/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Context;
use log::debug;

use crate::agg::record::AggRecord;
use crate::consts::AGG_UPPER_BOUND;
use crate::error::{KernelError, KernelResult};
use crate::rows::read_u32_at;
use crate::runtime::Runtime;
use crate::sort::OpCode;

/// Counters of one final-result emission, surfaced so callers can check
/// that the touch sequence is a function of `result_size` alone.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeStats {
    pub slots_touched: u32,
}

fn slot_size<T: Runtime>(rt: &T) -> usize {
    4 + rt.enc_size(AGG_UPPER_BOUND)
}

fn check_result_set<T: Runtime>(
    rt: &T,
    offset: u32,
    result_set: &[u8],
    result_size: u32,
) -> KernelResult<usize> {
    if offset >= result_size {
        return Err(KernelError::InvalidArgument(
            "group offset lies outside the result set",
        ));
    }
    let size = slot_size(rt);
    let needed = result_size as usize * size;
    if result_set.len() < needed {
        return Err(KernelError::OutputOverflow {
            needed,
            available: result_set.len(),
        });
    }
    Ok(size)
}

/// Places a finished group at slot `offset` of a `result_size`-slot
/// result set without revealing the offset to a paging adversary.
///
/// The function visits all slots in index order: every slot gets its
/// length header written, the slot at `offset` additionally receives the
/// encrypted record, and every other slot gets a matched-cost touch of
/// its payload. The sequence of visited offsets is therefore a function
/// of `result_size` alone, at a cost of O(`result_size`) per group.
pub fn agg_final_result<T: Runtime>(
    rt: &T,
    record: &mut AggRecord,
    offset: u32,
    result_set: &mut [u8],
    result_size: u32,
) -> KernelResult<FinalizeStats> {
    let size = check_result_set(rt, offset, result_set, result_size)?;
    let mut slots_touched = 0u32;
    for i in 0..result_size {
        let slot = &mut result_set[i as usize * size..(i as usize + 1) * size];
        slot[0..4].copy_from_slice(&(size as u32).to_le_bytes());
        if i == offset {
            record.flush()?;
            record.encrypt_into(rt, &mut slot[4..])?;
        } else {
            // Matched-cost dummy operation on the payload.
            let touched = unsafe { std::ptr::read_volatile(&slot[4]) };
            std::hint::black_box(touched);
        }
        slots_touched += 1;
    }
    Ok(FinalizeStats { slots_touched })
}

/// Places a finished group directly at slot `offset`. Valid only when
/// the enclave page cache hides per-page access patterns; otherwise use
/// [`agg_final_result`].
pub fn agg_final_result_oblivious_epc<T: Runtime>(
    rt: &T,
    record: &mut AggRecord,
    offset: u32,
    result_set: &mut [u8],
    result_size: u32,
) -> KernelResult<()> {
    let size = check_result_set(rt, offset, result_set, result_size)?;
    let slot = &mut result_set[offset as usize * size..(offset as usize + 1) * size];
    slot[0..4].copy_from_slice(&(size as u32).to_le_bytes());
    record.flush()?;
    record.encrypt_into(rt, &mut slot[4..])?;
    Ok(())
}

/// Reduces `num_rows` length-prefixed encrypted aggregation records into
/// a single encrypted total, feeding every record's partial aggregate
/// through one accumulator. The carrier fields (sort key, counters) of
/// the result are those of the last input record.
pub fn final_aggregation<T: Runtime>(
    rt: &T,
    op_code: OpCode,
    agg_rows: &[u8],
    num_rows: u32,
    ret: &mut [u8],
) -> anyhow::Result<usize> {
    let spec = op_code.agg_spec()?;
    let mut record = AggRecord::new(spec.func);

    let mut pos = 0usize;
    for i in 0..num_rows {
        let enc_len = read_u32_at(agg_rows, pos)? as usize;
        if agg_rows.len() < pos + 4 + enc_len {
            return Err(KernelError::MalformedRow("aggregation record truncated").into());
        }
        record
            .decrypt_from(rt, &agg_rows[pos + 4..pos + 4 + enc_len])
            .with_context(|| format!("Could not decrypt aggregation record {i}"))?;
        record.accumulate()?;
        pos += 4 + enc_len;
    }

    record.flush()?;
    let enc = rt.enc_size(AGG_UPPER_BOUND);
    if ret.len() < 4 + enc {
        return Err(KernelError::OutputOverflow {
            needed: 4 + enc,
            available: ret.len(),
        }
        .into());
    }
    ret[0..4].copy_from_slice(&(enc as u32).to_le_bytes());
    record.encrypt_into(rt, &mut ret[4..4 + enc])?;
    debug!("final_aggregation: reduced {num_rows} records");
    Ok(4 + enc)
}
