/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Final-result placement: access-pattern independence of the scanning
//! variant, the direct EPC variant, and the global reduce.

mod common;

use anyhow::Result;
use common::*;
use oblix::prelude::*;

fn record_with(rt: &ClearRuntime, key: &str, sum: u32) -> AggRecord {
    // Drive a record through a one-row scan so it holds a real key and
    // accumulator state.
    let run = pack_run(&[groupby_row(rt, 0, key, sum)]);
    let mut out = vec![0; run.len() + 4 + rt.enc_size(AGG_UPPER_BOUND) + 64];
    let len = scan_aggregation_count_distinct(
        rt,
        OpCode(1),
        &run,
        1,
        &dummy_agg_row(rt),
        &mut out,
        AggPass::One,
    )
    .unwrap();
    out.truncate(len);
    let mut rec =
        read_agg_record(rt, &out[out.len() - 4 - rt.enc_size(AGG_UPPER_BOUND)..], AggFn::Sum);
    // Rebuild the live accumulator from the carried partial.
    rec.accumulate().unwrap();
    rec
}

#[test]
fn test_scan_variant_touches_every_slot_in_order() -> Result<()> {
    let rt = rt();
    let slot = 4 + rt.enc_size(AGG_UPPER_BOUND);
    let result_size = 8u32;

    for offset in [0u32, 3, 7] {
        let mut record = record_with(&rt, "K", 42);
        let mut result_set = vec![0; result_size as usize * slot];
        let stats = agg_final_result(&rt, &mut record, offset, &mut result_set, result_size)?;
        // The touch sequence depends on the result size alone.
        assert_eq!(stats.slots_touched, result_size);

        for i in 0..result_size as usize {
            let header =
                u32::from_le_bytes(result_set[i * slot..i * slot + 4].try_into().unwrap());
            // Every slot's header is written, real or not.
            assert_eq!(header as usize, slot);
            let payload = &result_set[i * slot + 4..(i + 1) * slot];
            assert_eq!(rt.test_dummy(payload), i != offset as usize);
        }

        let slots = read_slots(&rt, &result_set, result_size, AggFn::Sum);
        let written = slots[offset as usize].as_ref().unwrap();
        assert_eq!(written.key, string_key_bytes("K"));
        assert_eq!(written.value.unwrap(), 42);
    }
    Ok(())
}

#[test]
fn test_oblivious_epc_variant_writes_once() -> Result<()> {
    let rt = rt();
    let slot = 4 + rt.enc_size(AGG_UPPER_BOUND);
    let result_size = 4u32;
    let mut record = record_with(&rt, "K", 5);
    let mut result_set = vec![0; result_size as usize * slot];
    agg_final_result_oblivious_epc(&rt, &mut record, 2, &mut result_set, result_size)?;

    for i in 0..result_size as usize {
        let header = u32::from_le_bytes(result_set[i * slot..i * slot + 4].try_into().unwrap());
        if i == 2 {
            assert_eq!(header as usize, slot);
        } else {
            // Untouched slots keep their original bytes.
            assert_eq!(header, 0);
        }
    }
    let slots = read_slots(&rt, &result_set, result_size, AggFn::Sum);
    assert_eq!(slots[2].as_ref().unwrap().value.unwrap(), 5);
    Ok(())
}

#[test]
fn test_offset_outside_result_set_is_rejected() {
    let rt = rt();
    let slot = 4 + rt.enc_size(AGG_UPPER_BOUND);
    let mut record = record_with(&rt, "K", 1);
    let mut result_set = vec![0; 2 * slot];
    let err = agg_final_result(&rt, &mut record, 2, &mut result_set, 2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[test]
fn test_final_aggregation_reduces_partials() -> Result<()> {
    let rt = rt();
    let parts = [3u32, 4, 8];
    let mut agg_rows = Vec::new();
    for &value in &parts {
        let record = record_with(&rt, "K", value);
        let enc = rt.enc_size(AGG_UPPER_BOUND);
        let mut cipher = vec![0; enc];
        record.encrypt_into(&rt, &mut cipher)?;
        agg_rows.extend_from_slice(&(enc as u32).to_le_bytes());
        agg_rows.extend_from_slice(&cipher);
    }

    let mut ret = vec![0; 4 + rt.enc_size(AGG_UPPER_BOUND)];
    let len = final_aggregation(&rt, OpCode(1), &agg_rows, 3, &mut ret)?;
    assert_eq!(len, ret.len());
    let total = read_agg_record(&rt, &ret, AggFn::Sum);
    assert_eq!(total.agg_attr().unwrap().as_u32().unwrap(), 15);
    assert_eq!(total.sort_key().unwrap(), string_key_bytes("K"));
    Ok(())
}
