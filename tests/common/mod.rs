/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Shared fixtures: row builders and plaintext-runtime helpers.

#![allow(dead_code)]

use oblix::prelude::*;

pub fn rt() -> ClearRuntime {
    ClearRuntime::seeded(0x0b11)
}

/// Serializes and encrypts one attribute.
pub fn encrypt_attr(rt: &ClearRuntime, tag: TypeTag, bytes: &[u8]) -> Vec<u8> {
    let mut plain = vec![tag as u8];
    plain.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    plain.extend_from_slice(bytes);
    let mut cipher = vec![0; rt.enc_size(plain.len())];
    rt.encrypt(&plain, &mut cipher).unwrap();
    cipher
}

/// Builds a bare-framed encrypted row from plaintext attributes.
pub fn enc_row(rt: &ClearRuntime, attrs: &[(TypeTag, Vec<u8>)]) -> Vec<u8> {
    let mut row = (attrs.len() as u32).to_le_bytes().to_vec();
    for (tag, bytes) in attrs {
        let cipher = encrypt_attr(rt, *tag, bytes);
        row.extend_from_slice(&(cipher.len() as u32).to_le_bytes());
        row.extend_from_slice(&cipher);
    }
    row
}

/// A three-column group-by row: row id, group key, aggregated value.
pub fn groupby_row(rt: &ClearRuntime, id: u32, key: &str, value: u32) -> Vec<u8> {
    enc_row(
        rt,
        &[
            (TypeTag::Integer32, id.to_le_bytes().to_vec()),
            (TypeTag::String, key.as_bytes().to_vec()),
            (TypeTag::Integer32, value.to_le_bytes().to_vec()),
        ],
    )
}

/// A three-column group-by row keyed by an integer.
pub fn int_key_row(rt: &ClearRuntime, id: u32, key: u32, value: u32) -> Vec<u8> {
    enc_row(
        rt,
        &[
            (TypeTag::Integer32, id.to_le_bytes().to_vec()),
            (TypeTag::Integer32, key.to_le_bytes().to_vec()),
            (TypeTag::Integer32, value.to_le_bytes().to_vec()),
        ],
    )
}

/// A single-attribute row holding one integer, for plain sort tests.
pub fn int_row(rt: &ClearRuntime, value: u32) -> Vec<u8> {
    enc_row(rt, &[(TypeTag::Integer32, value.to_le_bytes().to_vec())])
}

/// Packs bare rows into a block run.
pub fn pack_run(rows: &[Vec<u8>]) -> Vec<u8> {
    let cap: usize = rows.iter().map(|r| r.len() + 16).sum::<usize>() + 64;
    let mut out = vec![0; cap];
    let mut writer = RowWriter::new(&mut out, ROW_UPPER_BOUND as u32);
    for row in rows {
        writer.write_row_bytes(row).unwrap();
    }
    let written = writer.close();
    out.truncate(written);
    out
}

/// Concatenates per-buffer runs into one region with an offset table.
pub fn concat_buffers(buffers: &[Vec<u8>]) -> (Vec<u8>, Vec<usize>) {
    let mut data = Vec::new();
    let mut offsets = vec![0];
    for buffer in buffers {
        data.extend_from_slice(buffer);
        offsets.push(data.len());
    }
    (data, offsets)
}

/// Decodes every row of a run into its plaintext attributes.
pub fn decode_run(rt: &ClearRuntime, run: &[u8]) -> Vec<Vec<(TypeTag, Vec<u8>)>> {
    let mut reader = RowReader::new(run);
    let mut rec = RowRecord::with_capacity(ROW_UPPER_BOUND);
    let mut rows = Vec::new();
    while reader.has_next().unwrap() {
        rec.read_from(&mut reader, rt).unwrap();
        let mut attrs = Vec::new();
        for i in 1..=rec.num_cols() {
            let attr = rec.attr(i).unwrap();
            attrs.push((attr.type_tag, attr.bytes.to_vec()));
        }
        rows.push(attrs);
    }
    rows
}

pub fn attr_u32(attrs: &[(TypeTag, Vec<u8>)], idx: usize) -> u32 {
    assert_eq!(attrs[idx].0, TypeTag::Integer32);
    u32::from_le_bytes(attrs[idx].1.as_slice().try_into().unwrap())
}

/// The wire-level dummy aggregation record fed to an unseeded pass-1
/// scan.
pub fn dummy_agg_row(rt: &ClearRuntime) -> Vec<u8> {
    let enc = rt.enc_size(AGG_UPPER_BOUND);
    let mut out = (enc as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&vec![0; enc]);
    out
}

/// A decrypted view of one non-dummy result slot.
pub struct SlotInfo {
    pub cipher: Vec<u8>,
    pub distinct: u32,
    pub offset: u32,
    /// Serialized sort key attribute.
    pub key: Vec<u8>,
    /// Value of the partial aggregate, when it is an `Integer32`.
    pub value: Option<u32>,
    /// Value of the partial aggregate, when it is a `Float64`.
    pub fvalue: Option<f64>,
}

/// Decrypts a pass-2 result set of `result_size` slots; dummy slots map
/// to `None`.
pub fn read_slots(
    rt: &ClearRuntime,
    out: &[u8],
    result_size: u32,
    func: AggFn,
) -> Vec<Option<SlotInfo>> {
    let slot_size = 4 + rt.enc_size(AGG_UPPER_BOUND);
    let mut slots = Vec::new();
    for i in 0..result_size as usize {
        let slot = &out[i * slot_size..(i + 1) * slot_size];
        let payload = &slot[4..];
        if rt.test_dummy(payload) {
            slots.push(None);
            continue;
        }
        let mut rec = AggRecord::new(func);
        rec.decrypt_from(rt, payload).unwrap();
        let agg = rec.agg_attr().unwrap();
        slots.push(Some(SlotInfo {
            cipher: payload.to_vec(),
            distinct: rec.distinct(),
            offset: rec.offset(),
            key: rec.sort_key().unwrap().to_vec(),
            value: agg.as_u32().ok(),
            fvalue: agg.as_f64().ok(),
        }));
    }
    slots
}

/// Decrypts a length-prefixed aggregation record (a pass-1 summary or a
/// reconciled seed).
pub fn read_agg_record(rt: &ClearRuntime, bytes: &[u8], func: AggFn) -> AggRecord {
    let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut rec = AggRecord::new(func);
    rec.decrypt_from(rt, &bytes[4..4 + len]).unwrap();
    rec
}

/// Serialized `String` attribute bytes for a key, as they appear in an
/// aggregation record's sort-key region.
pub fn string_key_bytes(key: &str) -> Vec<u8> {
    let mut out = vec![TypeTag::String as u8];
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}
