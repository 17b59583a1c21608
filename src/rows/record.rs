/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::cmp::Ordering;

use crate::error::{KernelError, KernelResult};
use crate::rows::attr::{write_attr, Attr, TypeTag};
use crate::rows::codec::{read_u32_at, RowReader, RowWriter};
use crate::runtime::Runtime;
use crate::sort::CmpContext;

/// A record shape the sort engine can move through its pipeline.
///
/// The engine is generic over this capability set so that differently
/// shaped records (plain rows today, join rows at the same seam) sort
/// through the same machinery. Implementations own a fixed-capacity
/// plaintext buffer; records live in the sort's record pool and only
/// pointers to them move.
pub trait Record {
    /// Creates an empty record able to hold `row_upper_bound` plaintext
    /// bytes.
    fn with_capacity(row_upper_bound: usize) -> Self;

    /// Reads and decrypts the next row of `reader` into this record.
    fn read_from<T: Runtime>(&mut self, reader: &mut RowReader<'_>, rt: &T) -> KernelResult<()>;

    /// Encrypts this record and appends it to `writer`.
    fn write_to<T: Runtime>(&self, writer: &mut RowWriter<'_>, rt: &T) -> KernelResult<()>;

    /// Total order for the op-code carried by `ctx`.
    fn cmp_by(&self, other: &Self, ctx: &CmpContext) -> Ordering;
}

/// A plain relational row with attribute-level-decrypted contents:
/// `[num_cols u32][type u8, len u32, bytes] × num_cols`.
pub struct RowRecord {
    buf: Box<[u8]>,
    len: usize,
    num_cols: u32,
}

impl RowRecord {
    pub fn num_cols(&self) -> u32 {
        self.num_cols
    }

    /// The decrypted row image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Returns the `idx`-th plaintext attribute (1-based).
    pub fn attr(&self, idx: u32) -> KernelResult<Attr<'_>> {
        if idx == 0 || idx > self.num_cols {
            return Err(KernelError::IndexOutOfRange {
                idx,
                num_cols: self.num_cols,
            });
        }
        let mut pos = 4usize;
        for i in 1..=self.num_cols {
            let attr = Attr::parse(&self.buf[pos..self.len])?;
            if i == idx {
                return Ok(attr);
            }
            pos += attr.serialized_len();
        }
        unreachable!("attribute index validated against column count")
    }

    /// Decrypts the bare-framed encrypted row `enc_row` into this
    /// record.
    pub fn decode<T: Runtime>(&mut self, enc_row: &[u8], rt: &T) -> KernelResult<()> {
        let cols = read_u32_at(enc_row, 0)?;
        self.buf[0..4].copy_from_slice(&cols.to_le_bytes());
        self.num_cols = cols;
        let mut in_pos = 4usize;
        let mut out_pos = 4usize;
        for _ in 0..cols {
            let enc_len = read_u32_at(enc_row, in_pos)? as usize;
            if enc_row.len() < in_pos + 4 + enc_len {
                return Err(KernelError::MalformedRow("row body truncated"));
            }
            let cipher = &enc_row[in_pos + 4..in_pos + 4 + enc_len];
            let plain_len = rt.decrypt(cipher, &mut self.buf[out_pos..])?;
            in_pos += 4 + enc_len;
            out_pos += plain_len;
        }
        self.len = out_pos;
        Ok(())
    }

    /// Serializes this record as a bare-framed encrypted row.
    pub fn encode<T: Runtime>(&self, rt: &T) -> KernelResult<Vec<u8>> {
        let mut out = Vec::with_capacity(4 + self.len + 16 * self.num_cols as usize);
        out.extend_from_slice(&self.num_cols.to_le_bytes());
        let mut pos = 4usize;
        for _ in 0..self.num_cols {
            let attr = Attr::parse(&self.buf[pos..self.len])?;
            let plain = &self.buf[pos..pos + attr.serialized_len()];
            let enc_len = rt.enc_size(plain.len());
            out.extend_from_slice(&(enc_len as u32).to_le_bytes());
            let start = out.len();
            out.resize(start + enc_len, 0);
            rt.encrypt(plain, &mut out[start..])?;
            pos += attr.serialized_len();
        }
        Ok(out)
    }

    /// Resets the record to zero columns.
    pub fn clear(&mut self) {
        self.buf[0..4].fill(0);
        self.num_cols = 0;
        self.len = 4;
    }

    /// Appends a plaintext attribute.
    pub fn push_attr(&mut self, type_tag: TypeTag, bytes: &[u8]) -> KernelResult<()> {
        let written = write_attr(&mut self.buf[self.len..], type_tag, bytes)?;
        self.len += written;
        self.num_cols += 1;
        self.buf[0..4].copy_from_slice(&self.num_cols.to_le_bytes());
        Ok(())
    }
}

impl Record for RowRecord {
    fn with_capacity(row_upper_bound: usize) -> Self {
        RowRecord {
            buf: vec![0; row_upper_bound].into_boxed_slice(),
            len: 4,
            num_cols: 0,
        }
    }

    fn read_from<T: Runtime>(&mut self, reader: &mut RowReader<'_>, rt: &T) -> KernelResult<()> {
        let enc_row = reader.next_row()?;
        self.decode(enc_row, rt)
    }

    fn write_to<T: Runtime>(&self, writer: &mut RowWriter<'_>, rt: &T) -> KernelResult<()> {
        let enc_row = self.encode(rt)?;
        writer.write_row_bytes(&enc_row)
    }

    fn cmp_by(&self, other: &Self, ctx: &CmpContext) -> Ordering {
        ctx.cmp_rows(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ClearRuntime;

    #[test]
    fn test_encode_decode_roundtrip() {
        let rt = ClearRuntime::default();
        let mut rec = RowRecord::with_capacity(256);
        rec.push_attr(TypeTag::Integer32, &42u32.to_le_bytes()).unwrap();
        rec.push_attr(TypeTag::String, b"grape").unwrap();
        let enc = rec.encode(&rt).unwrap();

        let mut back = RowRecord::with_capacity(256);
        back.decode(&enc, &rt).unwrap();
        assert_eq!(back.num_cols(), 2);
        assert_eq!(back.attr(1).unwrap().as_u32().unwrap(), 42);
        assert_eq!(back.attr(2).unwrap().bytes, b"grape");
        assert_eq!(back.as_bytes(), rec.as_bytes());
    }

    #[test]
    fn test_attr_out_of_range() {
        let mut rec = RowRecord::with_capacity(64);
        rec.push_attr(TypeTag::Integer32, &1u32.to_le_bytes()).unwrap();
        assert!(matches!(
            rec.attr(2),
            Err(KernelError::IndexOutOfRange { idx: 2, num_cols: 1 })
        ));
    }
}
