/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::agg::accumulator::Accumulator;
use crate::consts::{
    AGG_AGG_ATTR_OFFSET, AGG_DISTINCT_OFFSET, AGG_OFFSET_OFFSET, AGG_SORT_ATTR_OFFSET,
    AGG_UPPER_BOUND, PARTIAL_AGG_UPPER_BOUND, ROW_UPPER_BOUND,
};
use crate::error::{KernelError, KernelResult};
use crate::rows::{attribute_at, Attr, TypeTag};
use crate::runtime::Runtime;
use crate::sort::AggFn;

/// A fixed-width partial-aggregate carrier plus its live accumulator.
///
/// The plaintext layout is byte-stable: `[distinct_entries u32]
/// [offset u32][sort attribute, padded to ROW_UPPER_BOUND][partial
/// aggregate, padded to PARTIAL_AGG_UPPER_BOUND]`. The same semantic
/// value always serializes to the same bytes, and a record with a dummy
/// sort key is indistinguishable from a real one under encryption.
pub struct AggRecord {
    buf: Box<[u8]>,
    acc: Accumulator,
}

impl AggRecord {
    pub fn new(func: AggFn) -> Self {
        AggRecord {
            buf: vec![0; AGG_UPPER_BOUND].into_boxed_slice(),
            acc: Accumulator::new(func),
        }
    }

    pub fn distinct(&self) -> u32 {
        u32::from_le_bytes(
            self.buf[AGG_DISTINCT_OFFSET..AGG_DISTINCT_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_distinct(&mut self, distinct: u32) {
        self.buf[AGG_DISTINCT_OFFSET..AGG_DISTINCT_OFFSET + 4]
            .copy_from_slice(&distinct.to_le_bytes());
    }

    pub fn inc_distinct(&mut self) {
        self.set_distinct(self.distinct() + 1);
    }

    pub fn offset(&self) -> u32 {
        u32::from_le_bytes(
            self.buf[AGG_OFFSET_OFFSET..AGG_OFFSET_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.buf[AGG_OFFSET_OFFSET..AGG_OFFSET_OFFSET + 4].copy_from_slice(&offset.to_le_bytes());
    }

    /// The serialized sort key, padding excluded.
    pub fn sort_key(&self) -> KernelResult<&[u8]> {
        let region = &self.buf[AGG_SORT_ATTR_OFFSET..AGG_SORT_ATTR_OFFSET + ROW_UPPER_BOUND];
        let attr = Attr::parse(region)?;
        Ok(&region[..attr.serialized_len()])
    }

    pub fn sort_key_is_dummy(&self) -> bool {
        self.buf[AGG_SORT_ATTR_OFFSET] == TypeTag::Dummy as u8
    }

    /// Compares this record's sort key against a serialized attribute.
    pub fn key_matches(&self, serialized_attr: &[u8]) -> bool {
        match self.sort_key() {
            Ok(key) => key == serialized_attr,
            Err(_) => false,
        }
    }

    /// Compares the sort keys of two records.
    pub fn same_key(&self, other: &AggRecord) -> bool {
        match (self.sort_key(), other.sort_key()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// The serialized partial aggregate, padding excluded.
    pub fn agg_attr(&self) -> KernelResult<Attr<'_>> {
        Attr::parse(&self.buf[AGG_AGG_ATTR_OFFSET..AGG_AGG_ATTR_OFFSET + PARTIAL_AGG_UPPER_BOUND])
    }

    /// Decrypts the `idx`-th attribute of `enc_row` into the sort-key
    /// region, zeroing the padding first so the layout stays
    /// byte-stable.
    pub fn load_sort_key<T: Runtime>(
        &mut self,
        rt: &T,
        enc_row: &[u8],
        idx: u32,
    ) -> KernelResult<()> {
        let cipher = attribute_at(enc_row, idx)?;
        let region = &mut self.buf[AGG_SORT_ATTR_OFFSET..AGG_SORT_ATTR_OFFSET + ROW_UPPER_BOUND];
        region.fill(0);
        rt.decrypt(cipher, region)?;
        Ok(())
    }

    /// Decrypts the `idx`-th attribute of `enc_row` into the partial
    /// aggregate region.
    pub fn load_agg_attr<T: Runtime>(
        &mut self,
        rt: &T,
        enc_row: &[u8],
        idx: u32,
    ) -> KernelResult<()> {
        let cipher = attribute_at(enc_row, idx)?;
        let region =
            &mut self.buf[AGG_AGG_ATTR_OFFSET..AGG_AGG_ATTR_OFFSET + PARTIAL_AGG_UPPER_BOUND];
        region.fill(0);
        rt.decrypt(cipher, region)?;
        Ok(())
    }

    /// Folds the attribute currently held in the partial aggregate
    /// region into the accumulator.
    pub fn accumulate(&mut self) -> KernelResult<()> {
        let attr =
            Attr::parse(&self.buf[AGG_AGG_ATTR_OFFSET..AGG_AGG_ATTR_OFFSET + PARTIAL_AGG_UPPER_BOUND])?;
        self.acc.agg(attr)
    }

    /// Folds another record's partial aggregate into this accumulator.
    pub fn accumulate_from(&mut self, other: &AggRecord) -> KernelResult<()> {
        self.acc.agg(other.agg_attr()?)
    }

    pub fn reset_accumulator(&mut self) {
        self.acc.reset();
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.acc
    }

    /// Serializes the accumulator into the partial aggregate region.
    pub fn flush(&mut self) -> KernelResult<()> {
        let region =
            &mut self.buf[AGG_AGG_ATTR_OFFSET..AGG_AGG_ATTR_OFFSET + PARTIAL_AGG_UPPER_BOUND];
        region.fill(0);
        self.acc.write_result(region)
    }

    /// Resets the record to a dummy: the accumulator restarts and the
    /// carrier is overwritten with the dummy pattern.
    pub fn clear<T: Runtime>(&mut self, rt: &T) {
        self.acc.reset();
        rt.write_dummy(&mut self.buf);
    }

    /// Copies the sort key, partial aggregate and accumulator from
    /// `other`; the distinct and offset counters are left untouched.
    pub fn copy_from(&mut self, other: &AggRecord) {
        self.buf[AGG_SORT_ATTR_OFFSET..].copy_from_slice(&other.buf[AGG_SORT_ATTR_OFFSET..]);
        self.acc.copy_from(&other.acc);
    }

    /// Encrypts the carrier into `out`, which must be exactly
    /// `enc_size(AGG_UPPER_BOUND)` bytes.
    pub fn encrypt_into<T: Runtime>(&self, rt: &T, out: &mut [u8]) -> KernelResult<()> {
        rt.encrypt(&self.buf, out)
    }

    /// Decrypts a ciphertext produced by
    /// [`encrypt_into`](AggRecord::encrypt_into). The accumulator is not
    /// reset, so records can be reduced through one accumulator.
    pub fn decrypt_from<T: Runtime>(&mut self, rt: &T, cipher: &[u8]) -> KernelResult<()> {
        let n = rt.decrypt(cipher, &mut self.buf)?;
        if n != AGG_UPPER_BOUND {
            return Err(KernelError::DummyFormat(
                "aggregation record has the wrong width",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ClearRuntime;

    fn int_attr_bytes(v: u32) -> Vec<u8> {
        let mut out = vec![TypeTag::Integer32 as u8];
        out.extend_from_slice(&4u32.to_le_bytes());
        out.extend_from_slice(&v.to_le_bytes());
        out
    }

    #[test]
    fn test_serialization_is_byte_stable() {
        let rt = ClearRuntime::default();
        let make = || {
            let mut rec = AggRecord::new(AggFn::Sum);
            rec.set_distinct(3);
            rec.set_offset(7);
            rec
        };
        let mut a = vec![0; rt.enc_size(AGG_UPPER_BOUND)];
        let mut b = vec![0; rt.enc_size(AGG_UPPER_BOUND)];
        make().encrypt_into(&rt, &mut a).unwrap();
        make().encrypt_into(&rt, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let rt = ClearRuntime::default();
        let mut rec = AggRecord::new(AggFn::Sum);
        rec.set_distinct(5);
        rec.set_offset(2);
        let mut cipher = vec![0; rt.enc_size(AGG_UPPER_BOUND)];
        rec.encrypt_into(&rt, &mut cipher).unwrap();

        let mut back = AggRecord::new(AggFn::Sum);
        back.decrypt_from(&rt, &cipher).unwrap();
        assert_eq!(back.distinct(), 5);
        assert_eq!(back.offset(), 2);
        assert!(back.sort_key_is_dummy());
    }

    #[test]
    fn test_key_comparison() {
        let mut a = AggRecord::new(AggFn::Sum);
        let mut b = AggRecord::new(AggFn::Sum);
        let key = int_attr_bytes(9);
        a.buf[AGG_SORT_ATTR_OFFSET..AGG_SORT_ATTR_OFFSET + key.len()].copy_from_slice(&key);
        assert!(!a.same_key(&b));
        b.buf[AGG_SORT_ATTR_OFFSET..AGG_SORT_ATTR_OFFSET + key.len()].copy_from_slice(&key);
        assert!(a.same_key(&b));
        assert!(a.key_matches(&key));
        assert!(!a.key_matches(&int_attr_bytes(8)));
    }

    #[test]
    fn test_wrong_width_is_rejected() {
        let rt = ClearRuntime::default();
        let mut cipher = vec![0; rt.enc_size(16)];
        rt.encrypt(&[0xCD; 16], &mut cipher).unwrap();
        let mut rec = AggRecord::new(AggFn::Sum);
        assert!(matches!(
            rec.decrypt_from(&rt, &cipher),
            Err(KernelError::DummyFormat(_))
        ));
    }
}
