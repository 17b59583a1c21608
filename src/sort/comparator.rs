/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::cell::Cell;
use std::cmp::Ordering;

use crate::error::{KernelError, KernelResult};
use crate::rows::{Attr, RowRecord, TypeTag};

/// An operator code: the contract between the coordinator and the
/// kernel. It selects the sort key and, for group-by operators, the
/// aggregation function and its attribute indices. Op-codes are never
/// parsed from rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCode(pub i32);

/// The aggregation function selected by an op-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    Sum,
    Count,
    Avg,
}

/// Attribute indices and function of a group-by op-code.
#[derive(Debug, Clone, Copy)]
pub struct AggSpec {
    /// 1-based index of the group-by attribute.
    pub group_attr: u32,
    /// 1-based index of the aggregated attribute.
    pub agg_attr: u32,
    pub func: AggFn,
}

impl OpCode {
    /// The 1-based attribute indices forming the sort key, in tie-break
    /// order.
    pub fn sort_attrs(self) -> KernelResult<&'static [u32]> {
        match self.0 {
            1 | 3 | 4 | 5 => Ok(&[2]),
            2 => Ok(&[1]),
            other => Err(KernelError::UnknownOpCode(other)),
        }
    }

    /// The aggregation selected by this op-code, if it is a group-by.
    pub fn agg_spec(self) -> KernelResult<AggSpec> {
        match self.0 {
            1 => Ok(AggSpec {
                group_attr: 2,
                agg_attr: 3,
                func: AggFn::Sum,
            }),
            4 => Ok(AggSpec {
                group_attr: 2,
                agg_attr: 3,
                func: AggFn::Count,
            }),
            5 => Ok(AggSpec {
                group_attr: 2,
                agg_attr: 3,
                func: AggFn::Avg,
            }),
            other => Err(KernelError::UnknownOpCode(other)),
        }
    }
}

/// Comparison state for one sort: the op-code's key attributes plus the
/// comparison counters surfaced for performance diagnosis.
///
/// Ordering per attribute: dummies sort after every real value,
/// `Integer32` compares as unsigned, `String` compares byte-wise and
/// then by length. The deep-comparison counter advances on every
/// byte-level tie-breaking step. A type mismatch is recorded and
/// surfaced by [`check`](CmpContext::check); it is fatal to the
/// operator.
pub struct CmpContext {
    key_attrs: &'static [u32],
    comparisons: Cell<u64>,
    deep_comparisons: Cell<u64>,
    incomparable: Cell<Option<(u8, u8)>>,
    malformed: Cell<bool>,
}

impl CmpContext {
    pub fn new(op_code: OpCode) -> KernelResult<Self> {
        Ok(CmpContext {
            key_attrs: op_code.sort_attrs()?,
            comparisons: Cell::new(0),
            deep_comparisons: Cell::new(0),
            incomparable: Cell::new(None),
            malformed: Cell::new(false),
        })
    }

    /// Total order over two decoded rows for this op-code's key.
    pub fn cmp_rows(&self, a: &RowRecord, b: &RowRecord) -> Ordering {
        self.comparisons.set(self.comparisons.get() + 1);
        for (i, &idx) in self.key_attrs.iter().enumerate() {
            let (attr_a, attr_b) = match (a.attr(idx), b.attr(idx)) {
                (Ok(a), Ok(b)) => (a, b),
                _ => {
                    self.malformed.set(true);
                    return Ordering::Equal;
                }
            };
            if i > 0 {
                self.deep_comparisons.set(self.deep_comparisons.get() + 1);
            }
            match self.cmp_attrs(attr_a, attr_b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Strict less-than under [`cmp_rows`](CmpContext::cmp_rows).
    pub fn less_than(&self, a: &RowRecord, b: &RowRecord) -> bool {
        self.cmp_rows(a, b) == Ordering::Less
    }

    fn cmp_attrs(&self, a: Attr<'_>, b: Attr<'_>) -> Ordering {
        match (a.type_tag, b.type_tag) {
            (TypeTag::Dummy, TypeTag::Dummy) => Ordering::Equal,
            (TypeTag::Dummy, _) => Ordering::Greater,
            (_, TypeTag::Dummy) => Ordering::Less,
            (TypeTag::Integer32, TypeTag::Integer32) => {
                match (a.as_u32(), b.as_u32()) {
                    (Ok(va), Ok(vb)) => va.cmp(&vb),
                    _ => {
                        self.malformed.set(true);
                        Ordering::Equal
                    }
                }
            }
            (TypeTag::Float64, TypeTag::Float64) => match (a.as_f64(), b.as_f64()) {
                (Ok(va), Ok(vb)) => va.partial_cmp(&vb).unwrap_or(Ordering::Equal),
                _ => {
                    self.malformed.set(true);
                    Ordering::Equal
                }
            },
            (TypeTag::String, TypeTag::String) => {
                for (ba, bb) in a.bytes.iter().zip(b.bytes.iter()) {
                    self.deep_comparisons.set(self.deep_comparisons.get() + 1);
                    if ba != bb {
                        return ba.cmp(bb);
                    }
                }
                a.bytes.len().cmp(&b.bytes.len())
            }
            (ta, tb) => {
                self.incomparable.set(Some((ta as u8, tb as u8)));
                Ordering::Equal
            }
        }
    }

    /// Element-wise comparisons performed so far.
    pub fn comparisons(&self) -> u64 {
        self.comparisons.get()
    }

    /// Byte-level tie-breaking steps performed so far.
    pub fn deep_comparisons(&self) -> u64 {
        self.deep_comparisons.get()
    }

    /// Surfaces any fatal condition recorded during comparisons.
    pub fn check(&self) -> KernelResult<()> {
        if let Some((ta, tb)) = self.incomparable.get() {
            return Err(KernelError::IncomparableTypes(ta, tb));
        }
        if self.malformed.get() {
            return Err(KernelError::MalformedRow("sort key attribute unreadable"));
        }
        Ok(())
    }
}
