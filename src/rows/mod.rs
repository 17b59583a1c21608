/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The streaming encrypted-row format.
//!
//! A row is a column count followed by one individually encrypted
//! attribute per column. Rows travel in two framings: *bare* rows on the
//! coordinator wire, and *block* runs produced by the sort engine, where
//! a header carrying the block length, row count and row upper bound
//! precedes each packed group of rows. All sizes are little-endian.

mod attr;
mod codec;
mod record;

pub use attr::{Attr, TypeTag};
pub use codec::{
    attribute_at, bare_row_len, num_cols, read_u32_at, BlockHeader, BlockReader, RowReader,
    RowWriter,
};
pub use record::{Record, RowRecord};
