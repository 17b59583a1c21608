/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Single-row filter predicates.
//!
//! Filters run over bare-framed encrypted rows and use their own op-code
//! namespace, fixed by the coordinator contract:
//!
//! | op code | predicate |
//! |---|---|
//! | `0` | keep iff attribute 2 (`Integer32`) is at most 3 |
//! | `2` | drop iff attribute 4 is a dummy (strips padding after aggregation) |
//! | `-1` | diagnostic: logs attribute 1 and always drops |

use anyhow::Context;
use log::debug;

use crate::consts::ROW_UPPER_BOUND;
use crate::error::{KernelError, KernelResult};
use crate::rows::{attribute_at, num_cols, Attr};
use crate::runtime::Runtime;

/// Evaluates the filter op-code against one encrypted row; returns true
/// to keep the row. A row with zero columns is always dropped.
pub fn filter_single_row<T: Runtime>(rt: &T, op_code: i32, row: &[u8]) -> anyhow::Result<bool> {
    if num_cols(row)? == 0 {
        debug!("filter_single_row: empty row dropped");
        return Ok(false);
    }

    match op_code {
        0 => {
            let attr = decrypt_attr(rt, row, 2).context("Could not read attribute 2")?;
            let value = Attr::parse(&attr)?.as_u32()?;
            Ok(value <= 3)
        }
        2 => {
            // Rows whose fourth attribute is a dummy are padding left
            // over from aggregation.
            let attr = decrypt_attr(rt, row, 4).context("Could not read attribute 4")?;
            Ok(!Attr::parse(&attr)?.is_dummy())
        }
        -1 => {
            let attr = decrypt_attr(rt, row, 1).context("Could not read attribute 1")?;
            let attr = Attr::parse(&attr)?;
            debug!(
                "filter_single_row: diagnostic, type {:?}, {} value bytes",
                attr.type_tag,
                attr.bytes.len()
            );
            Ok(false)
        }
        other => Err(KernelError::UnknownOpCode(other).into()),
    }
}

fn decrypt_attr<T: Runtime>(rt: &T, row: &[u8], idx: u32) -> KernelResult<Vec<u8>> {
    let cipher = attribute_at(row, idx)?;
    let mut plain = vec![0u8; ROW_UPPER_BOUND];
    let n = rt.decrypt(cipher, &mut plain)?;
    plain.truncate(n);
    Ok(plain)
}
