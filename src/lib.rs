/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]

pub mod agg;
pub mod consts;
pub mod error;
pub mod filter;
pub mod rows;
pub mod runtime;
pub mod sort;

pub mod prelude {
    pub use crate::agg::*;
    pub use crate::consts::*;
    pub use crate::error::*;
    pub use crate::filter::*;
    pub use crate::rows::*;
    pub use crate::runtime::*;
    pub use crate::sort::*;
}
